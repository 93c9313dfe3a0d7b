//! Receipt delivery after a payment is recorded.
//!
//! Delivery runs on a detached task. Failures are logged and never reach the
//! caller of the payment operation.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::providers::{EmailMessage, EmailProvider, SmsMessage, SmsProvider};
use crate::models::{Payment, StudentAccount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelHealth {
    Disabled,
    Ok,
    Degraded,
}

/// Reported by `/health`. Delivery is best-effort, so a degraded channel does
/// not fail the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationHealth {
    pub email: ChannelHealth,
    pub sms: ChannelHealth,
}

pub struct ReceiptNotifier {
    email: Arc<dyn EmailProvider>,
    sms: Arc<dyn SmsProvider>,
}

impl ReceiptNotifier {
    pub fn new(email: Arc<dyn EmailProvider>, sms: Arc<dyn SmsProvider>) -> Self {
        Self { email, sms }
    }

    pub fn spawn_receipt(
        self: &Arc<Self>,
        payment: Payment,
        student: StudentAccount,
    ) -> JoinHandle<()> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move { notifier.send_receipt(&payment, &student).await })
    }

    pub async fn health(&self) -> NotificationHealth {
        let email = if !self.email.is_enabled() {
            ChannelHealth::Disabled
        } else if let Err(e) = self.email.health_check().await {
            tracing::warn!(error = %e, "Email provider unhealthy");
            ChannelHealth::Degraded
        } else {
            ChannelHealth::Ok
        };
        let sms = if !self.sms.is_enabled() {
            ChannelHealth::Disabled
        } else if let Err(e) = self.sms.health_check().await {
            tracing::warn!(error = %e, "SMS provider unhealthy");
            ChannelHealth::Degraded
        } else {
            ChannelHealth::Ok
        };
        NotificationHealth { email, sms }
    }

    pub async fn send_receipt(&self, payment: &Payment, student: &StudentAccount) {
        if let Some(to) = student.email.as_deref().filter(|e| !e.is_empty()) {
            if self.email.is_enabled() {
                let message = receipt_email(to, payment, student);
                if let Err(e) = self.email.send(&message).await {
                    tracing::warn!(
                        receipt_number = %payment.receipt_number,
                        error = %e,
                        "Receipt email not delivered"
                    );
                }
            }
        }

        if let Some(phone) = student.phone.as_deref().filter(|p| !p.is_empty()) {
            if self.sms.is_enabled() {
                let message = SmsMessage {
                    to: phone.to_string(),
                    body: receipt_sms(payment),
                };
                if let Err(e) = self.sms.send(&message).await {
                    tracing::warn!(
                        receipt_number = %payment.receipt_number,
                        error = %e,
                        "Receipt SMS not delivered"
                    );
                }
            }
        }
    }
}

/// `1234567.5` becomes `1,234,567.50`; whole amounts drop the fraction.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let abs = rounded.abs();
    let whole = abs.trunc();
    let fraction = abs - whole;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let mut out = if negative { format!("-{}", grouped) } else { grouped };
    if !fraction.is_zero() {
        let cents = (fraction * Decimal::ONE_HUNDRED).trunc();
        out.push_str(&format!(".{:0>2}", cents));
    }
    out
}

pub fn receipt_email(to: &str, payment: &Payment, student: &StudentAccount) -> EmailMessage {
    let date = payment.payment_date.to_chrono().format("%d.%m.%Y");
    let amount = format!("{} {}", format_amount(payment.amount), payment.currency);

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #4CAF50;">Payment Receipt</h1>
    <p>Dear {name},</p>
    <div style="background: #f5f5f5; padding: 15px; margin: 20px 0;">
      <p><strong>Receipt Number:</strong> {receipt}</p>
      <p><strong>Date:</strong> {date}</p>
      <p><strong>Amount:</strong> {amount}</p>
      <p><strong>Payment Method:</strong> {method}</p>
      <p><strong>Status:</strong> {status}</p>
    </div>
    <p>Thank you for your payment!</p>
  </div>
</body>
</html>"#,
        name = student.first_name,
        receipt = payment.receipt_number,
        date = date,
        amount = amount,
        method = payment.payment_method,
        status = payment.status,
    );

    let text = format!(
        "Dear {},\n\nReceipt Number: {}\nDate: {}\nAmount: {}\nPayment Method: {}\nStatus: {}\n\nThank you for your payment!",
        student.first_name,
        payment.receipt_number,
        date,
        amount,
        payment.payment_method,
        payment.status,
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("Payment Receipt - {}", payment.receipt_number),
        body_text: Some(text),
        body_html: Some(html),
    }
}

pub fn receipt_sms(payment: &Payment) -> String {
    format!(
        "To'lovingiz qabul qilindi! Summa: {} {}. Chek raqami: {}. Rahmat!",
        format_amount(payment.amount),
        payment.currency,
        payment.receipt_number
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Discount, LateFee, PaymentFor, PaymentMethod, PaymentPurpose, PaymentStatus,
    };
    use crate::services::providers::{MockEmailProvider, MockSmsProvider};
    use mongodb::bson::DateTime;
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment {
            id: "p-1".to_string(),
            organization_id: "org-1".to_string(),
            student_id: "s-1".to_string(),
            receipt_number: "RCP-20240115-4821".to_string(),
            amount: dec!(1250000),
            currency: "UZS".to_string(),
            discount: Discount::default(),
            late_fee: LateFee::default(),
            net_amount: dec!(1250000),
            payment_method: PaymentMethod::Card,
            payment_for: PaymentFor {
                kind: PaymentPurpose::Tuition,
                description: None,
                group_id: None,
                course_id: None,
                month: None,
                year: None,
            },
            status: PaymentStatus::Completed,
            payment_date: DateTime::from_millis(1_705_312_800_000),
            due_date: None,
            transaction_id: None,
            collected_by: "staff-1".to_string(),
            verified_by: None,
            verified_at: None,
            notes: None,
            refund: None,
            created_at: DateTime::from_millis(1_705_312_800_000),
            updated_at: DateTime::from_millis(1_705_312_800_000),
        }
    }

    fn student(email: Option<&str>, phone: Option<&str>) -> StudentAccount {
        StudentAccount {
            id: "s-1".to_string(),
            organization_id: "org-1".to_string(),
            user_id: None,
            student_id: "STD-20240101-1000".to_string(),
            first_name: "Aziza".to_string(),
            last_name: "Karimova".to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            total_paid: Decimal::ZERO,
            total_debt: Decimal::ZERO,
            updated_at: None,
        }
    }

    #[test]
    fn amounts_are_grouped() {
        assert_eq!(format_amount(dec!(1250000)), "1,250,000");
        assert_eq!(format_amount(dec!(999)), "999");
        assert_eq!(format_amount(dec!(1234.5)), "1,234.50");
        assert_eq!(format_amount(dec!(0)), "0");
    }

    #[test]
    fn email_subject_carries_receipt_number() {
        let email = receipt_email("a@example.com", &payment(), &student(None, None));
        assert_eq!(email.subject, "Payment Receipt - RCP-20240115-4821");
        assert!(email.body_html.unwrap().contains("1,250,000 UZS"));
        assert!(email.body_text.unwrap().contains("15.01.2024"));
    }

    #[tokio::test]
    async fn sends_to_available_channels_only() {
        let email = Arc::new(MockEmailProvider::new(true));
        let sms = Arc::new(MockSmsProvider::new(true));
        let notifier = ReceiptNotifier::new(email.clone(), sms.clone());

        notifier
            .send_receipt(&payment(), &student(Some("a@example.com"), None))
            .await;
        assert_eq!(email.send_count(), 1);
        assert_eq!(sms.send_count(), 0);

        notifier
            .send_receipt(&payment(), &student(None, Some("+998901234567")))
            .await;
        assert_eq!(email.send_count(), 1);
        assert_eq!(sms.send_count(), 1);
        assert!(sms.sent()[0].body.contains("RCP-20240115-4821"));
    }

    #[tokio::test]
    async fn disabled_providers_are_skipped() {
        let email = Arc::new(MockEmailProvider::new(false));
        let sms = Arc::new(MockSmsProvider::new(false));
        let notifier = Arc::new(ReceiptNotifier::new(email.clone(), sms.clone()));

        notifier
            .spawn_receipt(payment(), student(Some("a@example.com"), Some("998901234567")))
            .await
            .unwrap();
        assert_eq!(email.send_count(), 0);
        assert_eq!(sms.send_count(), 0);
    }

    #[tokio::test]
    async fn health_reports_each_channel() {
        let notifier = ReceiptNotifier::new(
            Arc::new(MockEmailProvider::new(true)),
            Arc::new(MockSmsProvider::new(false)),
        );
        assert_eq!(
            notifier.health().await,
            NotificationHealth {
                email: ChannelHealth::Ok,
                sms: ChannelHealth::Disabled,
            }
        );
    }
}
