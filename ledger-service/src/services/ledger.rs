//! Payment ledger: records payments and keeps student balances in step.
//!
//! Checks that can fail run before any write. Status moves are conditional on
//! the expected source status so racing callers cannot both win. When the
//! payment write lands but the balance write does not, the caller gets
//! [`LedgerError::Dependency`] and the event is logged for reconciliation.

use chrono::{DateTime as ChronoDateTime, Duration, NaiveTime, Utc};
use mongodb::bson::DateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::error::{LedgerError, StoreError};
use super::identifiers::ReceiptNumberSource;
use super::metrics;
use super::repository::{
    DateRange, OrganizationRepository, Page, Paginated, PaymentFilter, PaymentRepository,
    StudentAccountRepository,
};
use crate::models::{
    net_amount, BalanceChange, Discount, LateFee, Organization, Payment, PaymentFor,
    PaymentMethod, PaymentStatistics, PaymentStatus, Refund, StatusChange, StudentAccount,
    TodaySummary, MAX_MONEY,
};

pub const DEFAULT_CURRENCY: &str = "UZS";
pub const MAX_RECEIPT_ATTEMPTS: usize = 5;
pub const MAX_NOTES_LEN: usize = 500;
pub const REFUND_REASON_LEN: std::ops::RangeInclusive<usize> = 3..=200;
/// Days since the last completed payment after which an indebted student is
/// reported as overdue.
pub const OVERDUE_AFTER_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub student_id: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub discount: Discount,
    pub late_fee: LateFee,
    pub payment_method: PaymentMethod,
    pub payment_for: PaymentFor,
    pub payment_date: Option<DateTime>,
    pub due_date: Option<DateTime>,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    /// Record as `pending`; the balance moves on verification.
    pub await_verification: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentUpdate {
    pub notes: Option<String>,
    pub status: Option<PaymentStatus>,
}

/// Who is reading. Students only see their own payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Staff,
    Student { user_id: String },
}

#[derive(Debug, Clone)]
pub struct RecordedPayment {
    pub payment: Payment,
    pub student: StudentAccount,
}

#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub student: StudentAccount,
    pub organization: Option<Organization>,
}

/// An indebted student whose last completed payment is older than
/// [`OVERDUE_AFTER_DAYS`].
#[derive(Debug, Clone)]
pub struct OverdueAccount {
    pub student: StudentAccount,
    pub last_payment_date: DateTime,
    pub days_overdue: i64,
}

pub struct PaymentLedger {
    payments: Arc<dyn PaymentRepository>,
    students: Arc<dyn StudentAccountRepository>,
    organizations: Arc<dyn OrganizationRepository>,
    receipts: Arc<dyn ReceiptNumberSource>,
}

impl PaymentLedger {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        students: Arc<dyn StudentAccountRepository>,
        organizations: Arc<dyn OrganizationRepository>,
        receipts: Arc<dyn ReceiptNumberSource>,
    ) -> Self {
        Self {
            payments,
            students,
            organizations,
            receipts,
        }
    }

    pub async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(self.payments.health_check().await?)
    }

    #[instrument(
        skip(self, request),
        fields(org_id = %org_id, student_id = %request.student_id, payment_id, receipt_number)
    )]
    pub async fn process_payment(
        &self,
        org_id: &str,
        request: NewPayment,
        collected_by: &str,
    ) -> Result<RecordedPayment, LedgerError> {
        let net = validate_new_payment(&request)?;

        let student = self
            .students
            .find(org_id, &request.student_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Student"))?;

        let status = if request.await_verification {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Completed
        };
        let now = DateTime::now();

        let mut payment = Payment {
            id: Uuid::new_v4().to_string(),
            organization_id: org_id.to_string(),
            student_id: student.id.clone(),
            receipt_number: String::new(),
            amount: request.amount,
            currency: request
                .currency
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            discount: request.discount,
            late_fee: request.late_fee,
            net_amount: net,
            payment_method: request.payment_method,
            payment_for: request.payment_for,
            status,
            payment_date: request.payment_date.unwrap_or(now),
            due_date: request.due_date,
            transaction_id: request.transaction_id,
            collected_by: collected_by.to_string(),
            verified_by: None,
            verified_at: None,
            notes: request.notes,
            refund: None,
            created_at: now,
            updated_at: now,
        };

        self.insert_with_fresh_receipt(&mut payment).await?;

        let span = tracing::Span::current();
        span.record("payment_id", payment.id.as_str());
        span.record("receipt_number", payment.receipt_number.as_str());

        metrics::record_payment(payment.status.as_str());

        if payment.status != PaymentStatus::Completed {
            tracing::info!(
                amount = %payment.amount,
                net_amount = %payment.net_amount,
                "Payment recorded as pending"
            );
            return Ok(RecordedPayment { payment, student });
        }

        let student = self
            .apply_or_reconcile(&payment, BalanceChange::Payment(net), "payment")
            .await?;
        metrics::record_amount(&payment.currency, net.to_f64().unwrap_or_default());

        tracing::info!(
            amount = %payment.amount,
            net_amount = %payment.net_amount,
            total_debt = %student.total_debt,
            "Payment recorded"
        );

        Ok(RecordedPayment { payment, student })
    }

    /// `totalPaid += amount`, `totalDebt = max(0, totalDebt - amount)`.
    pub async fn update_student_financials(
        &self,
        org_id: &str,
        student_id: &str,
        amount: Decimal,
    ) -> Result<StudentAccount, LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::validation("amount must not be negative"));
        }
        self.students
            .apply_balance_change(org_id, student_id, BalanceChange::Payment(amount))
            .await?
            .ok_or_else(|| LedgerError::not_found("Student"))
    }

    #[instrument(skip(self, request), fields(org_id = %org_id, payment_id = %payment_id))]
    pub async fn process_refund(
        &self,
        org_id: &str,
        payment_id: &str,
        request: RefundRequest,
        refunded_by: &str,
    ) -> Result<Payment, LedgerError> {
        let payment = self.load(org_id, payment_id).await?;

        if payment.status != PaymentStatus::Completed {
            metrics::record_refund("rejected");
            return Err(LedgerError::invalid_state(format!(
                "only completed payments can be refunded, payment is {}",
                payment.status
            )));
        }
        if request.amount <= Decimal::ZERO {
            metrics::record_refund("rejected");
            return Err(LedgerError::validation("refund amount must be positive"));
        }
        if request.amount > payment.amount {
            metrics::record_refund("rejected");
            return Err(LedgerError::validation(format!(
                "refund amount {} exceeds payment amount {}",
                request.amount, payment.amount
            )));
        }
        let reason = request.reason.trim();
        if !REFUND_REASON_LEN.contains(&reason.chars().count()) {
            metrics::record_refund("rejected");
            return Err(LedgerError::validation(
                "refund reason must be 3 to 200 characters",
            ));
        }

        let change = StatusChange::Refund(Refund {
            amount: request.amount,
            reason: reason.to_string(),
            refunded_by: refunded_by.to_string(),
            refund_date: DateTime::now(),
        });
        let refunded = self
            .payments
            .transition(org_id, payment_id, &change)
            .await?
            .ok_or_else(|| {
                metrics::record_refund("rejected");
                LedgerError::invalid_state("payment was refunded or changed concurrently")
            })?;

        self.apply_or_reconcile(&refunded, BalanceChange::Refund(request.amount), "refund")
            .await?;

        metrics::record_refund("processed");
        tracing::info!(refund_amount = %request.amount, "Refund processed");

        Ok(refunded)
    }

    #[instrument(skip(self), fields(org_id = %org_id, payment_id = %payment_id))]
    pub async fn verify_payment(
        &self,
        org_id: &str,
        payment_id: &str,
        verified_by: &str,
    ) -> Result<Payment, LedgerError> {
        let payment = self.load(org_id, payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(LedgerError::invalid_state(format!(
                "only pending payments can be verified, payment is {}",
                payment.status
            )));
        }

        let change = StatusChange::Verify {
            verified_by: verified_by.to_string(),
            at: DateTime::now(),
        };
        let verified = self
            .payments
            .transition(org_id, payment_id, &change)
            .await?
            .ok_or_else(|| {
                LedgerError::invalid_state("payment was verified or changed concurrently")
            })?;

        self.apply_or_reconcile(
            &verified,
            BalanceChange::Payment(verified.net_amount),
            "verify",
        )
        .await?;

        metrics::record_payment(verified.status.as_str());
        metrics::record_amount(
            &verified.currency,
            verified.net_amount.to_f64().unwrap_or_default(),
        );
        tracing::info!(net_amount = %verified.net_amount, "Payment verified");

        Ok(verified)
    }

    pub async fn get_payment_statistics(
        &self,
        org_id: &str,
        range: DateRange,
    ) -> Result<PaymentStatistics, LedgerError> {
        if let (Some(start), Some(end)) = (range.start, range.end) {
            if start > end {
                return Err(LedgerError::validation("startDate must not be after endDate"));
            }
        }
        Ok(self.payments.statistics(org_id, range).await?)
    }

    #[instrument(skip(self, update), fields(org_id = %org_id, payment_id = %payment_id))]
    pub async fn update_payment(
        &self,
        org_id: &str,
        payment_id: &str,
        update: PaymentUpdate,
    ) -> Result<Payment, LedgerError> {
        if update.notes.is_none() && update.status.is_none() {
            return Err(LedgerError::validation("nothing to update"));
        }
        if let Some(notes) = &update.notes {
            validate_notes(notes)?;
        }

        let mut payment = self.load(org_id, payment_id).await?;

        if let Some(next) = update.status.filter(|s| *s != payment.status) {
            if !payment.status.can_transition_to(next) {
                return Err(LedgerError::invalid_state(format!(
                    "cannot move payment from {} to {}",
                    payment.status, next
                )));
            }
            match next {
                PaymentStatus::Failed => {
                    payment = self
                        .payments
                        .transition(org_id, payment_id, &StatusChange::Fail)
                        .await?
                        .ok_or_else(|| {
                            LedgerError::invalid_state("payment changed concurrently")
                        })?;
                    metrics::record_payment(PaymentStatus::Failed.as_str());
                }
                PaymentStatus::Completed => {
                    return Err(LedgerError::invalid_state(
                        "pending payments are completed through verification",
                    ));
                }
                _ => {
                    return Err(LedgerError::invalid_state(
                        "payments are refunded through the refund operation",
                    ));
                }
            }
        }

        if let Some(notes) = update.notes {
            payment = self
                .payments
                .set_notes(org_id, payment_id, &notes)
                .await?
                .ok_or_else(|| LedgerError::not_found("Payment"))?;
        }

        tracing::info!(status = %payment.status, "Payment updated");
        Ok(payment)
    }

    #[instrument(skip(self), fields(org_id = %org_id, payment_id = %payment_id))]
    pub async fn delete_payment(&self, org_id: &str, payment_id: &str) -> Result<(), LedgerError> {
        let payment = self.load(org_id, payment_id).await?;
        if payment.status.is_settled() {
            return Err(LedgerError::invalid_state(format!(
                "{} payments cannot be deleted",
                payment.status
            )));
        }

        if !self.payments.delete_unsettled(org_id, payment_id).await? {
            return Err(LedgerError::invalid_state("payment changed concurrently"));
        }

        tracing::info!(receipt_number = %payment.receipt_number, "Payment deleted");
        Ok(())
    }

    pub async fn list_payments(
        &self,
        org_id: &str,
        mut filter: PaymentFilter,
        page: Page,
        viewer: &Viewer,
    ) -> Result<Paginated<Payment>, LedgerError> {
        if let Viewer::Student { user_id } = viewer {
            let own = self.own_account(org_id, user_id).await?;
            filter.student_id = Some(own.id);
        }
        Ok(self.payments.list(org_id, &filter, page).await?)
    }

    pub async fn find_payment(
        &self,
        org_id: &str,
        payment_id: &str,
        viewer: &Viewer,
    ) -> Result<Payment, LedgerError> {
        let payment = self.load(org_id, payment_id).await?;
        if let Viewer::Student { user_id } = viewer {
            let own = self.own_account(org_id, user_id).await?;
            if own.id != payment.student_id {
                return Err(LedgerError::not_found("Payment"));
            }
        }
        Ok(payment)
    }

    pub async fn payment_history(
        &self,
        org_id: &str,
        student_id: &str,
        mut filter: PaymentFilter,
        page: Page,
    ) -> Result<Paginated<Payment>, LedgerError> {
        self.students
            .find(org_id, student_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Student"))?;

        filter.student_id = Some(student_id.to_string());
        Ok(self.payments.list(org_id, &filter, page).await?)
    }

    /// Payments dated on the UTC day containing `now`.
    pub async fn today_summary(
        &self,
        org_id: &str,
        now: ChronoDateTime<Utc>,
    ) -> Result<TodaySummary, LedgerError> {
        let filter = PaymentFilter {
            date_range: day_range(now),
            ..Default::default()
        };
        let payments = self.payments.find_all(org_id, &filter).await?;
        Ok(TodaySummary::from_payments(&payments))
    }

    pub async fn pending_payments(&self, org_id: &str) -> Result<Vec<Payment>, LedgerError> {
        let filter = PaymentFilter {
            status: Some(PaymentStatus::Pending),
            ..Default::default()
        };
        Ok(self.payments.find_all(org_id, &filter).await?)
    }

    pub async fn receipt(
        &self,
        org_id: &str,
        payment_id: &str,
        viewer: &Viewer,
    ) -> Result<PaymentReceipt, LedgerError> {
        let payment = self.find_payment(org_id, payment_id, viewer).await?;
        let student = self
            .students
            .find(org_id, &payment.student_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Student"))?;
        let organization = self.organizations.find(org_id).await?;

        Ok(PaymentReceipt {
            payment,
            student,
            organization,
        })
    }

    pub async fn assess_late_fee(
        &self,
        org_id: &str,
        student_id: &str,
        days_late: i32,
    ) -> Result<LateFee, LedgerError> {
        if days_late < 0 {
            return Err(LedgerError::validation("daysLate must not be negative"));
        }
        self.students
            .find(org_id, student_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Student"))?;
        let organization = self
            .organizations
            .find(org_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Organization"))?;

        Ok(organization.financial_settings.assess_late_fee(days_late))
    }

    /// Most overdue first. Students who never paid are not listed.
    #[instrument(skip(self, now), fields(org_id = %org_id))]
    pub async fn overdue_accounts(
        &self,
        org_id: &str,
        now: ChronoDateTime<Utc>,
    ) -> Result<Vec<OverdueAccount>, LedgerError> {
        let students = self.students.find_indebted(org_id).await?;
        let last_payments = futures::future::try_join_all(
            students
                .iter()
                .map(|s| self.payments.last_completed(org_id, &s.id)),
        )
        .await?;

        let mut overdue: Vec<OverdueAccount> = students
            .into_iter()
            .zip(last_payments)
            .filter_map(|(student, last)| {
                let last = last?;
                let days_overdue = (now - last.payment_date.to_chrono()).num_days();
                (days_overdue > OVERDUE_AFTER_DAYS).then_some(OverdueAccount {
                    student,
                    last_payment_date: last.payment_date,
                    days_overdue,
                })
            })
            .collect();
        overdue.sort_by(|a, b| {
            b.days_overdue
                .cmp(&a.days_overdue)
                .then_with(|| a.student.id.cmp(&b.student.id))
        });

        tracing::debug!(count = overdue.len(), "Overdue accounts computed");
        Ok(overdue)
    }

    async fn load(&self, org_id: &str, payment_id: &str) -> Result<Payment, LedgerError> {
        self.payments
            .find(org_id, payment_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Payment"))
    }

    async fn own_account(&self, org_id: &str, user_id: &str) -> Result<StudentAccount, LedgerError> {
        self.students
            .find_by_user(org_id, user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Student"))
    }

    async fn insert_with_fresh_receipt(&self, payment: &mut Payment) -> Result<(), LedgerError> {
        for attempt in 1..=MAX_RECEIPT_ATTEMPTS {
            payment.receipt_number = self.receipts.next_receipt_number();
            match self.payments.insert(payment).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Duplicate(key)) => {
                    tracing::warn!(attempt, key = %key, "Receipt number collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerError::Conflict(format!(
            "no unused receipt number after {} attempts",
            MAX_RECEIPT_ATTEMPTS
        )))
    }

    /// Applies a balance change for a payment that is already persisted.
    async fn apply_or_reconcile(
        &self,
        payment: &Payment,
        change: BalanceChange,
        operation: &'static str,
    ) -> Result<StudentAccount, LedgerError> {
        let outcome = self
            .students
            .apply_balance_change(&payment.organization_id, &payment.student_id, change)
            .await;

        let source = match outcome {
            Ok(Some(student)) => return Ok(student),
            Ok(None) => StoreError::Unavailable(format!(
                "student {} no longer exists",
                payment.student_id
            )),
            Err(e) => e,
        };

        metrics::record_reconciliation_required(operation);
        tracing::error!(
            event = "reconciliation_required",
            operation,
            org_id = %payment.organization_id,
            payment_id = %payment.id,
            receipt_number = %payment.receipt_number,
            student_id = %payment.student_id,
            amount = %change.amount(),
            error = %source,
            "Payment persisted but student balance update failed"
        );

        Err(LedgerError::Dependency {
            payment_id: payment.id.clone(),
            receipt_number: payment.receipt_number.clone(),
            source,
        })
    }
}

/// Returns the net amount once every input check has passed.
fn validate_new_payment(request: &NewPayment) -> Result<Decimal, LedgerError> {
    if request.student_id.trim().is_empty() {
        return Err(LedgerError::validation("studentId is required"));
    }
    if request.amount <= Decimal::ZERO {
        return Err(LedgerError::validation("amount must be positive"));
    }
    if request.discount.amount < Decimal::ZERO {
        return Err(LedgerError::validation("discount amount must not be negative"));
    }
    if request.discount.percentage < Decimal::ZERO
        || request.discount.percentage > Decimal::ONE_HUNDRED
    {
        return Err(LedgerError::validation(
            "discount percentage must be between 0 and 100",
        ));
    }
    if request.late_fee.amount < Decimal::ZERO {
        return Err(LedgerError::validation("late fee amount must not be negative"));
    }
    if request.late_fee.days_late < 0 {
        return Err(LedgerError::validation("late fee days must not be negative"));
    }
    if request.amount > MAX_MONEY
        || request.discount.amount > MAX_MONEY
        || request.late_fee.amount > MAX_MONEY
    {
        return Err(LedgerError::validation("amount is out of range"));
    }
    let net = net_amount(request.amount, &request.discount, &request.late_fee)
        .ok_or_else(|| LedgerError::validation("amount is out of range"))?;
    if net < Decimal::ZERO {
        return Err(LedgerError::validation(
            "discount exceeds amount plus late fee",
        ));
    }
    if let Some(notes) = &request.notes {
        validate_notes(notes)?;
    }
    Ok(net)
}

fn validate_notes(notes: &str) -> Result<(), LedgerError> {
    if notes.chars().count() > MAX_NOTES_LEN {
        return Err(LedgerError::validation("notes must be at most 500 characters"));
    }
    Ok(())
}

/// `[00:00:00.000, 23:59:59.999]` of the UTC day containing `now`.
pub fn day_range(now: ChronoDateTime<Utc>) -> DateRange {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let end = start + Duration::days(1) - Duration::milliseconds(1);
    DateRange {
        start: Some(DateTime::from_chrono(start)),
        end: Some(DateTime::from_chrono(end)),
    }
}
