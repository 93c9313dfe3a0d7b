//! Payment record and its status lifecycle.
//!
//! Stored field names are camelCase so documents written by the existing CRM
//! (`receiptNumber`, `netAmount`, `discount.amount`, ...) stay readable.

use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Payme,
    Click,
    Uzum,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Payme => "payme",
            Self::Click => "click",
            Self::Uzum => "uzum",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Allowed moves: pending -> completed | failed, completed -> refunded.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Completed, Self::Refunded)
        )
    }

    /// Settled payments have moved money and may never be deleted.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Refunded)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the payment is for (`paymentFor.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPurpose {
    Tuition,
    Registration,
    Materials,
    Exam,
    Certificate,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFor {
    #[serde(rename = "type")]
    pub kind: PaymentPurpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    #[serde(default)]
    pub amount: Decimal,
    #[serde(default)]
    pub percentage: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LateFee {
    #[serde(default)]
    pub amount: Decimal,
    #[serde(default)]
    pub days_late: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub amount: Decimal,
    pub reason: String,
    pub refunded_by: String,
    pub refund_date: DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(rename = "_id")]
    pub id: String,
    pub organization_id: String,
    pub student_id: String,
    pub receipt_number: String,

    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub discount: Discount,
    #[serde(default)]
    pub late_fee: LateFee,
    pub net_amount: Decimal,

    pub payment_method: PaymentMethod,
    pub payment_for: PaymentFor,
    pub status: PaymentStatus,

    pub payment_date: DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    pub collected_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund: Option<Refund>,

    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// Largest money value accepted on input: 10^15.
pub const MAX_MONEY: Decimal = Decimal::from_parts(0xA4C6_8000, 0x0003_8D7E, 0, false, 0);

/// `amount - discount.amount + lateFee.amount`, or `None` on overflow.
pub fn net_amount(amount: Decimal, discount: &Discount, late_fee: &LateFee) -> Option<Decimal> {
    amount
        .checked_sub(discount.amount)?
        .checked_add(late_fee.amount)
}

/// A conditional status move applied by the store only while the payment is
/// still in the expected source status.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Verify { verified_by: String, at: DateTime },
    Refund(Refund),
    Fail,
}

impl StatusChange {
    pub fn from_status(&self) -> PaymentStatus {
        match self {
            Self::Verify { .. } | Self::Fail => PaymentStatus::Pending,
            Self::Refund(_) => PaymentStatus::Completed,
        }
    }

    pub fn to_status(&self) -> PaymentStatus {
        match self {
            Self::Verify { .. } => PaymentStatus::Completed,
            Self::Refund(_) => PaymentStatus::Refunded,
            Self::Fail => PaymentStatus::Failed,
        }
    }

    /// Applies the change to an in-memory copy. Callers check the source status.
    pub fn apply(&self, payment: &mut Payment, now: DateTime) {
        payment.status = self.to_status();
        payment.updated_at = now;
        match self {
            Self::Verify { verified_by, at } => {
                payment.verified_by = Some(verified_by.clone());
                payment.verified_at = Some(*at);
            }
            Self::Refund(refund) => payment.refund = Some(refund.clone()),
            Self::Fail => {}
        }
    }
}
