//! Storage seams for the ledger.
//!
//! Every call is scoped to an organization. Balance changes and status moves
//! are single atomic writes in each implementation.

use async_trait::async_trait;
use mongodb::bson::DateTime;

use super::error::StoreError;
use crate::models::{
    BalanceChange, Organization, Payment, PaymentMethod, PaymentStatistics, PaymentStatus,
    StatusChange, StudentAccount,
};

pub const DEFAULT_PAGE_LIMIT: u64 = 10;
pub const MAX_PAGE_LIMIT: u64 = 100;
/// Keeps `skip` inside the range the driver can encode.
pub const MAX_PAGE: u64 = 1_000_000;

/// Inclusive `paymentDate` bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateRange {
    pub start: Option<DateTime>,
    pub end: Option<DateTime>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub student_id: Option<String>,
    pub date_range: DateRange,
    /// Case-insensitive substring of the receipt number.
    pub receipt_search: Option<String>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.status.map_or(true, |s| payment.status == s)
            && self.payment_method.map_or(true, |m| payment.payment_method == m)
            && self
                .student_id
                .as_deref()
                .map_or(true, |id| payment.student_id == id)
            && self.date_range.contains(payment.payment_date)
            && self.receipt_search.as_deref().map_or(true, |q| {
                payment
                    .receipt_number
                    .to_lowercase()
                    .contains(&q.to_lowercase())
            })
    }
}

/// 1-based page request. Use [`Page::new`] to clamp caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

impl Page {
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: Page,
}

impl<T> Paginated<T> {
    pub fn pages(&self) -> u64 {
        self.total.div_ceil(self.page.limit)
    }
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] when the receipt number is taken.
    async fn insert(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn find(&self, org_id: &str, id: &str) -> Result<Option<Payment>, StoreError>;

    /// Newest `paymentDate` first.
    async fn list(
        &self,
        org_id: &str,
        filter: &PaymentFilter,
        page: Page,
    ) -> Result<Paginated<Payment>, StoreError>;

    /// All matches, newest first.
    async fn find_all(
        &self,
        org_id: &str,
        filter: &PaymentFilter,
    ) -> Result<Vec<Payment>, StoreError>;

    /// Applies `change` only while the payment is still in
    /// `change.from_status()`. `None` means it is missing or has moved on.
    async fn transition(
        &self,
        org_id: &str,
        id: &str,
        change: &StatusChange,
    ) -> Result<Option<Payment>, StoreError>;

    async fn set_notes(
        &self,
        org_id: &str,
        id: &str,
        notes: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Deletes only a pending or failed payment. Returns whether one was removed.
    async fn delete_unsettled(&self, org_id: &str, id: &str) -> Result<bool, StoreError>;

    /// The student's completed payment with the latest `paymentDate`.
    async fn last_completed(
        &self,
        org_id: &str,
        student_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Aggregates completed payments dated within `range`.
    async fn statistics(
        &self,
        org_id: &str,
        range: DateRange,
    ) -> Result<PaymentStatistics, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StudentAccountRepository: Send + Sync {
    async fn find(&self, org_id: &str, id: &str) -> Result<Option<StudentAccount>, StoreError>;

    async fn find_by_user(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<StudentAccount>, StoreError>;

    /// Students with `totalDebt > 0`.
    async fn find_indebted(&self, org_id: &str) -> Result<Vec<StudentAccount>, StoreError>;

    /// One atomic write against the student document. `None` if it does not exist.
    async fn apply_balance_change(
        &self,
        org_id: &str,
        id: &str,
        change: BalanceChange,
    ) -> Result<Option<StudentAccount>, StoreError>;
}

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn find(&self, org_id: &str) -> Result<Option<Organization>, StoreError>;
}
