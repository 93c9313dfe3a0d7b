use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::{Validate, ValidationError};

use crate::models::{
    Discount, LateFee, Organization, Payment, PaymentFor, PaymentMethod, PaymentStatistics,
    PaymentStatus, Refund, StudentAccount, TodaySummary, MAX_MONEY,
};
use crate::services::{
    DateRange, NewPayment, OverdueAccount, Page, Paginated, PaymentFilter, PaymentReceipt,
    PaymentUpdate, RefundRequest,
};

fn within_limit(value: &Decimal) -> Result<(), ValidationError> {
    if *value > MAX_MONEY {
        return Err(ValidationError::new("amount_too_large")
            .with_message("Amount cannot exceed 1000000000000000".into()));
    }
    Ok(())
}

fn positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::new(1, 2) {
        return Err(ValidationError::new("amount_too_small")
            .with_message("Amount must be at least 0.01".into()));
    }
    within_limit(value)
}

fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("negative_amount")
            .with_message("Amount cannot be negative".into()));
    }
    within_limit(value)
}

fn percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("percentage_out_of_range")
            .with_message("Percentage must be between 0 and 100".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DiscountInput {
    #[serde(default)]
    #[validate(custom(function = "non_negative"))]
    pub amount: Decimal,
    #[serde(default)]
    #[validate(custom(function = "percentage"))]
    pub percentage: Decimal,
    #[validate(length(max = 200, message = "Discount reason cannot exceed 200 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LateFeeInput {
    #[serde(default)]
    #[validate(custom(function = "non_negative"))]
    pub amount: Decimal,
    #[serde(default)]
    #[validate(range(min = 0, message = "Days late cannot be negative"))]
    pub days_late: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1, message = "Student ID is required"))]
    pub student_id: String,
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_for: PaymentFor,
    #[validate(nested)]
    pub discount: Option<DiscountInput>,
    #[validate(nested)]
    pub late_fee: Option<LateFeeInput>,
    pub payment_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
    /// `pending` to record without touching the balance until verified.
    pub status: Option<PaymentStatus>,
}

impl CreatePaymentRequest {
    pub fn into_new_payment(self) -> Result<NewPayment, AppError> {
        let await_verification = match self.status {
            None | Some(PaymentStatus::Completed) => false,
            Some(PaymentStatus::Pending) => true,
            Some(other) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "New payments may only be pending or completed, not {}",
                    other
                )))
            }
        };

        let discount = self.discount.unwrap_or_default();
        let late_fee = self.late_fee.unwrap_or_default();

        Ok(NewPayment {
            student_id: self.student_id,
            amount: self.amount,
            currency: self.currency,
            discount: Discount {
                amount: discount.amount,
                percentage: discount.percentage,
                reason: discount.reason,
            },
            late_fee: LateFee {
                amount: late_fee.amount,
                days_late: late_fee.days_late,
            },
            payment_method: self.payment_method,
            payment_for: self.payment_for,
            payment_date: self.payment_date.map(BsonDateTime::from_chrono),
            due_date: self.due_date.map(BsonDateTime::from_chrono),
            transaction_id: self.transaction_id,
            notes: self.notes,
            await_verification,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefundPaymentRequest {
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    #[validate(length(min = 3, max = 200, message = "Reason must be 3 to 200 characters"))]
    pub reason: String,
}

impl From<RefundPaymentRequest> for RefundRequest {
    fn from(req: RefundPaymentRequest) -> Self {
        RefundRequest {
            amount: req.amount,
            reason: req.reason,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePaymentRequest {
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
    pub status: Option<PaymentStatus>,
}

impl From<UpdatePaymentRequest> for PaymentUpdate {
    fn from(req: UpdatePaymentRequest) -> Self {
        PaymentUpdate {
            notes: req.notes,
            status: req.status,
        }
    }
}

/// Accepts `YYYY-MM-DD` or RFC 3339. A bare date used as an upper bound means
/// the end of that day.
pub fn parse_date_bound(value: &str, end_of_day: bool) -> Result<BsonDateTime, AppError> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(BsonDateTime::from_chrono(at.with_timezone(&Utc)));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(anyhow::anyhow!(
            "Invalid date '{}', expected YYYY-MM-DD or RFC 3339",
            value
        ))
    })?;

    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
    } else {
        NaiveTime::MIN
    };
    Ok(BsonDateTime::from_chrono(date.and_time(time).and_utc()))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl DateRangeQuery {
    pub fn to_range(&self) -> Result<DateRange, AppError> {
        Ok(DateRange {
            start: self
                .start_date
                .as_deref()
                .map(|s| parse_date_bound(s, false))
                .transpose()?,
            end: self
                .end_date
                .as_deref()
                .map(|s| parse_date_bound(s, true))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPaymentsQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub student_id: Option<String>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ListPaymentsQuery {
    pub fn page(&self) -> Page {
        Page::new(self.page, self.limit)
    }

    pub fn filter(&self) -> Result<PaymentFilter, AppError> {
        let range = DateRangeQuery {
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
        }
        .to_range()?;

        Ok(PaymentFilter {
            status: self.status,
            payment_method: self.payment_method,
            student_id: self.student_id.clone().filter(|s| !s.is_empty()),
            date_range: range,
            receipt_search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LateFeeQuery {
    pub days_late: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub amount: Decimal,
    pub reason: String,
    pub refunded_by: String,
    pub refund_date: DateTime<Utc>,
}

impl From<Refund> for RefundResponse {
    fn from(r: Refund) -> Self {
        Self {
            amount: r.amount,
            reason: r.reason,
            refunded_by: r.refunded_by,
            refund_date: r.refund_date.to_chrono(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: String,
    pub organization_id: String,
    pub student_id: String,
    pub receipt_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub discount: Discount,
    pub late_fee: LateFee,
    pub net_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_for: PaymentFor,
    pub status: PaymentStatus,
    pub payment_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub collected_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            organization_id: p.organization_id,
            student_id: p.student_id,
            receipt_number: p.receipt_number,
            amount: p.amount,
            currency: p.currency,
            discount: p.discount,
            late_fee: p.late_fee,
            net_amount: p.net_amount,
            payment_method: p.payment_method,
            payment_for: p.payment_for,
            status: p.status,
            payment_date: p.payment_date.to_chrono(),
            due_date: p.due_date.map(|d| d.to_chrono()),
            transaction_id: p.transaction_id,
            collected_by: p.collected_by,
            verified_by: p.verified_by,
            verified_at: p.verified_at.map(|d| d.to_chrono()),
            notes: p.notes,
            refund: p.refund.map(RefundResponse::from),
            created_at: p.created_at.to_chrono(),
            updated_at: p.updated_at.to_chrono(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentListResponse {
    pub data: Vec<PaymentResponse>,
    pub pagination: Pagination,
}

impl From<Paginated<Payment>> for PaymentListResponse {
    fn from(page: Paginated<Payment>) -> Self {
        let pagination = Pagination {
            page: page.page.page,
            limit: page.page.limit,
            total: page.total,
            pages: page.pages(),
        };
        Self {
            data: page.items.into_iter().map(PaymentResponse::from).collect(),
            pagination,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingPaymentsResponse {
    pub data: Vec<PaymentResponse>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayPaymentsResponse {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub summary: TodaySummary,
}

pub type StatisticsResponse = PaymentStatistics;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LateFeeResponse {
    pub student_id: String,
    pub amount: Decimal,
    pub days_late: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueStudent {
    pub id: String,
    pub name: String,
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueAccountResponse {
    pub student: OverdueStudent,
    pub debt: Decimal,
    pub last_payment_date: DateTime<Utc>,
    pub days_overdue: i64,
}

impl From<OverdueAccount> for OverdueAccountResponse {
    fn from(o: OverdueAccount) -> Self {
        Self {
            student: OverdueStudent {
                name: o.student.full_name(),
                id: o.student.id,
                student_id: o.student.student_id,
                phone: o.student.phone,
            },
            debt: o.student.total_debt,
            last_payment_date: o.last_payment_date.to_chrono(),
            days_overdue: o.days_overdue,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueReportResponse {
    pub count: usize,
    pub total_debt: Decimal,
    pub overdue_payments: Vec<OverdueAccountResponse>,
}

impl From<Vec<OverdueAccount>> for OverdueReportResponse {
    fn from(accounts: Vec<OverdueAccount>) -> Self {
        let overdue_payments: Vec<OverdueAccountResponse> =
            accounts.into_iter().map(OverdueAccountResponse::from).collect();
        let total_debt = overdue_payments
            .iter()
            .fold(Decimal::ZERO, |sum, o| sum.saturating_add(o.debt));
        Self {
            count: overdue_payments.len(),
            total_debt,
            overdue_payments,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptOrganization {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl From<Organization> for ReceiptOrganization {
    fn from(org: Organization) -> Self {
        let a = org.address;
        let parts: Vec<String> = [a.street, a.city, a.region, a.country, a.postal_code]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            name: org.name,
            address: (!parts.is_empty()).then(|| parts.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptStudent {
    pub name: String,
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl From<StudentAccount> for ReceiptStudent {
    fn from(s: StudentAccount) -> Self {
        Self {
            name: s.full_name(),
            student_id: s.student_id,
            phone: s.phone,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptAmounts {
    pub amount: Decimal,
    pub discount: Decimal,
    pub late_fee: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub receipt_number: String,
    pub date: DateTime<Utc>,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<ReceiptOrganization>,
    pub student: ReceiptStudent,
    pub payment: ReceiptAmounts,
    pub collected_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundResponse>,
}

impl From<PaymentReceipt> for ReceiptResponse {
    fn from(r: PaymentReceipt) -> Self {
        let p = r.payment;
        Self {
            receipt_number: p.receipt_number,
            date: p.payment_date.to_chrono(),
            status: p.status,
            organization: r.organization.map(ReceiptOrganization::from),
            student: ReceiptStudent::from(r.student),
            payment: ReceiptAmounts {
                amount: p.amount,
                discount: p.discount.amount,
                late_fee: p.late_fee.amount,
                net_amount: p.net_amount,
                currency: p.currency,
                method: p.payment_method,
                description: p.payment_for.description,
                group_id: p.payment_for.group_id,
            },
            collected_by: p.collected_by,
            refund: p.refund.map(RefundResponse::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn create_request_validates_amounts() {
        let req: CreatePaymentRequest = serde_json::from_value(json!({
            "studentId": "s-1",
            "amount": 0.001,
            "paymentMethod": "cash",
            "paymentFor": { "type": "tuition" },
            "discount": { "amount": 10, "percentage": 120 }
        }))
        .unwrap();

        let errors = req.validate().unwrap_err();
        let fields = errors.errors();
        assert!(fields.contains_key("amount"));
        assert!(fields.contains_key("discount"));
    }

    #[test]
    fn create_request_caps_money_fields() {
        let req: CreatePaymentRequest = serde_json::from_value(json!({
            "studentId": "s-1",
            "amount": 7.0e28,
            "paymentMethod": "cash",
            "paymentFor": { "type": "tuition" },
            "lateFee": { "amount": 7.0e28 }
        }))
        .unwrap();

        let errors = req.validate().unwrap_err();
        let fields = errors.errors();
        assert!(fields.contains_key("amount"));
        assert!(fields.contains_key("late_fee"));
    }

    #[test]
    fn create_request_maps_pending_status() {
        let req: CreatePaymentRequest = serde_json::from_value(json!({
            "studentId": "s-1",
            "amount": 1000,
            "paymentMethod": "payme",
            "paymentFor": { "type": "tuition", "month": "2024-01" },
            "status": "pending"
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let new_payment = req.into_new_payment().unwrap();
        assert!(new_payment.await_verification);
        assert_eq!(new_payment.amount, dec!(1000));
        assert_eq!(new_payment.discount, Discount::default());
    }

    #[test]
    fn create_request_rejects_terminal_status() {
        let req: CreatePaymentRequest = serde_json::from_value(json!({
            "studentId": "s-1",
            "amount": 1000,
            "paymentMethod": "cash",
            "paymentFor": { "type": "exam" },
            "status": "refunded"
        }))
        .unwrap();
        assert!(req.into_new_payment().is_err());
    }

    #[test]
    fn refund_reason_length_is_checked() {
        let req = RefundPaymentRequest {
            amount: dec!(10),
            reason: "no".to_string(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn bare_end_date_covers_the_whole_day() {
        let start = parse_date_bound("2024-01-31", false).unwrap();
        let end = parse_date_bound("2024-01-31", true).unwrap();
        assert_eq!(end.timestamp_millis() - start.timestamp_millis(), 86_399_999);

        let exact = parse_date_bound("2024-01-31T10:00:00Z", true).unwrap();
        assert_eq!(exact.timestamp_millis() - start.timestamp_millis(), 36_000_000);

        assert!(parse_date_bound("31/01/2024", false).is_err());
    }

    #[test]
    fn list_query_builds_filter() {
        let query = ListPaymentsQuery {
            search: Some("  rcp-2024 ".to_string()),
            status: Some(PaymentStatus::Completed),
            limit: Some(1000),
            ..Default::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.receipt_search.as_deref(), Some("rcp-2024"));
        assert_eq!(filter.status, Some(PaymentStatus::Completed));
        assert_eq!(query.page().limit, 100);
    }
}
