//! MongoDB-backed repositories.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Collection, Database, IndexModel};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::error::StoreError;
use super::repository::{
    DateRange, OrganizationRepository, Page, Paginated, PaymentFilter, PaymentRepository,
    StudentAccountRepository,
};
use crate::models::{
    average, BalanceChange, MethodBreakdown, Organization, Payment, PaymentMethod,
    PaymentStatistics, PaymentStatus, StatisticsSummary, StatusChange, StudentAccount,
};

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::BulkWrite(e) => e
            .write_errors
            .as_ref()
            .is_some_and(|errs| errs.iter().any(|w| w.code == DUPLICATE_KEY)),
        _ => false,
    }
}

fn to_f64(amount: Decimal) -> Result<f64, StoreError> {
    amount
        .to_f64()
        .ok_or_else(|| StoreError::Serialization(format!("amount {} is not representable", amount)))
}

fn status_bson(status: PaymentStatus) -> Bson {
    Bson::String(status.as_str().to_string())
}

/// Escapes regex metacharacters so receipt searches match literally.
fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn date_bounds(range: &DateRange) -> Option<Document> {
    let mut bounds = Document::new();
    if let Some(start) = range.start {
        bounds.insert("$gte", start);
    }
    if let Some(end) = range.end {
        bounds.insert("$lte", end);
    }
    (!bounds.is_empty()).then_some(bounds)
}

fn payment_query(org_id: &str, filter: &PaymentFilter) -> Document {
    let mut query = doc! { "organizationId": org_id };
    if let Some(status) = filter.status {
        query.insert("status", status_bson(status));
    }
    if let Some(method) = filter.payment_method {
        query.insert("paymentMethod", method.as_str());
    }
    if let Some(student_id) = &filter.student_id {
        query.insert("studentId", student_id.as_str());
    }
    if let Some(bounds) = date_bounds(&filter.date_range) {
        query.insert("paymentDate", bounds);
    }
    if let Some(search) = filter.receipt_search.as_deref().filter(|s| !s.is_empty()) {
        query.insert(
            "receiptNumber",
            doc! { "$regex": escape_regex(search), "$options": "i" },
        );
    }
    query
}

fn status_update(change: &StatusChange, now: DateTime) -> Result<Document, StoreError> {
    let mut set = doc! {
        "status": status_bson(change.to_status()),
        "updatedAt": now,
    };
    match change {
        StatusChange::Verify { verified_by, at } => {
            set.insert("verifiedBy", verified_by.as_str());
            set.insert("verifiedAt", *at);
        }
        StatusChange::Refund(refund) => {
            set.insert("refund", bson::to_bson(refund)?);
        }
        StatusChange::Fail => {}
    }
    Ok(doc! { "$set": set })
}

/// Update pipeline that adjusts both totals in one server-side write.
fn balance_pipeline(change: BalanceChange, now: DateTime) -> Result<Vec<Document>, StoreError> {
    let amount = to_f64(change.amount())?;
    let paid = doc! { "$ifNull": ["$totalPaid", 0] };
    let debt = doc! { "$ifNull": ["$totalDebt", 0] };

    let set = match change {
        BalanceChange::Payment(_) => doc! {
            "totalPaid": { "$round": [{ "$add": [paid, amount] }, 2] },
            "totalDebt": { "$max": [0, { "$round": [{ "$subtract": [debt, amount] }, 2] }] },
            "updatedAt": now,
        },
        BalanceChange::Refund(_) => doc! {
            "totalPaid": { "$round": [{ "$subtract": [paid, amount] }, 2] },
            "totalDebt": { "$round": [{ "$add": [debt, amount] }, 2] },
            "updatedAt": now,
        },
    };
    Ok(vec![doc! { "$set": set }])
}

fn money(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRow {
    #[serde(default)]
    total_amount: f64,
    #[serde(default)]
    total_discount: f64,
    #[serde(default)]
    total_late_fee: f64,
    #[serde(default)]
    total_payments: i64,
}

#[derive(Deserialize)]
struct MethodRow {
    #[serde(rename = "_id")]
    method: PaymentMethod,
    count: i64,
    amount: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsFacet {
    #[serde(default)]
    summary: Vec<SummaryRow>,
    #[serde(default)]
    by_method: Vec<MethodRow>,
}

#[derive(Clone)]
pub struct MongoLedgerStore {
    db: Database,
    payments: Collection<Payment>,
    students: Collection<StudentAccount>,
    organizations: Collection<Organization>,
}

impl MongoLedgerStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            payments: db.collection("payments"),
            students: db.collection("students"),
            organizations: db.collection("organizations"),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), StoreError> {
        let receipt_index = IndexModel::builder()
            .keys(doc! { "receiptNumber": 1 })
            .options(
                IndexOptions::builder()
                    .name("receipt_number_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let org_date_index = IndexModel::builder()
            .keys(doc! { "organizationId": 1, "paymentDate": -1 })
            .options(
                IndexOptions::builder()
                    .name("org_payment_date_idx".to_string())
                    .build(),
            )
            .build();

        let org_student_index = IndexModel::builder()
            .keys(doc! { "organizationId": 1, "studentId": 1, "paymentDate": -1 })
            .options(
                IndexOptions::builder()
                    .name("org_student_payment_idx".to_string())
                    .build(),
            )
            .build();

        let org_status_index = IndexModel::builder()
            .keys(doc! { "organizationId": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("org_status_idx".to_string())
                    .build(),
            )
            .build();

        self.payments
            .create_indexes(
                [
                    receipt_index,
                    org_date_index,
                    org_student_index,
                    org_status_index,
                ],
                None,
            )
            .await?;

        let student_user_index = IndexModel::builder()
            .keys(doc! { "organizationId": 1, "userId": 1 })
            .options(
                IndexOptions::builder()
                    .name("org_user_student_idx".to_string())
                    .build(),
            )
            .build();

        self.students
            .create_indexes([student_user_index], None)
            .await?;

        tracing::info!("Ledger indexes initialized");
        Ok(())
    }

    fn return_after() -> FindOneAndUpdateOptions {
        FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build()
    }
}

#[async_trait]
impl PaymentRepository for MongoLedgerStore {
    async fn insert(&self, payment: &Payment) -> Result<(), StoreError> {
        match self.payments.insert_one(payment, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Duplicate(format!(
                "receiptNumber {}",
                payment.receipt_number
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, org_id: &str, id: &str) -> Result<Option<Payment>, StoreError> {
        let filter = doc! { "_id": id, "organizationId": org_id };
        Ok(self.payments.find_one(filter, None).await?)
    }

    async fn list(
        &self,
        org_id: &str,
        filter: &PaymentFilter,
        page: Page,
    ) -> Result<Paginated<Payment>, StoreError> {
        let query = payment_query(org_id, filter);
        let total = self.payments.count_documents(query.clone(), None).await?;

        let options = FindOptions::builder()
            .sort(doc! { "paymentDate": -1 })
            .skip(page.skip())
            .limit(page.limit as i64)
            .build();

        let cursor = self.payments.find(query, options).await?;
        let items: Vec<Payment> = cursor.try_collect().await?;

        Ok(Paginated { items, total, page })
    }

    async fn find_all(
        &self,
        org_id: &str,
        filter: &PaymentFilter,
    ) -> Result<Vec<Payment>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "paymentDate": -1 })
            .build();
        let cursor = self
            .payments
            .find(payment_query(org_id, filter), options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn transition(
        &self,
        org_id: &str,
        id: &str,
        change: &StatusChange,
    ) -> Result<Option<Payment>, StoreError> {
        let filter = doc! {
            "_id": id,
            "organizationId": org_id,
            "status": status_bson(change.from_status()),
        };
        let update = status_update(change, DateTime::now())?;

        Ok(self
            .payments
            .find_one_and_update(filter, update, Self::return_after())
            .await?)
    }

    async fn set_notes(
        &self,
        org_id: &str,
        id: &str,
        notes: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let filter = doc! { "_id": id, "organizationId": org_id };
        let update = doc! { "$set": { "notes": notes, "updatedAt": DateTime::now() } };

        Ok(self
            .payments
            .find_one_and_update(filter, update, Self::return_after())
            .await?)
    }

    async fn delete_unsettled(&self, org_id: &str, id: &str) -> Result<bool, StoreError> {
        let filter = doc! {
            "_id": id,
            "organizationId": org_id,
            "status": { "$in": [
                status_bson(PaymentStatus::Pending),
                status_bson(PaymentStatus::Failed),
            ] },
        };
        let result = self.payments.delete_one(filter, None).await?;
        Ok(result.deleted_count == 1)
    }

    async fn last_completed(
        &self,
        org_id: &str,
        student_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let filter = doc! {
            "organizationId": org_id,
            "studentId": student_id,
            "status": status_bson(PaymentStatus::Completed),
        };
        let options = FindOneOptions::builder()
            .sort(doc! { "paymentDate": -1 })
            .build();
        Ok(self.payments.find_one(filter, options).await?)
    }

    async fn statistics(
        &self,
        org_id: &str,
        range: DateRange,
    ) -> Result<PaymentStatistics, StoreError> {
        let mut matched = doc! {
            "organizationId": org_id,
            "status": status_bson(PaymentStatus::Completed),
        };
        if let Some(bounds) = date_bounds(&range) {
            matched.insert("paymentDate", bounds);
        }

        let pipeline = vec![
            doc! { "$match": matched },
            doc! { "$facet": {
                "summary": [
                    { "$group": {
                        "_id": Bson::Null,
                        "totalAmount": { "$sum": "$amount" },
                        "totalDiscount": { "$sum": { "$ifNull": ["$discount.amount", 0] } },
                        "totalLateFee": { "$sum": { "$ifNull": ["$lateFee.amount", 0] } },
                        "totalPayments": { "$sum": 1 },
                    } },
                ],
                "byMethod": [
                    { "$group": {
                        "_id": "$paymentMethod",
                        "count": { "$sum": 1 },
                        "amount": { "$sum": "$amount" },
                    } },
                    { "$sort": { "_id": 1 } },
                ],
            } },
        ];

        let mut cursor = self.payments.aggregate(pipeline, None).await?;
        let Some(row) = cursor.try_next().await? else {
            return Ok(PaymentStatistics::default());
        };
        let facet: StatisticsFacet = bson::from_document(row)?;

        let summary = facet
            .summary
            .first()
            .map(|s| {
                let total_amount = money(s.total_amount);
                let total_payments = s.total_payments.max(0) as u64;
                StatisticsSummary {
                    total_amount,
                    total_discount: money(s.total_discount),
                    total_late_fee: money(s.total_late_fee),
                    total_payments,
                    average_payment: average(total_amount, total_payments),
                }
            })
            .unwrap_or_default();

        let mut by_method: Vec<MethodBreakdown> = facet
            .by_method
            .into_iter()
            .map(|m| MethodBreakdown {
                method: m.method,
                count: m.count.max(0) as u64,
                amount: money(m.amount),
            })
            .collect();
        by_method.sort_by_key(|m| m.method);

        Ok(PaymentStatistics { summary, by_method })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }
}

#[async_trait]
impl StudentAccountRepository for MongoLedgerStore {
    async fn find(&self, org_id: &str, id: &str) -> Result<Option<StudentAccount>, StoreError> {
        let filter = doc! { "_id": id, "organizationId": org_id };
        Ok(self.students.find_one(filter, None).await?)
    }

    async fn find_by_user(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<StudentAccount>, StoreError> {
        let filter = doc! { "organizationId": org_id, "userId": user_id };
        Ok(self.students.find_one(filter, None).await?)
    }

    async fn find_indebted(&self, org_id: &str) -> Result<Vec<StudentAccount>, StoreError> {
        let filter = doc! { "organizationId": org_id, "totalDebt": { "$gt": 0 } };
        let cursor = self.students.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn apply_balance_change(
        &self,
        org_id: &str,
        id: &str,
        change: BalanceChange,
    ) -> Result<Option<StudentAccount>, StoreError> {
        let filter = doc! { "_id": id, "organizationId": org_id };
        let pipeline = balance_pipeline(change, DateTime::now())?;

        Ok(self
            .students
            .find_one_and_update(filter, pipeline, Self::return_after())
            .await?)
    }
}

#[async_trait]
impl OrganizationRepository for MongoLedgerStore {
    async fn find(&self, org_id: &str) -> Result<Option<Organization>, StoreError> {
        Ok(self
            .organizations
            .find_one(doc! { "_id": org_id }, None)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn receipt_search_is_literal_and_case_insensitive() {
        let filter = PaymentFilter {
            receipt_search: Some("rcp-2024.01".to_string()),
            ..Default::default()
        };
        let query = payment_query("org-1", &filter);
        let receipt = query.get_document("receiptNumber").unwrap();
        assert_eq!(receipt.get_str("$regex").unwrap(), r"rcp-2024\.01");
        assert_eq!(receipt.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn query_is_always_tenant_scoped() {
        let query = payment_query("org-9", &PaymentFilter::default());
        assert_eq!(query, doc! { "organizationId": "org-9" });
    }

    #[test]
    fn status_update_only_sets_change_fields() {
        let update = status_update(&StatusChange::Fail, DateTime::from_millis(0)).unwrap();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), "failed");
        assert!(!set.contains_key("refund"));
    }

    #[test]
    fn payment_pipeline_clamps_debt() {
        let pipeline =
            balance_pipeline(BalanceChange::Payment(dec!(950)), DateTime::from_millis(0)).unwrap();
        let set = pipeline[0].get_document("$set").unwrap();
        assert!(set.get_document("totalDebt").unwrap().contains_key("$max"));
    }
}
