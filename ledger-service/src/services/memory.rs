//! In-memory ledger store for tests and local development
//! (`LEDGER_STORAGE=memory`).

use async_trait::async_trait;
use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::error::StoreError;
use super::repository::{
    DateRange, OrganizationRepository, Page, Paginated, PaymentFilter, PaymentRepository,
    StudentAccountRepository,
};
use crate::models::{
    BalanceChange, Organization, Payment, PaymentStatistics, PaymentStatus, StatusChange,
    StudentAccount,
};

#[derive(Default)]
pub struct InMemoryLedgerStore {
    payments: Mutex<HashMap<String, Payment>>,
    students: Mutex<HashMap<String, StudentAccount>>,
    organizations: Mutex<HashMap<String, Organization>>,
    fail_balance_updates: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|e| StoreError::Unavailable(format!("in-memory store mutex poisoned: {}", e)))
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_student(&self, student: StudentAccount) -> Result<(), StoreError> {
        lock(&self.students)?.insert(student.id.clone(), student);
        Ok(())
    }

    pub fn put_organization(&self, org: Organization) -> Result<(), StoreError> {
        lock(&self.organizations)?.insert(org.id.clone(), org);
        Ok(())
    }

    /// Makes every subsequent balance write fail, to exercise the
    /// reconciliation path.
    pub fn fail_balance_updates(&self, fail: bool) {
        self.fail_balance_updates.store(fail, Ordering::SeqCst);
    }

    pub fn payment_count(&self) -> usize {
        lock(&self.payments).map(|p| p.len()).unwrap_or(0)
    }

    fn matching(&self, org_id: &str, filter: &PaymentFilter) -> Result<Vec<Payment>, StoreError> {
        let mut found: Vec<Payment> = lock(&self.payments)?
            .values()
            .filter(|p| p.organization_id == org_id && filter.matches(p))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
        Ok(found)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryLedgerStore {
    async fn insert(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut payments = lock(&self.payments)?;
        if payments
            .values()
            .any(|p| p.receipt_number == payment.receipt_number)
        {
            return Err(StoreError::Duplicate(format!(
                "receiptNumber {}",
                payment.receipt_number
            )));
        }
        if payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate(format!("_id {}", payment.id)));
        }
        payments.insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn find(&self, org_id: &str, id: &str) -> Result<Option<Payment>, StoreError> {
        Ok(lock(&self.payments)?
            .get(id)
            .filter(|p| p.organization_id == org_id)
            .cloned())
    }

    async fn list(
        &self,
        org_id: &str,
        filter: &PaymentFilter,
        page: Page,
    ) -> Result<Paginated<Payment>, StoreError> {
        let all = self.matching(org_id, filter)?;
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(usize::try_from(page.skip()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .collect();
        Ok(Paginated { items, total, page })
    }

    async fn find_all(
        &self,
        org_id: &str,
        filter: &PaymentFilter,
    ) -> Result<Vec<Payment>, StoreError> {
        self.matching(org_id, filter)
    }

    async fn transition(
        &self,
        org_id: &str,
        id: &str,
        change: &StatusChange,
    ) -> Result<Option<Payment>, StoreError> {
        let mut payments = lock(&self.payments)?;
        let Some(payment) = payments
            .get_mut(id)
            .filter(|p| p.organization_id == org_id && p.status == change.from_status())
        else {
            return Ok(None);
        };
        change.apply(payment, DateTime::now());
        Ok(Some(payment.clone()))
    }

    async fn set_notes(
        &self,
        org_id: &str,
        id: &str,
        notes: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let mut payments = lock(&self.payments)?;
        let Some(payment) = payments
            .get_mut(id)
            .filter(|p| p.organization_id == org_id)
        else {
            return Ok(None);
        };
        payment.notes = Some(notes.to_string());
        payment.updated_at = DateTime::now();
        Ok(Some(payment.clone()))
    }

    async fn delete_unsettled(&self, org_id: &str, id: &str) -> Result<bool, StoreError> {
        let mut payments = lock(&self.payments)?;
        let removable = payments
            .get(id)
            .is_some_and(|p| p.organization_id == org_id && !p.status.is_settled());
        if removable {
            payments.remove(id);
        }
        Ok(removable)
    }

    async fn last_completed(
        &self,
        org_id: &str,
        student_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let filter = PaymentFilter {
            status: Some(PaymentStatus::Completed),
            student_id: Some(student_id.to_string()),
            ..Default::default()
        };
        Ok(self.matching(org_id, &filter)?.into_iter().next())
    }

    async fn statistics(
        &self,
        org_id: &str,
        range: DateRange,
    ) -> Result<PaymentStatistics, StoreError> {
        let filter = PaymentFilter {
            date_range: range,
            ..Default::default()
        };
        let payments = self.matching(org_id, &filter)?;
        Ok(PaymentStatistics::from_payments(&payments))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        lock(&self.payments).map(|_| ())
    }
}

#[async_trait]
impl StudentAccountRepository for InMemoryLedgerStore {
    async fn find(&self, org_id: &str, id: &str) -> Result<Option<StudentAccount>, StoreError> {
        Ok(lock(&self.students)?
            .get(id)
            .filter(|s| s.organization_id == org_id)
            .cloned())
    }

    async fn find_by_user(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<StudentAccount>, StoreError> {
        Ok(lock(&self.students)?
            .values()
            .find(|s| s.organization_id == org_id && s.user_id.as_deref() == Some(user_id))
            .cloned())
    }

    async fn find_indebted(&self, org_id: &str) -> Result<Vec<StudentAccount>, StoreError> {
        Ok(lock(&self.students)?
            .values()
            .filter(|s| s.organization_id == org_id && s.total_debt > Decimal::ZERO)
            .cloned()
            .collect())
    }

    async fn apply_balance_change(
        &self,
        org_id: &str,
        id: &str,
        change: BalanceChange,
    ) -> Result<Option<StudentAccount>, StoreError> {
        if self.fail_balance_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "student balance writes disabled".to_string(),
            ));
        }

        let mut students = lock(&self.students)?;
        let Some(student) = students
            .get_mut(id)
            .filter(|s| s.organization_id == org_id)
        else {
            return Ok(None);
        };
        change.apply(student);
        student.updated_at = Some(DateTime::now());
        Ok(Some(student.clone()))
    }
}

#[async_trait]
impl OrganizationRepository for InMemoryLedgerStore {
    async fn find(&self, org_id: &str) -> Result<Option<Organization>, StoreError> {
        Ok(lock(&self.organizations)?.get(org_id).cloned())
    }
}
