//! The ledger's view of a student: identity for receipts plus the two running
//! balance fields.

use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAccount {
    #[serde(rename = "_id")]
    pub id: String,
    pub organization_id: String,
    /// Login identity of the student, used to scope what a student may read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Display code, e.g. `STD-20240115-4821`.
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub total_paid: Decimal,
    #[serde(default)]
    pub total_debt: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

impl StudentAccount {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A delta against a student's running totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// `totalPaid += a`, `totalDebt = max(0, totalDebt - a)`.
    Payment(Decimal),
    /// `totalPaid -= a`, `totalDebt += a`. Debt is not capped.
    Refund(Decimal),
}

impl BalanceChange {
    pub fn amount(&self) -> Decimal {
        match self {
            Self::Payment(a) | Self::Refund(a) => *a,
        }
    }

    /// Totals saturate at the `Decimal` bounds rather than overflow.
    pub fn apply(&self, account: &mut StudentAccount) {
        match *self {
            Self::Payment(amount) => {
                account.total_paid = account.total_paid.saturating_add(amount);
                account.total_debt = account
                    .total_debt
                    .saturating_sub(amount)
                    .max(Decimal::ZERO);
            }
            Self::Refund(amount) => {
                account.total_paid = account.total_paid.saturating_sub(amount);
                account.total_debt = account.total_debt.saturating_add(amount);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(paid: Decimal, debt: Decimal) -> StudentAccount {
        StudentAccount {
            id: "s-1".to_string(),
            organization_id: "org-1".to_string(),
            user_id: None,
            student_id: "STD-20240101-1000".to_string(),
            first_name: "Aziza".to_string(),
            last_name: "Karimova".to_string(),
            email: None,
            phone: None,
            total_paid: paid,
            total_debt: debt,
            updated_at: None,
        }
    }

    #[test]
    fn payment_reduces_debt() {
        let mut acc = account(dec!(0), dec!(5000));
        BalanceChange::Payment(dec!(950)).apply(&mut acc);
        assert_eq!(acc.total_paid, dec!(950));
        assert_eq!(acc.total_debt, dec!(4050));
    }

    #[test]
    fn overpayment_clamps_debt_at_zero() {
        let mut acc = account(dec!(200), dec!(300));
        BalanceChange::Payment(dec!(1000)).apply(&mut acc);
        assert_eq!(acc.total_paid, dec!(1200));
        assert_eq!(acc.total_debt, dec!(0));
    }

    #[test]
    fn refund_reopens_debt_without_cap() {
        let mut acc = account(dec!(950), dec!(0));
        BalanceChange::Refund(dec!(500)).apply(&mut acc);
        assert_eq!(acc.total_paid, dec!(450));
        assert_eq!(acc.total_debt, dec!(500));
    }

    #[test]
    fn totals_saturate_instead_of_overflowing() {
        let mut acc = account(Decimal::MAX, dec!(10));
        BalanceChange::Payment(Decimal::MAX).apply(&mut acc);
        assert_eq!(acc.total_paid, Decimal::MAX);
        assert_eq!(acc.total_debt, dec!(0));

        let mut acc = account(Decimal::MIN, Decimal::MAX);
        BalanceChange::Refund(Decimal::MAX).apply(&mut acc);
        assert_eq!(acc.total_paid, Decimal::MIN);
        assert_eq!(acc.total_debt, Decimal::MAX);
    }
}
