use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::payment::{Payment, PaymentMethod, PaymentStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSummary {
    pub total_amount: Decimal,
    pub total_discount: Decimal,
    pub total_late_fee: Decimal,
    pub total_payments: u64,
    pub average_payment: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodBreakdown {
    pub method: PaymentMethod,
    pub count: u64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatistics {
    pub summary: StatisticsSummary,
    pub by_method: Vec<MethodBreakdown>,
}

impl PaymentStatistics {
    /// Aggregates completed payments. Others in the slice are ignored.
    /// Sums saturate at `Decimal::MAX`.
    pub fn from_payments<'a>(payments: impl IntoIterator<Item = &'a Payment>) -> Self {
        let mut summary = StatisticsSummary::default();
        let mut by_method: BTreeMap<PaymentMethod, (u64, Decimal)> = BTreeMap::new();

        for payment in payments
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Completed)
        {
            summary.total_amount = summary.total_amount.saturating_add(payment.amount);
            summary.total_discount = summary
                .total_discount
                .saturating_add(payment.discount.amount);
            summary.total_late_fee = summary
                .total_late_fee
                .saturating_add(payment.late_fee.amount);
            summary.total_payments += 1;

            let entry = by_method
                .entry(payment.payment_method)
                .or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 = entry.1.saturating_add(payment.amount);
        }

        summary.average_payment = average(summary.total_amount, summary.total_payments);

        Self {
            summary,
            by_method: by_method
                .into_iter()
                .map(|(method, (count, amount))| MethodBreakdown {
                    method,
                    count,
                    amount,
                })
                .collect(),
        }
    }
}

/// Mean rounded to 2 dp; zero when there is nothing to average.
pub fn average(total: Decimal, count: u64) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (total / Decimal::from(count)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Payments dated on the current UTC day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodaySummary {
    pub count: u64,
    /// Gross amount of the completed payments only.
    pub total_amount: Decimal,
    pub completed: u64,
    pub pending: u64,
}

impl TodaySummary {
    pub fn from_payments<'a>(payments: impl IntoIterator<Item = &'a Payment>) -> Self {
        let mut summary = Self::default();
        for payment in payments {
            summary.count += 1;
            match payment.status {
                PaymentStatus::Completed => {
                    summary.completed += 1;
                    summary.total_amount = summary.total_amount.saturating_add(payment.amount);
                }
                PaymentStatus::Pending => summary.pending += 1,
                _ => {}
            }
        }
        summary
    }
}
