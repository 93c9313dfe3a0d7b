use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::payment::LateFee;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSettings {
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i32,
    #[serde(default)]
    pub late_fee_per_day: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_grace_period_days() -> i32 {
    3
}

fn default_currency() -> String {
    "UZS".to_string()
}

impl Default for FinancialSettings {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            late_fee_per_day: Decimal::ZERO,
            currency: default_currency(),
        }
    }
}

impl FinancialSettings {
    /// Days within the grace period cost nothing; each day past it costs
    /// `lateFeePerDay`.
    pub fn assess_late_fee(&self, days_late: i32) -> LateFee {
        if days_late <= self.grace_period_days {
            return LateFee::default();
        }

        let chargeable = days_late - self.grace_period_days;
        LateFee {
            amount: self.late_fee_per_day * Decimal::from(chargeable),
            days_late: chargeable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub financial_settings: FinancialSettings,
}
