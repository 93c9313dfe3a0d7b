//! Domain models for ledger-service.

mod organization;
mod payment;
mod statistics;
mod student;

pub use organization::{Address, FinancialSettings, Organization};
pub use payment::{
    net_amount, Discount, LateFee, Payment, PaymentFor, PaymentMethod, PaymentPurpose,
    PaymentStatus, Refund, StatusChange, MAX_MONEY,
};
pub use statistics::{
    average, MethodBreakdown, PaymentStatistics, StatisticsSummary, TodaySummary,
};
pub use student::{BalanceChange, StudentAccount};
