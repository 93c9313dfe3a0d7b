//! Human-readable codes built from a date and a random suffix.
//!
//! Nothing here checks for collisions. Receipt numbers are backed by a unique
//! index and the ledger retries with a fresh number on a duplicate.

use chrono::{DateTime, Datelike, Utc};
use rand::Rng;

pub fn receipt_number_for(date: DateTime<Utc>, rng: &mut impl Rng) -> String {
    dated_code("RCP", date, rng)
}

pub fn student_id_for(date: DateTime<Utc>, rng: &mut impl Rng) -> String {
    dated_code("STD", date, rng)
}

pub fn teacher_id_for(date: DateTime<Utc>, rng: &mut impl Rng) -> String {
    dated_code("TCH", date, rng)
}

/// `CONTRACT-YYYY-NNNNN`
pub fn contract_number_for(date: DateTime<Utc>, rng: &mut impl Rng) -> String {
    format!("CONTRACT-{}-{}", date.year(), rng.gen_range(10000..=99999))
}

pub fn receipt_number() -> String {
    receipt_number_for(Utc::now(), &mut rand::thread_rng())
}

pub fn student_id() -> String {
    student_id_for(Utc::now(), &mut rand::thread_rng())
}

pub fn teacher_id() -> String {
    teacher_id_for(Utc::now(), &mut rand::thread_rng())
}

pub fn contract_number() -> String {
    contract_number_for(Utc::now(), &mut rand::thread_rng())
}

fn dated_code(prefix: &str, date: DateTime<Utc>, rng: &mut impl Rng) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        date.format("%Y%m%d"),
        rng.gen_range(1000..=9999)
    )
}

/// Source of receipt numbers for new payments.
pub trait ReceiptNumberSource: Send + Sync {
    fn next_receipt_number(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomReceiptNumbers;

impl ReceiptNumberSource for RandomReceiptNumbers {
    fn next_receipt_number(&self) -> String {
        receipt_number()
    }
}
