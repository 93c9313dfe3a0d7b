//! Prometheus metrics for ledger-service.
//!
//! HTTP request metrics go through the `metrics` recorder installed here; the
//! ledger's own counters live in a dedicated registry and are appended to the
//! same `/metrics` output.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{CounterVec, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static PAYMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PAYMENT_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();
pub static REFUNDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static RECONCILIATION_REQUIRED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Installs the recorder and registers ledger counters. Safe to call twice;
/// only the first call has an effect.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
    }

    let registry = Registry::new();

    // Label sets stay low-cardinality: no org or student ids.
    let payments = IntCounterVec::new(
        Opts::new("ledger_payments_total", "Payments recorded by status"),
        &["status"],
    );
    let amounts = CounterVec::new(
        Opts::new(
            "ledger_payment_amount_total",
            "Net amount of completed payments by currency",
        ),
        &["currency"],
    );
    let refunds = IntCounterVec::new(
        Opts::new("ledger_refunds_total", "Refunds processed by outcome"),
        &["outcome"],
    );
    let reconciliation = IntCounterVec::new(
        Opts::new(
            "ledger_reconciliation_required_total",
            "Payment writes whose balance update failed",
        ),
        &["operation"],
    );
    let errors = IntCounterVec::new(
        Opts::new("ledger_errors_total", "Ledger errors by kind"),
        &["error_type"],
    );

    let (Ok(payments), Ok(amounts), Ok(refunds), Ok(reconciliation), Ok(errors)) =
        (payments, amounts, refunds, reconciliation, errors)
    else {
        tracing::warn!("Ledger metric definitions rejected, custom metrics disabled");
        return;
    };

    let registered = [
        registry.register(Box::new(payments.clone())),
        registry.register(Box::new(amounts.clone())),
        registry.register(Box::new(refunds.clone())),
        registry.register(Box::new(reconciliation.clone())),
        registry.register(Box::new(errors.clone())),
    ];
    if let Some(Err(e)) = registered.into_iter().find(Result::is_err) {
        tracing::warn!(error = %e, "Failed to register ledger metrics");
        return;
    }

    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = PAYMENTS_TOTAL.set(payments);
    let _ = PAYMENT_AMOUNT_TOTAL.set(amounts);
    let _ = REFUNDS_TOTAL.set(refunds);
    let _ = RECONCILIATION_REQUIRED_TOTAL.set(reconciliation);
    let _ = ERRORS_TOTAL.set(errors);
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_payment(status: &str) {
    if let Some(counter) = PAYMENTS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn record_amount(currency: &str, amount: f64) {
    if let Some(counter) = PAYMENT_AMOUNT_TOTAL.get() {
        if amount > 0.0 {
            counter.with_label_values(&[currency]).inc_by(amount);
        }
    }
}

pub fn record_refund(outcome: &str) {
    if let Some(counter) = REFUNDS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_reconciliation_required(operation: &str) {
    if let Some(counter) = RECONCILIATION_REQUIRED_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

pub fn record_error(error_type: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type]).inc();
    }
}
