//! Prometheus counters for the approval workflow.
//!
//! Metrics live in the default registry and are exposed by the `/metrics`
//! endpoint through [`encode_metrics`].

use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

use crate::errors::AppError;
use crate::models::SubjectKind;

static APPROVAL_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gatekeeper_approval_requests_total",
            "Approval requests filed, by subject kind"
        ),
        &["kind"]
    )
    .expect("failed to register gatekeeper_approval_requests_total")
});

static APPROVAL_GRANTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gatekeeper_approval_grants_total",
            "Grants recorded, by subject kind"
        ),
        &["kind"]
    )
    .expect("failed to register gatekeeper_approval_grants_total")
});

static OPERATION_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gatekeeper_operation_failures_total",
            "Failed core operations, by operation and error code"
        ),
        &["operation", "error"]
    )
    .expect("failed to register gatekeeper_operation_failures_total")
});

pub fn record_request(kind: SubjectKind) {
    APPROVAL_REQUESTS_TOTAL
        .with_label_values(&[kind.as_str()])
        .inc();
}

pub fn record_grant(kind: SubjectKind) {
    APPROVAL_GRANTS_TOTAL.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_failure(operation: &str, error: &AppError) {
    OPERATION_FAILURES_TOTAL
        .with_label_values(&[operation, error.code()])
        .inc();
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
