//! Prometheus metrics for courier clients.
//!
//! All metrics follow the naming convention: `courier_<area>_<metric>_<unit>`
//!
//! Discards (malformed frames, unmatched replies) are deliberate outcomes,
//! not errors; they are counted here so they stay visible.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // TRAFFIC
    // =========================================================================

    /// Envelopes written to the socket, by shape (broadcast/request)
    pub static ref MESSAGES_SENT: CounterVec = CounterVec::new(
        Opts::new("courier_messages_sent_total", "Envelopes transmitted"),
        &["shape"]
    ).expect("metric creation failed");

    /// Envelopes decoded from the socket
    pub static ref MESSAGES_RECEIVED: Counter = Counter::new(
        "courier_messages_received_total",
        "Inbound envelopes successfully decoded"
    ).expect("metric creation failed");

    /// Sends skipped because the connection was not open
    pub static ref SENDS_WHILE_DISCONNECTED: Counter = Counter::new(
        "courier_sends_while_disconnected_total",
        "Sends attempted while the connection was not open"
    ).expect("metric creation failed");

    // =========================================================================
    // DISCARDS
    // =========================================================================

    /// Inbound frames that were not a valid envelope
    pub static ref MALFORMED_MESSAGES: Counter = Counter::new(
        "courier_malformed_messages_total",
        "Inbound frames discarded as malformed"
    ).expect("metric creation failed");

    /// Correlated replies with no pending request
    pub static ref UNMATCHED_REPLIES: Counter = Counter::new(
        "courier_unmatched_replies_total",
        "Correlated replies that matched no pending request"
    ).expect("metric creation failed");

    // =========================================================================
    // REQUESTS
    // =========================================================================

    /// Terminal request outcomes (resolved/rejected/timeout/closed/cancelled)
    pub static ref REQUEST_OUTCOMES: CounterVec = CounterVec::new(
        Opts::new("courier_request_outcomes_total", "Requests by terminal outcome"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Requests currently awaiting a reply
    pub static ref PENDING_REQUESTS: Gauge = Gauge::new(
        "courier_pending_requests",
        "Requests currently awaiting a reply"
    ).expect("metric creation failed");
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_SENT.clone()),
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(SENDS_WHILE_DISCONNECTED.clone()),
        Box::new(MALFORMED_MESSAGES.clone()),
        Box::new(UNMATCHED_REPLIES.clone()),
        Box::new(REQUEST_OUTCOMES.clone()),
        Box::new(PENDING_REQUESTS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Record a terminal request outcome.
pub fn record_request_outcome(outcome: &str) {
    REQUEST_OUTCOMES.with_label_values(&[outcome]).inc();
}
