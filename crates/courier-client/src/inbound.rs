//! Inbound frame handling.
//!
//! Runs on the reader task, one frame at a time in arrival order:
//!
//! 1. Decode the envelope; malformed frames are reported and dropped
//! 2. Append it to the message log
//! 3. Uncorrelated envelopes stop here
//! 4. Correlated ones settle the matching pending request, if any

use crate::error::RequestError;
use crate::log::MessageLog;
use crate::pending::{Completion, PendingRequestStore};
use courier_telemetry::metrics::{MALFORMED_MESSAGES, MESSAGES_RECEIVED};
use courier_types::{CorrelationId, Envelope};
use tracing::{trace, warn};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Not a valid envelope; dropped without a log entry.
    Malformed,
    /// Logged; carried no correlation id.
    Broadcast,
    /// Logged; fulfilled the matching request.
    Resolved(CorrelationId),
    /// Logged; `error` reply that failed the matching request.
    Rejected(CorrelationId),
    /// Logged; no pending request had this id.
    Unmatched(CorrelationId),
    /// Logged; the matching request's caller had already gone away.
    Abandoned(CorrelationId),
}

/// Process one text frame.
pub fn dispatch(text: &str, log: &MessageLog, pending: &PendingRequestStore) -> InboundOutcome {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            MALFORMED_MESSAGES.inc();
            warn!(error = %e, len = text.len(), "Discarding malformed message");
            return InboundOutcome::Malformed;
        }
    };

    MESSAGES_RECEIVED.inc();
    trace!(kind = %envelope.kind, correlation_id = ?envelope.correlation_id, "Received");
    log.append(envelope.clone());

    let Some(correlation_id) = envelope.correlation_id.clone() else {
        return InboundOutcome::Broadcast;
    };

    let rejected = envelope.is_error();
    let outcome = if rejected {
        Err(RequestError::Rejected(envelope.data))
    } else {
        Ok(envelope)
    };

    match pending.complete(&correlation_id, outcome) {
        Completion::Delivered if rejected => InboundOutcome::Rejected(correlation_id),
        Completion::Delivered => InboundOutcome::Resolved(correlation_id),
        Completion::Abandoned => InboundOutcome::Abandoned(correlation_id),
        Completion::Unmatched => InboundOutcome::Unmatched(correlation_id),
    }
}
