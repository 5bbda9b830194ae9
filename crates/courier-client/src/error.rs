//! Client and request errors.

use crate::config::ConfigError;
use courier_types::EnvelopeError;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors from constructing or connecting a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("timed out connecting to {url} after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },
}

/// Terminal failure of a single request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The server answered with an `error` envelope; holds its `data`.
    #[error("request rejected: {}", rejection_text(.0))]
    Rejected(Value),

    /// The connection ended, was replaced, or was never open.
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,

    /// No reply within the deadline.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The request payload could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[source] EnvelopeError),

    /// The reply payload did not have the expected shape.
    #[error("unexpected reply payload: {0}")]
    Decode(#[source] EnvelopeError),

    /// The reply carried a different message kind than the request expects.
    #[error("expected a `{expected}` reply, got `{found}`")]
    UnexpectedType {
        expected: &'static str,
        found: String,
    },
}

impl RequestError {
    /// Human-readable reason of a rejection.
    ///
    /// The server sends either a bare string or `{"message": "..."}`.
    pub fn reason_text(&self) -> Option<String> {
        match self {
            Self::Rejected(data) => Some(rejection_text(data)),
            _ => None,
        }
    }

    /// Metric label for this outcome.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::ConnectionClosed => "closed",
            Self::Timeout(_) => "timeout",
            Self::Encode(_) | Self::Decode(_) | Self::UnexpectedType { .. } => "invalid",
        }
    }
}

fn rejection_text(data: &Value) -> String {
    match data {
        Value::String(reason) => reason.clone(),
        Value::Object(fields) => match fields.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => data.to_string(),
        },
        other => other.to_string(),
    }
}
