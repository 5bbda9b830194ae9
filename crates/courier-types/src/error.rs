//! Envelope decoding and encoding errors.

use thiserror::Error;

/// Errors raised while reading or writing an [`crate::Envelope`].
///
/// Everything except `Encode` belongs to the "malformed inbound payload"
/// class: the message is reported and dropped, no caller is affected.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("envelope must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    /// `type` is missing or not a string.
    #[error("envelope has no usable `type` field")]
    MissingType,

    /// `correlationId` is present but neither a string nor null.
    #[error("`correlationId` must be a string or null")]
    InvalidCorrelationId,

    /// `data` does not have the shape the caller asked for.
    #[error("payload of `{kind}` does not match the expected shape: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// Local value could not be turned into JSON.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

impl EnvelopeError {
    /// True for errors describing an unusable inbound message.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Encode(_) | Self::Payload { .. })
    }
}

/// Result type for envelope operations
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
