//! The JSON envelope carried by every WebSocket text frame.
//!
//! ```text
//! broadcast: {"type": "...", "data": ...}
//! request:   {"type": "...", "correlationId": "...", "data": ...}
//! inbound:   {"type": "...", "correlationId": "..." | null, "data": ...}
//! ```
//!
//! One frame carries exactly one envelope. `type == "error"` on a correlated
//! reply means the request failed and `data` holds the reason.

use crate::correlation::CorrelationId;
use crate::error::{EnvelopeError, EnvelopeResult};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Reserved `type` of a failed-request reply.
pub const ERROR_TYPE: &str = "error";

/// A single wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Present on requests and their replies only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Payload
    pub data: Value,
}

impl Envelope {
    /// Uncorrelated message; serialises without a `correlationId` key.
    pub fn broadcast(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            correlation_id: None,
            data,
        }
    }

    /// Outbound request expecting exactly one correlated reply.
    pub fn request(kind: impl Into<String>, correlation_id: CorrelationId, data: Value) -> Self {
        Self {
            kind: kind.into(),
            correlation_id: Some(correlation_id),
            data,
        }
    }

    /// Successful reply to the request identified by `correlation_id`.
    pub fn reply(kind: impl Into<String>, correlation_id: CorrelationId, data: Value) -> Self {
        Self::request(kind, correlation_id, data)
    }

    /// Failure reply to the request identified by `correlation_id`.
    pub fn error(correlation_id: CorrelationId, data: Value) -> Self {
        Self::request(ERROR_TYPE, correlation_id, data)
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Invalid JSON, a non-object payload, a missing or non-string `type`, or a
    /// `correlationId` that is neither a string nor null.
    pub fn parse(text: &str) -> EnvelopeResult<Self> {
        let value: Value = serde_json::from_str(text).map_err(EnvelopeError::Json)?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value as an envelope.
    pub fn from_value(value: Value) -> EnvelopeResult<Self> {
        let mut fields: Map<String, Value> = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(EnvelopeError::NotAnObject {
                    found: json_kind(&other),
                })
            }
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(EnvelopeError::MissingType),
        };

        let correlation_id = match fields.remove("correlationId") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(CorrelationId::from(id)),
            Some(_) => return Err(EnvelopeError::InvalidCorrelationId),
        };

        Ok(Self {
            kind,
            correlation_id,
            data: fields.remove("data").unwrap_or(Value::Null),
        })
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> EnvelopeResult<String> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }

    /// True when this is a failure reply.
    pub fn is_error(&self) -> bool {
        self.kind == ERROR_TYPE
    }

    /// True when the envelope carries a correlation id.
    pub fn is_correlated(&self) -> bool {
        self.correlation_id.is_some()
    }

    /// Decode `data` into a typed payload.
    pub fn decode_data<T: DeserializeOwned>(&self) -> EnvelopeResult<T> {
        decode_payload(&self.kind, self.data.clone())
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

/// Decode a payload that arrived under message kind `kind`.
pub fn decode_payload<T: DeserializeOwned>(kind: &str, data: Value) -> EnvelopeResult<T> {
    serde_json::from_value(data).map_err(|source| EnvelopeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
