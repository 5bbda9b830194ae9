//! Correlation ID for request/response matching.
//!
//! Freshly generated ids are UUID v7 text, so they sort by creation time in
//! logs. Ids read off the wire are kept verbatim: a peer may echo any string,
//! and a foreign id simply matches no pending request.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Token linking one outbound request to its one inbound reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a new correlation ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string().into())
    }

    /// Get the id as it appears on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret the id as a UUID, if it is one.
    ///
    /// Ids generated by [`CorrelationId::new`] always are.
    pub fn as_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.0).ok()
    }

    /// Get timestamp from a UUID v7 id (milliseconds since Unix epoch)
    pub fn timestamp_ms(&self) -> Option<u64> {
        let uuid = self.as_uuid()?;
        if uuid.get_version_num() != 7 {
            return None;
        }
        // UUID v7 encodes the timestamp in the first 48 bits
        let bytes = uuid.as_bytes();
        let ts = bytes[..6]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        Some(ts)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string().into())
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
