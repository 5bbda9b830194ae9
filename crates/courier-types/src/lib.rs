//! # Courier Types - Wire Model
//!
//! Shared by the client, the CLI and the test suite.
//!
//! ## Wire Format
//!
//! UTF-8 JSON, one envelope per WebSocket text frame:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ { "type": "http.request",            ← message kind      │
//! │   "correlationId": "0190c6f2-...",   ← requests/replies  │
//! │   "data": { ... } }                  ← payload           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A reply reuses the request's `correlationId`. `type == "error"` is the
//! reserved failure kind.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod correlation;
pub mod envelope;
pub mod error;
pub mod messages;

// Re-export main types
pub use correlation::CorrelationId;
pub use envelope::{decode_payload, Envelope, ERROR_TYPE};
pub use error::{EnvelopeError, EnvelopeResult};
pub use messages::{
    ErrorMessage, HttpRequestMessage, HttpResponseMessage, Message, MessageType,
    RenderTemplateRequestMessage, RenderTemplateResponseMessage, RequestMessage,
};
