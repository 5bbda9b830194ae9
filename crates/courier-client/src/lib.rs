//! # Courier Client - Correlated WebSocket Client
//!
//! One persistent WebSocket connection carrying two kinds of traffic:
//!
//! - **Broadcasts:** fire-and-forget envelopes without a `correlationId`
//! - **Requests:** envelopes with a fresh `correlationId`; the server's reply
//!   reuses it and settles the waiting caller
//!
//! ## Architecture
//!
//! ```text
//!  caller ── send() ─────────────────────────┐
//!  caller ── request() ── register() ──┐     │
//!                                      ▼     ▼
//!                           ┌──────────────┐ ┌──────────────┐
//!                           │   Pending    │ │ writer task  │ ──▶ socket
//!                           │   Requests   │ └──────────────┘
//!                           └──────────────┘
//!                                  ▲ complete()
//!                           ┌──────────────┐
//!  socket ────────────────▶ │ reader task  │ ──▶ MessageLog
//!                           └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Every inbound envelope that decodes is appended to the [`MessageLog`],
//!   replies included, in arrival order
//! - A reply settles at most one request; duplicates are logged and ignored
//! - Every request ends exactly once: reply, `error` rejection, deadline, or
//!   `ConnectionClosed` when the connection closes or is replaced
//! - Nothing sent while disconnected is queued for later

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod config;
pub mod error;
pub mod inbound;
pub mod log;
pub mod pending;
pub mod state;

// Re-export main types
pub use client::CorrelatedClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, RequestError};
pub use inbound::{dispatch, InboundOutcome};
pub use log::MessageLog;
pub use pending::{Completion, PendingRequestStore, PendingStats, PendingStatsSnapshot};
pub use state::{CloseReason, ConnectionEvent, ConnectionState};
