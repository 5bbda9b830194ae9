//! Connection lifecycle.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──open──▶ Open ──close──▶ Closed
//!                        │                                  ▲
//!                        └──────── handshake failed ────────┘
//! ```
//!
//! Error events do not change state. There is no automatic reconnect; a
//! new `connect()` starts over from `Connecting`.

use std::fmt;

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called or the client was dropped.
    Local,
    /// The server closed the socket.
    Remote,
    /// The transport failed (handshake or read error).
    Failed,
    /// A new `connect()` replaced this connection.
    Superseded,
}

/// Lifecycle notifications for external observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake completed.
    Opened,
    /// Transport error; a `Closed` event follows if the socket is gone.
    Error(String),
    /// Connection ended; pending requests have been failed.
    Closed(CloseReason),
}
