//! Append-only log of every decoded inbound envelope.
//!
//! Replies that settled a request are logged too. The log is unbounded and
//! lives as long as its client.

use courier_types::Envelope;
use parking_lot::RwLock;
use tokio::sync::broadcast;

/// Ordered record of inbound envelopes, observable for display.
pub struct MessageLog {
    entries: RwLock<Vec<Envelope>>,
    live: broadcast::Sender<Envelope>,
}

impl MessageLog {
    /// `capacity` bounds how far a live subscriber may lag.
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(Vec::new()),
            live,
        }
    }

    pub(crate) fn append(&self, envelope: Envelope) {
        self.entries.write().push(envelope.clone());
        // No subscribers is fine
        let _ = self.live.send(envelope);
    }

    /// Copy of the log in arrival order.
    pub fn snapshot(&self) -> Vec<Envelope> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<Envelope> {
        self.entries.read().last().cloned()
    }

    /// Envelopes appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.live.subscribe()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for MessageLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLog")
            .field("len", &self.len())
            .finish()
    }
}
