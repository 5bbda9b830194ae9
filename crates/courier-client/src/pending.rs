//! Pending Request Store - the correlation registry.
//!
//! Maps correlation IDs to callers waiting for a reply on the shared socket.
//!
//! Flow:
//! 1. `request()` calls `register()` to get a fresh id and a oneshot receiver
//! 2. The request envelope is transmitted carrying that id
//! 3. The reader task decodes the reply and calls `complete()`
//! 4. The caller awaits the receiver
//!
//! Every entry leaves the map exactly once, through `complete()`, `expire()`,
//! `cancel()` or `fail_all()`. The entry is removed before its outcome is
//! delivered, so a redelivered reply finds nothing and is reported unmatched.

use crate::error::RequestError;
use courier_telemetry::metrics::{record_request_outcome, PENDING_REQUESTS, UNMATCHED_REPLIES};
use courier_types::{CorrelationId, Envelope};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What a waiting caller eventually receives.
pub type ReplyOutcome = Result<Envelope, RequestError>;

/// Result of handing a reply to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The waiting caller received the outcome.
    Delivered,
    /// The entry existed but its caller had already gone away.
    Abandoned,
    /// No entry for this id.
    Unmatched,
}

/// A pending request waiting for its reply
struct PendingRequest {
    /// Channel to deliver the outcome
    sender: oneshot::Sender<ReplyOutcome>,
    /// When request was registered
    created_at: Instant,
    /// Message kind (for logging)
    kind: String,
    /// Reply deadline, if any
    timeout: Option<Duration>,
}

/// Statistics for the pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests fulfilled by a reply
    pub total_resolved: AtomicU64,
    /// Total requests failed by an `error` reply
    pub total_rejected: AtomicU64,
    /// Total requests that hit their deadline
    pub total_timeouts: AtomicU64,
    /// Total requests failed because the connection ended
    pub total_closed: AtomicU64,
    /// Total requests whose caller went away
    pub total_cancelled: AtomicU64,
    /// Total replies that matched no entry
    pub total_unmatched: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStatsSnapshot {
    pub registered: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub timeouts: u64,
    pub closed: u64,
    pub cancelled: u64,
    pub unmatched: u64,
}

impl PendingStats {
    pub fn snapshot(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            registered: self.total_registered.load(Ordering::Relaxed),
            resolved: self.total_resolved.load(Ordering::Relaxed),
            rejected: self.total_rejected.load(Ordering::Relaxed),
            timeouts: self.total_timeouts.load(Ordering::Relaxed),
            closed: self.total_closed.load(Ordering::Relaxed),
            cancelled: self.total_cancelled.load(Ordering::Relaxed),
            unmatched: self.total_unmatched.load(Ordering::Relaxed),
        }
    }

    fn count_failure(&self, error: &RequestError) {
        let counter = match error {
            RequestError::Rejected(_) => &self.total_rejected,
            RequestError::Timeout(_) => &self.total_timeouts,
            RequestError::ConnectionClosed => &self.total_closed,
            _ => &self.total_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Correlation registry shared by callers and the reader task.
#[derive(Default)]
pub struct PendingRequestStore {
    /// Map of correlation ID to pending request
    pending: DashMap<CorrelationId, PendingRequest>,
    /// Statistics
    stats: PendingStats,
}

impl PendingRequestStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and get a receiver for its outcome.
    ///
    /// The id is only ever inserted into a vacant slot.
    pub fn register(
        &self,
        kind: &str,
        timeout: Option<Duration>,
    ) -> (CorrelationId, oneshot::Receiver<ReplyOutcome>) {
        let (tx, rx) = oneshot::channel();

        let correlation_id = loop {
            let candidate = CorrelationId::new();
            match self.pending.entry(candidate.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(PendingRequest {
                        sender: tx,
                        created_at: Instant::now(),
                        kind: kind.to_string(),
                        timeout,
                    });
                    break candidate;
                }
            }
        };

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        PENDING_REQUESTS.inc();

        debug!(
            correlation_id = %correlation_id,
            kind = kind,
            "Registered pending request"
        );

        (correlation_id, rx)
    }

    /// Settle a pending request with a reply.
    ///
    /// `Err(RequestError::Rejected)` for `error` replies, `Ok` otherwise.
    pub fn complete(&self, correlation_id: &CorrelationId, outcome: ReplyOutcome) -> Completion {
        let Some((_, pending)) = self.pending.remove(correlation_id) else {
            self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
            UNMATCHED_REPLIES.inc();
            warn!(
                correlation_id = %correlation_id,
                "No matching request for reply"
            );
            return Completion::Unmatched;
        };
        PENDING_REQUESTS.dec();

        let response_time = pending.created_at.elapsed();
        let (label, counter) = match &outcome {
            Ok(_) => ("resolved", &self.stats.total_resolved),
            Err(error) => (error.outcome_label(), &self.stats.total_rejected),
        };

        match pending.sender.send(outcome) {
            Ok(()) => {
                counter.fetch_add(1, Ordering::Relaxed);
                record_request_outcome(label);
                debug!(
                    correlation_id = %correlation_id,
                    kind = pending.kind,
                    outcome = label,
                    response_time_ms = response_time.as_millis(),
                    "Completed pending request"
                );
                Completion::Delivered
            }
            Err(_) => {
                // Receiver was dropped (request cancelled)
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                record_request_outcome("cancelled");
                debug!(
                    correlation_id = %correlation_id,
                    kind = pending.kind,
                    "Pending request receiver dropped"
                );
                Completion::Abandoned
            }
        }
    }

    /// Reject a request whose deadline passed.
    ///
    /// Returns false if the entry was already settled.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        let Some((_, pending)) = self.pending.remove(correlation_id) else {
            return false;
        };
        PENDING_REQUESTS.dec();

        let elapsed = pending.created_at.elapsed();
        let error = RequestError::Timeout(pending.timeout.unwrap_or(elapsed));
        warn!(
            correlation_id = %correlation_id,
            kind = pending.kind,
            elapsed_ms = elapsed.as_millis(),
            "Pending request timed out"
        );
        self.deliver_failure(pending, error);
        true
    }

    /// Drop a pending request without delivering an outcome.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            PENDING_REQUESTS.dec();
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            record_request_outcome("cancelled");
            debug!(correlation_id = %correlation_id, "Cancelled pending request");
            true
        } else {
            false
        }
    }

    /// Fail every pending request and clear the store.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self, reason: impl Fn() -> RequestError) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| e.key().clone()).collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                PENDING_REQUESTS.dec();
                self.deliver_failure(pending, reason());
                failed += 1;
            }
        }

        if failed > 0 {
            debug!(failed = failed, "Failed all pending requests");
        }
        failed
    }

    /// Await the outcome of a registered request, expiring it at `timeout`.
    ///
    /// An entry already taken by `complete()` or `fail_all()` has its outcome
    /// in flight, so an elapsed deadline waits for that outcome instead of
    /// reporting one of its own. `None` means the sender went away unsent.
    pub(crate) async fn wait_for_outcome(
        &self,
        correlation_id: &CorrelationId,
        mut reply: oneshot::Receiver<ReplyOutcome>,
        timeout: Option<Duration>,
    ) -> Option<ReplyOutcome> {
        let Some(limit) = timeout else {
            return reply.await.ok();
        };

        match tokio::time::timeout(limit, &mut reply).await {
            Ok(received) => received.ok(),
            Err(_) => {
                if !self.expire(correlation_id) {
                    debug!(
                        correlation_id = %correlation_id,
                        "Deadline passed while the outcome was being delivered"
                    );
                }
                reply.await.ok()
            }
        }
    }

    fn deliver_failure(&self, pending: PendingRequest, error: RequestError) {
        self.stats.count_failure(&error);
        record_request_outcome(error.outcome_label());
        // The caller may already be gone; nothing left to notify then
        let _ = pending.sender.send(Err(error));
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

/// Removes a registry entry when the request future is dropped early.
pub(crate) struct PendingGuard<'a> {
    store: &'a PendingRequestStore,
    correlation_id: CorrelationId,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(store: &'a PendingRequestStore, correlation_id: CorrelationId) -> Self {
        Self {
            store,
            correlation_id,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        // No-op once the entry has been settled
        self.store.cancel(&self.correlation_id);
    }
}
