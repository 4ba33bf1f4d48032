//! Request sequencing: per-kind tickets, the staleness guard, and the search
//! debounce window.
//!
//! There is no true cancellation anywhere in the engine. A superseded
//! request runs to completion and its result is discarded at arrival time,
//! which is the only mechanism enforcing "the latest request wins".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The request families that compete with themselves. Detail fetches and
/// mutations have their own per-id guards and do not take tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Feed,
    Search,
    Saved,
}

impl RequestKind {
    fn as_str(self) -> &'static str {
        match self {
            RequestKind::Feed => "feed",
            RequestKind::Search => "search",
            RequestKind::Saved => "saved",
        }
    }
}

/// Hands out strictly increasing tickets per request kind and answers
/// whether a ticket is still the newest at response-arrival time.
pub(crate) struct FetchCoordinator {
    feed_seq: AtomicU64,
    search_seq: AtomicU64,
    saved_seq: AtomicU64,
    debounce: Duration,
}

impl FetchCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            feed_seq: AtomicU64::new(0),
            search_seq: AtomicU64::new(0),
            saved_seq: AtomicU64::new(0),
            debounce,
        }
    }

    fn slot(&self, kind: RequestKind) -> &AtomicU64 {
        match kind {
            RequestKind::Feed => &self.feed_seq,
            RequestKind::Search => &self.search_seq,
            RequestKind::Saved => &self.saved_seq,
        }
    }

    /// Stamp a new request. Every earlier ticket of the same kind is
    /// superseded from this moment on.
    pub fn begin(&self, kind: RequestKind) -> u64 {
        let ticket = self.slot(kind).fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        tracing::debug!(kind = kind.as_str(), ticket = ticket, "Request stamped");
        ticket
    }

    /// Acceptance check at response arrival. A false return means a newer
    /// request of this kind is in flight or already resolved; the result
    /// must be dropped silently.
    pub fn is_current(&self, kind: RequestKind, ticket: u64) -> bool {
        self.slot(kind).load(Ordering::SeqCst) == ticket
    }

    /// Sit out the debounce window, then report whether the ticket
    /// survived. Rapid keystrokes each take a ticket, so every sleeper but
    /// the last wakes up superseded and never reaches the gateway.
    pub async fn debounce(&self, kind: RequestKind, ticket: u64) -> bool {
        tokio::time::sleep(self.debounce).await;
        let current = self.is_current(kind, ticket);
        if !current {
            tracing::debug!(
                kind = kind.as_str(),
                ticket = ticket,
                "Debounced request superseded before dispatch"
            );
        }
        current
    }
}
