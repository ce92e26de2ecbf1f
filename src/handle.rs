//! Per-handle bookkeeping

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Stable identity of a pool slot; survives refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HandleId(pub(crate) usize);

impl HandleId {
    /// Position of the handle in the pool
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// One pooled session plus its lifecycle state
pub(crate) struct Handle<S> {
    pub session: Arc<S>,
    pub busy: bool,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub error_count: u32,
    /// Bumped on every claim; a guard only releases the lease it was given
    pub lease: u64,
}

impl<S> Handle<S> {
    pub fn new(session: S) -> Self {
        let now = Instant::now();
        Self {
            session: Arc::new(session),
            busy: false,
            created_at: now,
            last_used_at: now,
            error_count: 0,
            lease: 0,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    pub fn claim(&mut self, lease: u64, now: Instant) {
        self.reserve(lease);
        self.last_used_at = now;
    }

    /// Mark busy without counting as a use
    pub fn reserve(&mut self, lease: u64) {
        self.busy = true;
        self.lease = lease;
    }

    /// Swap in a fresh session. Busy state and `last_used_at` are kept.
    pub fn replace_session(&mut self, session: S, now: Instant) {
        self.session = Arc::new(session);
        self.created_at = now;
        self.error_count = 0;
    }

    pub fn snapshot(&self, id: HandleId, now: Instant) -> HandleSnapshot {
        HandleSnapshot {
            id,
            busy: self.busy,
            age: self.age(now),
            idle: self.idle_for(now),
            error_count: self.error_count,
        }
    }
}

/// Read-only view of a handle at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HandleSnapshot {
    pub id: HandleId,
    pub busy: bool,
    pub age: Duration,
    pub idle: Duration,
    pub error_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display_uses_slot_index() {
        assert_eq!(HandleId(3).to_string(), "conn_3");
        assert_eq!(HandleId(3).index(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn replace_session_resets_age_and_errors_but_keeps_busy() {
        let mut handle = Handle::new(1u32);
        handle.claim(7, Instant::now());
        handle.error_count = 4;

        tokio::time::advance(Duration::from_secs(90)).await;
        let now = Instant::now();
        assert_eq!(handle.age(now), Duration::from_secs(90));

        handle.replace_session(2, now);
        assert_eq!(*handle.session, 2);
        assert_eq!(handle.age(now), Duration::ZERO);
        assert_eq!(handle.error_count, 0);
        assert!(handle.busy);
        assert_eq!(handle.lease, 7);
        assert_eq!(handle.idle_for(now), Duration::from_secs(90));
    }
}
