//! Fixed-size pool of document-store handles

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfiguration;
use crate::errors::{OperationError, PoolError, PoolResult};
use crate::handle::{Handle, HandleId, HandleSnapshot};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::operation::DocumentStore;

/// Point-in-time summary of the pool
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolStats {
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    /// Handles with at least one recorded error
    pub error_flagged: usize,
    pub mean_age: Duration,
}

/// `store.connect()` bounded by `limit`; expiry is a transient failure
async fn open_session<D: DocumentStore>(store: &D, limit: Duration) -> Result<D::Session, OperationError> {
    tokio::time::timeout(limit, store.connect())
        .await
        .unwrap_or_else(|_| Err(OperationError::transient(format!("connect timed out after {limit:?}"))))
}

/// A handle checked out of the pool.
///
/// Dropping it returns the handle, so every exit path (including a cancelled
/// future) releases exactly once. Dereferences to the store session.
pub struct PooledHandle<D: DocumentStore> {
    inner: Arc<PoolInner<D>>,
    id: HandleId,
    lease: u64,
    session: Arc<D::Session>,
}

impl<D: DocumentStore> PooledHandle<D> {
    /// Id of the checked-out handle
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Store session held by this handle
    pub fn session(&self) -> &D::Session {
        &self.session
    }

    /// Clear the error tally after a successful operation
    pub fn mark_success(&self) {
        if let Some(slot) = self.inner.slot(self.id) {
            let mut handle = slot.lock();
            if handle.lease == self.lease {
                handle.error_count = 0;
            }
        }
    }

    /// Record a failure on this handle and give it back.
    ///
    /// When the error count reaches the refresh threshold the session is
    /// replaced while the handle is still reserved, so no other caller can be
    /// handed the failing session in between.
    pub async fn report_error(self) {
        if self.inner.record_error(self.id) {
            self.inner.refresh(self.id).await;
        }
    }

    /// Return the handle now instead of at end of scope
    pub fn release(self) {
        drop(self);
    }
}

impl<D: DocumentStore> Deref for PooledHandle<D> {
    type Target = D::Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<D: DocumentStore> Drop for PooledHandle<D> {
    fn drop(&mut self) {
        self.inner.release_lease(self.id, self.lease);
    }
}

struct Claim<S> {
    id: HandleId,
    lease: u64,
    stale: bool,
    session: Arc<S>,
}

/// Shared state behind every clone of a [`ConnectionPool`]
struct PoolInner<D: DocumentStore> {
    store: D,
    slots: Vec<Mutex<Handle<D::Session>>>,
    config: PoolConfiguration,
    available: Notify,
    metrics: MetricsTracker,
    next_lease: AtomicU64,
}

impl<D: DocumentStore> PoolInner<D> {
    fn slot(&self, id: HandleId) -> Option<&Mutex<Handle<D::Session>>> {
        self.slots.get(id.0)
    }

    fn next_lease(&self) -> u64 {
        self.next_lease.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim the first free handle in id order
    fn try_claim(&self, skip_unusable: bool) -> Option<Claim<D::Session>> {
        let now = Instant::now();
        for (index, slot) in self.slots.iter().enumerate() {
            let mut handle = slot.lock();
            if handle.busy {
                continue;
            }
            if skip_unusable && handle.error_count >= self.config.unusable_threshold {
                continue;
            }
            let stale = handle.idle_for(now) > self.config.connection_timeout;
            let lease = self.next_lease();
            handle.claim(lease, now);
            MetricsTracker::incr(&self.metrics.total_acquired);
            return Some(Claim {
                id: HandleId(index),
                lease,
                stale,
                session: Arc::clone(&handle.session),
            });
        }
        None
    }

    /// Reserve a specific idle handle if `predicate` holds for it
    fn try_reserve_if(
        &self,
        id: HandleId,
        predicate: impl FnOnce(&Handle<D::Session>, Instant) -> bool,
    ) -> Option<Claim<D::Session>> {
        let now = Instant::now();
        let mut handle = self.slot(id)?.lock();
        if handle.busy || !predicate(&*handle, now) {
            return None;
        }
        let lease = self.next_lease();
        handle.reserve(lease);
        Some(Claim {
            id,
            lease,
            stale: false,
            session: Arc::clone(&handle.session),
        })
    }

    fn release_lease(&self, id: HandleId, lease: u64) {
        let Some(slot) = self.slot(id) else { return };
        let released = {
            let mut handle = slot.lock();
            if handle.busy && handle.lease == lease {
                handle.busy = false;
                true
            } else {
                false
            }
        };
        if released {
            MetricsTracker::incr(&self.metrics.total_released);
            self.available.notify_one();
        }
    }

    /// Bump the error count. Returns whether the refresh threshold was reached.
    fn record_error(&self, id: HandleId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let error_count = {
            let mut handle = slot.lock();
            handle.error_count += 1;
            handle.error_count
        };
        MetricsTracker::incr(&self.metrics.errors_reported);
        debug!(handle = %id, error_count, "handle error recorded");
        if error_count >= self.config.refresh_threshold {
            warn!(handle = %id, error_count, "handle has too many errors, refreshing");
            true
        } else {
            false
        }
    }

    async fn refresh(&self, id: HandleId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        match open_session(&self.store, self.config.connect_timeout).await {
            Ok(session) => {
                slot.lock().replace_session(session, Instant::now());
                MetricsTracker::incr(&self.metrics.refreshes);
                info!(handle = %id, "connection refreshed");
                true
            }
            Err(err) => {
                let error_count = {
                    let mut handle = slot.lock();
                    handle.error_count += 1;
                    handle.error_count
                };
                MetricsTracker::incr(&self.metrics.refresh_failures);
                warn!(handle = %id, error_count, error = %err, "connection refresh failed, keeping stale session");
                false
            }
        }
    }
}

/// Bounded pool of reusable document-store sessions.
///
/// Cloning is cheap and every clone refers to the same handles; build one pool
/// at startup and hand clones to the executor, auditor and sweeper.
pub struct ConnectionPool<D: DocumentStore> {
    inner: Arc<PoolInner<D>>,
}

impl<D: DocumentStore> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: DocumentStore> ConnectionPool<D> {
    /// Open `config.capacity` sessions and build the pool.
    ///
    /// Fails if the configuration is invalid or any initial session cannot be
    /// opened.
    pub async fn connect(store: D, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;

        let mut slots = Vec::with_capacity(config.capacity);
        for index in 0..config.capacity {
            let session = open_session(&store, config.connect_timeout).await.map_err(|err| {
                warn!(handle = %HandleId(index), error = %err, "failed to open initial connection");
                PoolError::Connect(err)
            })?;
            slots.push(Mutex::new(Handle::new(session)));
        }
        info!(capacity = config.capacity, "connection pool created");

        Ok(Self {
            inner: Arc::new(PoolInner {
                store,
                slots,
                config,
                available: Notify::new(),
                metrics: MetricsTracker::new(),
                next_lease: AtomicU64::new(1),
            }),
        })
    }

    /// Check out a free handle, waiting up to `max_wait_time` for one.
    ///
    /// A handle idle for longer than `connection_timeout` is refreshed before
    /// it is returned. While waiting, handles at or above the unusable error
    /// threshold are passed over.
    pub async fn acquire(&self) -> PoolResult<PooledHandle<D>> {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.max_wait_time;
        let mut contended = false;

        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(claim) = self.inner.try_claim(contended) {
                return Ok(self.checked_out(claim).await);
            }

            let now = Instant::now();
            if now >= deadline {
                MetricsTracker::incr(&self.inner.metrics.exhausted_events);
                warn!(waited = ?config.max_wait_time, "all connections are busy or failed");
                return Err(PoolError::PoolExhausted(config.max_wait_time));
            }
            if !contended {
                debug!("no free connection, waiting");
                contended = true;
            }

            let wait = config.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn checked_out(&self, claim: Claim<D::Session>) -> PooledHandle<D> {
        let mut handle = self.guard(&claim);
        if claim.stale {
            debug!(handle = %claim.id, "connection idle past timeout, refreshing before use");
            self.inner.refresh(claim.id).await;
            if let Some(session) = self.session_of(claim.id) {
                handle.session = session;
            }
        }
        handle
    }

    fn guard(&self, claim: &Claim<D::Session>) -> PooledHandle<D> {
        PooledHandle {
            inner: Arc::clone(&self.inner),
            id: claim.id,
            lease: claim.lease,
            session: Arc::clone(&claim.session),
        }
    }

    /// Mark a handle free. Unknown ids are ignored.
    pub fn release(&self, id: HandleId) {
        let Some(slot) = self.inner.slot(id) else {
            return;
        };
        let was_busy = std::mem::replace(&mut slot.lock().busy, false);
        if was_busy {
            MetricsTracker::incr(&self.inner.metrics.total_released);
        }
        self.inner.available.notify_one();
    }

    /// Replace the session of `id`, keeping its identity and busy state.
    ///
    /// Returns whether a new session was opened. On failure the stale session
    /// stays in place and the handle's error count is incremented.
    pub async fn refresh(&self, id: HandleId) -> bool {
        self.inner.refresh(id).await
    }

    /// Record a failure on `id` and free it, refreshing once the error count
    /// reaches the refresh threshold.
    pub async fn report_error(&self, id: HandleId) {
        let needs_refresh = self.inner.record_error(id);
        self.release(id);
        if needs_refresh {
            self.inner.refresh(id).await;
        }
    }

    /// Count busy, idle and error-flagged handles
    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let mut stats = PoolStats {
            total: self.inner.slots.len(),
            busy: 0,
            idle: 0,
            error_flagged: 0,
            mean_age: Duration::ZERO,
        };
        let mut total_age = Duration::ZERO;
        for slot in &self.inner.slots {
            let handle = slot.lock();
            if handle.busy {
                stats.busy += 1;
            } else {
                stats.idle += 1;
            }
            if handle.error_count > 0 {
                stats.error_flagged += 1;
            }
            total_age += handle.age(now);
        }
        if stats.total > 0 {
            stats.mean_age = total_age / stats.total as u32;
        }
        stats
    }

    /// Snapshot of every handle in id order
    pub fn handles(&self) -> Vec<HandleSnapshot> {
        let now = Instant::now();
        self.handle_ids()
            .filter_map(|id| self.inner.slot(id).map(|slot| slot.lock().snapshot(id, now)))
            .collect()
    }

    /// Current counter values
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics()
    }

    /// Ids of every handle, lowest first
    pub fn handle_ids(&self) -> impl Iterator<Item = HandleId> + use<D> {
        (0..self.inner.slots.len()).map(HandleId)
    }

    /// Number of handles, fixed at construction
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Configuration the pool was built with
    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    /// Store the sessions were opened on
    pub fn store(&self) -> &D {
        &self.inner.store
    }

    /// Current session of `id`, without reserving the handle
    pub(crate) fn session_of(&self, id: HandleId) -> Option<Arc<D::Session>> {
        self.inner
            .slot(id)
            .map(|slot| Arc::clone(&slot.lock().session))
    }

    /// Reserve `id` for maintenance if it is idle and `predicate` holds
    pub(crate) fn reserve_if(
        &self,
        id: HandleId,
        predicate: impl FnOnce(&Handle<D::Session>, Instant) -> bool,
    ) -> Option<PooledHandle<D>> {
        self.inner
            .try_reserve_if(id, predicate)
            .map(|claim| self.guard(&claim))
    }

    /// Probe `session`, bounded by `connect_timeout`
    pub(crate) async fn probe(&self, session: &D::Session) -> Result<(), OperationError> {
        MetricsTracker::incr(&self.inner.metrics.probes);
        let limit = self.inner.config.connect_timeout;
        tokio::time::timeout(limit, self.inner.store.probe(session))
            .await
            .unwrap_or_else(|_| Err(OperationError::transient(format!("probe timed out after {limit:?}"))))
    }

    pub(crate) fn record_probe_success(&self, id: HandleId) {
        if let Some(slot) = self.inner.slot(id) {
            slot.lock().error_count = 0;
        }
    }

    /// Returns whether the failure pushed the handle to its refresh threshold
    pub(crate) fn record_probe_failure(&self, id: HandleId) -> bool {
        self.inner.record_error(id)
    }
}
