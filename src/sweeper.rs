//! Recycling of old and error-prone handles

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::operation::DocumentStore;
use crate::pool::ConnectionPool;

/// Refreshes idle handles that are past `max_age` or above `hard_error_limit`.
///
/// Busy handles are never touched; a handle being recycled is reserved for
/// the duration of its refresh so `acquire` passes over it.
pub struct MaintenanceSweeper<D: DocumentStore> {
    pool: ConnectionPool<D>,
    max_age: Duration,
    hard_error_limit: u32,
}

impl<D: DocumentStore> MaintenanceSweeper<D> {
    /// Sweeper using the pool's `max_age` and `hard_error_limit`
    pub fn new(pool: ConnectionPool<D>) -> Self {
        let max_age = pool.config().max_age;
        let hard_error_limit = pool.config().hard_error_limit;
        Self {
            pool,
            max_age,
            hard_error_limit,
        }
    }

    /// Recycle every eligible idle handle; returns how many were recycled
    pub async fn sweep(&self) -> usize {
        let mut recycled = 0;
        for id in self.pool.handle_ids() {
            let reserved = self.pool.reserve_if(id, |handle, now| {
                handle.age(now) > self.max_age || handle.error_count > self.hard_error_limit
            });
            let Some(guard) = reserved else {
                continue;
            };
            debug!(handle = %id, "recycling connection");
            self.pool.refresh(id).await;
            drop(guard);
            recycled += 1;
        }
        if recycled > 0 {
            info!(recycled, "cleaned up old or failing connections");
        }
        recycled
    }

    /// Sweep every `every` on a background task
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}
