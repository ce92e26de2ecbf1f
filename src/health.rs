//! Health auditing of pooled handles

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::operation::DocumentStore;
use crate::pool::ConnectionPool;

/// Outcome of one audit of every handle in the pool
///
/// # Examples
///
/// ```
/// use docpool::HealthReport;
///
/// let report = HealthReport::new(3, 4, 0.5);
/// assert!(report.is_healthy());
/// assert_eq!(report.ratio, 0.75);
/// ```
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Whether enough handles answered their probe
    pub healthy: bool,

    /// Handles whose probe succeeded
    pub healthy_handles: usize,

    /// Handles probed
    pub total_handles: usize,

    /// `healthy_handles / total_handles` (0.0 to 1.0)
    pub ratio: f64,

    /// Handles refreshed because their probe pushed them over the threshold
    pub refreshed: usize,

    /// When the audit started
    pub checked_at: Instant,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthReport {
    /// Report for `healthy_handles` out of `total_handles` against `min_ratio`
    pub fn new(healthy_handles: usize, total_handles: usize, min_ratio: f64) -> Self {
        let ratio = if total_handles > 0 {
            healthy_handles as f64 / total_handles as f64
        } else {
            0.0
        };
        let healthy = ratio >= min_ratio;

        let mut warnings = Vec::new();
        if healthy_handles < total_handles {
            warnings.push(format!(
                "{} of {} connections failed their probe",
                total_handles - healthy_handles,
                total_handles
            ));
        }
        if !healthy {
            warnings.push(format!(
                "Healthy ratio {:.1}% below required {:.1}%",
                ratio * 100.0,
                min_ratio * 100.0
            ));
        }

        Self {
            healthy,
            healthy_handles,
            total_handles,
            ratio,
            refreshed: 0,
            checked_at: Instant::now(),
            warnings,
        }
    }

    /// Whether the healthy ratio reached the configured minimum
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Periodically probes every handle and recycles failing ones.
///
/// Probing does not check handles out, so audits run alongside live traffic
/// and never wait on a busy handle. Each probe is bounded by the pool's
/// `connect_timeout`.
pub struct HealthAuditor<D: DocumentStore> {
    pool: ConnectionPool<D>,
    interval: Duration,
    min_ratio: f64,
    last: Mutex<Option<HealthReport>>,
    auditing: tokio::sync::Mutex<()>,
}

impl<D: DocumentStore> HealthAuditor<D> {
    /// Auditor using the pool's `health_check_interval` and `min_healthy_ratio`
    pub fn new(pool: ConnectionPool<D>) -> Self {
        let interval = pool.config().health_check_interval;
        let min_ratio = pool.config().min_healthy_ratio;
        Self {
            pool,
            interval,
            min_ratio,
            last: Mutex::new(None),
            auditing: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether the pool is healthy.
    ///
    /// Within `health_check_interval` of the last real audit the previous
    /// answer is returned without probing anything.
    pub async fn health_check(&self) -> bool {
        self.check().await.healthy
    }

    /// Like [`health_check`](Self::health_check) but returns the full report.
    ///
    /// While another caller is auditing, the previous report is returned
    /// instead of waiting; only the very first audit is waited on.
    pub async fn check(&self) -> HealthReport {
        if let Some(report) = self.fresh_report() {
            debug!(healthy = report.healthy, "returning cached health result");
            return report;
        }

        let _auditing = match self.auditing.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if let Some(report) = self.last_report() {
                    debug!(healthy = report.healthy, "audit in progress, returning previous result");
                    return report;
                }
                self.auditing.lock().await
            }
        };
        // an audit may have finished while we waited for the lock
        if let Some(report) = self.fresh_report() {
            return report;
        }

        let report = self.audit().await;
        *self.last.lock() = Some(report.clone());
        report
    }

    /// Most recent audit, if any has run
    pub fn last_report(&self) -> Option<HealthReport> {
        self.last.lock().clone()
    }

    fn fresh_report(&self) -> Option<HealthReport> {
        self.last
            .lock()
            .as_ref()
            .filter(|report| report.checked_at.elapsed() < self.interval)
            .cloned()
    }

    async fn audit(&self) -> HealthReport {
        let started = Instant::now();
        let mut healthy = 0;
        let mut refreshed = 0;
        let mut total = 0;

        for id in self.pool.handle_ids() {
            let Some(session) = self.pool.session_of(id) else {
                continue;
            };
            total += 1;
            match self.pool.probe(&session).await {
                Ok(()) => {
                    self.pool.record_probe_success(id);
                    healthy += 1;
                }
                Err(err) => {
                    warn!(handle = %id, error = %err, "health probe failed");
                    if self.pool.record_probe_failure(id) && self.pool.refresh(id).await {
                        refreshed += 1;
                    }
                }
            }
        }

        let mut report = HealthReport::new(healthy, total, self.min_ratio);
        report.refreshed = refreshed;
        report.checked_at = started;
        info!(
            healthy = report.healthy_handles,
            total = report.total_handles,
            refreshed,
            "health check completed"
        );
        report
    }

    /// Run an audit every `health_check_interval` on a background task
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if !self.health_check().await {
                    warn!("connection pool is unhealthy");
                }
            }
        })
    }
}
