//! Metrics collection and export for the connection pool

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "metrics")]
use crate::pool::PoolStats;

/// Cumulative pool counters
///
/// # Examples
///
/// ```
/// use docpool::PoolMetrics;
///
/// let metrics = PoolMetrics::default();
/// let exported = metrics.export();
/// assert_eq!(exported["total_acquired"], "0");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Handles handed out by `acquire`
    pub total_acquired: usize,

    /// Handles returned to the pool
    pub total_released: usize,

    /// Acquisitions that gave up after `max_wait_time`
    pub exhausted_events: usize,

    /// Handle-level errors recorded (operations and probes)
    pub errors_reported: usize,

    /// Sessions successfully replaced
    pub refreshes: usize,

    /// Refresh attempts whose `connect` failed
    pub refresh_failures: usize,

    /// Health probes issued
    pub probes: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("errors_reported".to_string(), self.errors_reported.to_string());
        metrics.insert("refreshes".to_string(), self.refreshes.to_string());
        metrics.insert("refresh_failures".to_string(), self.refresh_failures.to_string());
        metrics.insert("probes".to_string(), self.probes.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus text format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Render current stats and counters in Prometheus exposition format.
    ///
    /// Every series carries a `pool` label set to `pool_name`.
    pub fn export_prometheus(stats: &PoolStats, metrics: &PoolMetrics, pool_name: &str) -> String {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("pool", pool_name);

        let gauges = [
            ("docpool_handles_total", "Handles in the pool", stats.total),
            ("docpool_handles_busy", "Handles currently in use", stats.busy),
            ("docpool_handles_idle", "Handles currently free", stats.idle),
            ("docpool_handles_error_flagged", "Handles with a non-zero error count", stats.error_flagged),
        ];
        let counters = [
            ("docpool_acquired_total", "Handles handed out", metrics.total_acquired),
            ("docpool_released_total", "Handles returned", metrics.total_released),
            ("docpool_exhausted_total", "Acquisitions that timed out", metrics.exhausted_events),
            ("docpool_errors_reported_total", "Handle errors recorded", metrics.errors_reported),
            ("docpool_refreshes_total", "Sessions replaced", metrics.refreshes),
            ("docpool_refresh_failures_total", "Failed session replacements", metrics.refresh_failures),
            ("docpool_probes_total", "Health probes issued", metrics.probes),
        ];

        for (name, help, value) in gauges {
            if let Ok(gauge) = IntGauge::with_opts(opts(name, help)) {
                gauge.set(value as i64);
                let _ = registry.register(Box::new(gauge));
            }
        }
        for (name, help, value) in counters {
            if let Ok(counter) = IntCounter::with_opts(opts(name, help)) {
                counter.inc_by(value as u64);
                let _ = registry.register(Box::new(counter));
            }
        }
        if let Ok(age) = Gauge::with_opts(opts(
            "docpool_handle_mean_age_seconds",
            "Mean age of all handles",
        )) {
            age.set(stats.mean_age.as_secs_f64());
            let _ = registry.register(Box::new(age));
        }

        let mut buffer = Vec::new();
        if TextEncoder::new().encode(&registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub exhausted_events: AtomicUsize,
    pub errors_reported: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub refresh_failures: AtomicUsize,
    pub probes: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            errors_reported: self.errors_reported.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
        }
    }
}
