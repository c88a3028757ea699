//! Runtime-exposed metrics (§6 "Observability outputs")
//!
//! Plain atomic counters behind one struct: a handle an embedder clones and
//! hands to whatever Prometheus/OpenTelemetry exporter it already runs.
//! This crate never picks an exporter for you, it only keeps the counts.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-outcome reconcile counters, read by an embedder's own exporter.
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    pub ok: AtomicU64,
    pub requeue: AtomicU64,
    pub fail: AtomicU64,
    pub timeout: AtomicU64,
}

/// All counters exposed by one controller's runtime.
///
/// Cheap to clone (an `Arc` handle internally via [`Metrics::shared`]); pass
/// the same instance to a [`crate::dispatcher::Dispatcher`] and
/// [`crate::watcher::watcher`] pairing to get a unified view of one
/// controller's activity.
#[derive(Debug, Default)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    /// Count of watch reconnects, successful or not.
    pub watch_reconnects: AtomicU64,
    /// Count of `410 Gone` relists specifically, a subset of reconnects.
    pub watch_relists: AtomicU64,
    /// Count of finalizer chain runs (registrations don't count, only the
    /// cleanup chain invoked on deletion).
    pub finalizer_runs: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new())
    }

    pub fn record_reconcile_ok(&self) {
        self.reconcile.ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile_requeue(&self) {
        self.reconcile.requeue.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile_fail(&self) {
        self.reconcile.fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile_timeout(&self) {
        self.reconcile.timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_reconnect(&self) {
        self.watch_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_relist(&self) {
        self.watch_relists.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalizer_run(&self) {
        self.finalizer_runs.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = Metrics::new();
        assert_eq!(m.reconcile.ok.load(Ordering::Relaxed), 0);
        assert_eq!(m.watch_reconnects.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn recording_increments_the_right_counter() {
        let m = Metrics::new();
        m.record_reconcile_ok();
        m.record_reconcile_fail();
        m.record_reconcile_fail();
        assert_eq!(m.reconcile.ok.load(Ordering::Relaxed), 1);
        assert_eq!(m.reconcile.fail.load(Ordering::Relaxed), 2);
        assert_eq!(m.reconcile.requeue.load(Ordering::Relaxed), 0);
    }
}
