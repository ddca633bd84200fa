use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Counters shared by every worker of a scan
#[derive(Debug, Clone)]
pub struct ScanMetrics {
    // Entries placed on the entry queue
    processed: Arc<AtomicU64>,
    // Entries the handler returned from
    handled: Arc<AtomicU64>,

    // Fetch calls
    fetch_calls: Arc<AtomicU64>,
    fetch_failures: Arc<AtomicU64>,
}

impl ScanMetrics {
    /// Creates a new ScanMetrics instance
    pub fn new() -> Self {
        Self {
            processed: Arc::new(AtomicU64::new(0)),
            handled: Arc::new(AtomicU64::new(0)),
            fetch_calls: Arc::new(AtomicU64::new(0)),
            fetch_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Zeroes every counter at the start of a scan
    pub fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.handled.store(0, Ordering::Relaxed);
        self.fetch_calls.store(0, Ordering::Relaxed);
        self.fetch_failures.store(0, Ordering::Relaxed);
    }

    /// Records an entry handed to the entry queue
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed handler invocation
    pub fn record_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the outcome of one fetch call
    pub fn record_fetch(&self, success: bool) {
        let calls = self.fetch_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if !success {
            let failures = self.fetch_failures.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Fetch failed: {} failures in {} calls", failures, calls);
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Gets a snapshot of the counters
    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            processed: self.processed.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            fetch_calls: self.fetch_calls.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
        }
    }

    /// Logs the current counters
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            processed = stats.processed,
            handled = stats.handled,
            fetch_calls = stats.fetch_calls,
            fetch_failures = stats.fetch_failures,
            "Scan stats"
        );
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`ScanMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub processed: u64,
    pub handled: u64,
    pub fetch_calls: u64,
    pub fetch_failures: u64,
}

impl ScanStats {
    /// Entries per second over `elapsed`
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    /// Estimated time to finish a scan of `total` entries, if any progress was made
    pub fn eta(&self, total: u64, elapsed: Duration) -> Option<Duration> {
        let rate = self.throughput(elapsed);
        if rate <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.processed);
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ScanMetrics::new();

        metrics.record_processed();
        metrics.record_processed();
        metrics.record_handled();
        metrics.record_fetch(true);
        metrics.record_fetch(false);

        let stats = metrics.get_stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.handled, 1);
        assert_eq!(stats.fetch_calls, 2);
        assert_eq!(stats.fetch_failures, 1);
    }

    #[test]
    fn test_reset_is_visible_to_clones() {
        let metrics = ScanMetrics::new();
        let shared = metrics.clone();

        shared.record_processed();
        assert_eq!(metrics.processed(), 1);

        metrics.reset();
        assert_eq!(shared.get_stats().processed, 0);
    }

    #[test]
    fn test_throughput_and_eta() {
        let stats = ScanStats {
            processed: 500,
            handled: 500,
            fetch_calls: 1,
            fetch_failures: 0,
        };

        assert_eq!(stats.throughput(Duration::from_secs(10)), 50.0);
        assert_eq!(
            stats.eta(1000, Duration::from_secs(10)),
            Some(Duration::from_secs(10))
        );
        assert_eq!(stats.throughput(Duration::ZERO), 0.0);
        assert_eq!(stats.eta(1000, Duration::ZERO), None);
    }
}
