//! Best-effort progress reporting while a scan runs.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::metrics::{ScanMetrics, ScanStats};

/// Formats `duration` to whole seconds, e.g. `1h 2m 5s`
pub fn human_time(duration: Duration) -> String {
    humantime::format_duration(Duration::from_secs(duration.as_secs())).to_string()
}

/// Progress bar for one scan
pub struct ProgressReporter {
    bar: ProgressBar,
    start_index: u64,
    total: u64,
}

impl ProgressReporter {
    /// Creates a reporter for a scan of `total` entries starting at `start_index`.
    /// A quiet reporter draws nothing.
    pub fn new(start_index: u64, total: u64, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        };

        Self {
            bar,
            start_index,
            total,
        }
    }

    /// Progress line for the given counters
    pub fn message(&self, stats: &ScanStats, elapsed: Duration) -> String {
        let eta = stats
            .eta(self.total, elapsed)
            .map(human_time)
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "Processed: {} entries (to index {}). Throughput: {:.2}/s ETA: {}",
            stats.processed,
            self.start_index + stats.processed,
            stats.throughput(elapsed),
            eta
        )
    }

    pub fn update(&self, stats: &ScanStats, elapsed: Duration) {
        let msg = self.message(stats, elapsed);
        debug!("{}", msg);
        self.bar.set_position(stats.processed);
        self.bar.set_message(msg);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Updates `reporter` every `interval` until `stop` is closed.
///
/// Reads the counters without synchronizing with the workers, so a report
/// may lag slightly behind the real position.
pub(crate) fn run_reporter(
    reporter: &ProgressReporter,
    metrics: &ScanMetrics,
    started: Instant,
    interval: Duration,
    stop: Receiver<()>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                reporter.update(&metrics.get_stats(), started.elapsed());
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    reporter.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_human_time() {
        assert_eq!(human_time(Duration::from_secs(0)), "0s");
        assert_eq!(human_time(Duration::from_millis(5_900)), "5s");
        assert_eq!(human_time(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_message() {
        let reporter = ProgressReporter::new(1000, 200, true);
        let stats = ScanStats {
            processed: 100,
            handled: 90,
            fetch_calls: 1,
            fetch_failures: 0,
        };

        assert_eq!(
            reporter.message(&stats, Duration::from_secs(10)),
            "Processed: 100 entries (to index 1100). Throughput: 10.00/s ETA: 10s"
        );
        assert_eq!(
            reporter.message(&stats, Duration::ZERO),
            "Processed: 100 entries (to index 1100). Throughput: 0.00/s ETA: unknown"
        );
    }

    #[test]
    fn test_reporter_stops_when_channel_closes() {
        let reporter = ProgressReporter::new(0, 10, true);
        let metrics = ScanMetrics::new();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        drop(stop_tx);

        run_reporter(
            &reporter,
            &metrics,
            Instant::now(),
            Duration::from_secs(60),
            stop_rx,
        );
    }
}
