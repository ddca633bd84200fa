/// Concurrent scanning of an index-addressed log.
///
/// A scan runs two worker pools connected by bounded queues:
///
/// ```text
/// partition ─▶ work queue ─▶ N fetch workers ─▶ entry queue ─▶ M process workers ─▶ handler
/// ```
///
/// The scanner enqueues every [`IndexRange`] and closes the work queue. Once
/// all fetch workers have returned, it closes the entry queue and waits for
/// the process workers to drain it. Closing the entry queue any earlier would
/// let a process worker see an empty, closed queue while entries were still
/// being fetched.
///
/// # Ordering
///
/// Entries of one range reach the entry queue in ascending index order.
/// Ranges serviced by different fetch workers interleave freely, so a caller
/// that needs global order must use one fetch worker and one process worker.
///
/// # Failures
///
/// Fetch failures are retried according to [`RetryPolicy`]. With the default
/// policy a log that never answers keeps the scan running until it is
/// cancelled through [`Scanner::scan_with_cancel`].
pub mod fetcher;
pub mod partition;
pub mod processor;

pub use partition::{partition, IndexRange, Partition};

use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::{LogClient, LogEntry};
use crate::config::ScannerOptions;
use crate::errors::{ScanError, ScanResult};
use crate::metrics::{ScanMetrics, ScanStats};
use crate::progress::{human_time, run_reporter, ProgressReporter};
use crate::retry::{CancellationToken, RetryPolicy};

use fetcher::fetch_worker;
use processor::process_worker;

/// Lifecycle of a scan call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Partitioning = 1,
    Running = 2,
    Draining = 3,
    Complete = 4,
}

impl ScanState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Partitioning,
            2 => Self::Running,
            3 => Self::Draining,
            4 => Self::Complete,
            _ => Self::Idle,
        }
    }
}

/// Outcome of a completed scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    /// First index requested
    pub start: u64,
    /// One past the last index requested
    pub end: u64,
    /// Entries handed to the process workers
    pub processed: u64,
    /// Entries the handler returned from. Lower than `processed` only when
    /// the scan stopped early and queued entries were dropped.
    pub handled: u64,
    /// Fetch calls that failed or returned nothing
    pub fetch_failures: u64,
    pub elapsed: Duration,
}

/// State shared by the workers of one scan
pub(crate) struct ScanContext<'a> {
    pub(crate) log_id: &'a str,
    pub(crate) metrics: &'a ScanMetrics,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) halted: &'a AtomicBool,
}

impl ScanContext<'_> {
    /// True once the caller cancelled or a worker aborted the scan
    pub(crate) fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }
}

/// Marks a scanner busy for the duration of one scan.
///
/// A scan that does not reach `Complete`, including one unwinding from a
/// handler panic, leaves the scanner `Idle`.
struct ScanGuard<'a> {
    scanning: &'a AtomicBool,
    state: &'a AtomicU8,
}

impl<'a> ScanGuard<'a> {
    fn acquire(scanning: &'a AtomicBool, state: &'a AtomicU8) -> ScanResult<Self> {
        scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScanError::ScanInProgress)?;
        Ok(Self { scanning, state })
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) != ScanState::Complete as u8 {
            self.state.store(ScanState::Idle as u8, Ordering::SeqCst);
        }
        self.scanning.store(false, Ordering::SeqCst);
    }
}

/// Scans the entries of one log.
///
/// A scanner is reusable, but only one scan may run on it at a time; a
/// second concurrent call fails with [`ScanError::ScanInProgress`].
pub struct Scanner<C> {
    log_id: String,
    client: C,
    options: ScannerOptions,
    metrics: ScanMetrics,
    scanning: AtomicBool,
    state: AtomicU8,
}

impl<C: LogClient> Scanner<C> {
    /// Creates a scanner that reads the log identified by `log_id` through `client`
    pub fn new(log_id: impl Into<String>, client: C, options: ScannerOptions) -> Self {
        Self {
            log_id: log_id.into(),
            client,
            options,
            metrics: ScanMetrics::new(),
            scanning: AtomicBool::new(false),
            state: AtomicU8::new(ScanState::Idle as u8),
        }
    }

    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    pub fn options(&self) -> &ScannerOptions {
        &self.options
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Entries delivered to the process workers so far in the current or last scan.
    ///
    /// After a cancelled or aborted scan this may exceed the number of
    /// entries the handler saw, see [`ScanSummary::handled`].
    pub fn processed(&self) -> u64 {
        self.metrics.processed()
    }

    pub fn stats(&self) -> ScanStats {
        self.metrics.get_stats()
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Current size of the log. Failures are returned as-is, without retrying.
    pub fn tree_size(&self) -> ScanResult<u64> {
        self.client.tree_size()
    }

    /// Delivers every entry in `[start, end)` to `handler` exactly once.
    ///
    /// Blocks until the last handler call has returned. With more than one
    /// process worker the handler runs concurrently with itself.
    pub fn scan<F>(&self, start: u64, end: u64, handler: F) -> ScanResult<ScanSummary>
    where
        F: Fn(&Scanner<C>, &LogEntry) + Sync,
    {
        self.scan_with_cancel(start, end, &CancellationToken::new(), handler)
    }

    /// Like [`Scanner::scan`], but stops early once `cancel` is triggered.
    ///
    /// Workers notice cancellation between fetch attempts and between
    /// entries; a fetch call already in flight is allowed to finish.
    /// A cancelled scan returns [`ScanError::Cancelled`] unless every entry
    /// had already been handled by the time the workers were joined.
    pub fn scan_with_cancel<F>(
        &self,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
        handler: F,
    ) -> ScanResult<ScanSummary>
    where
        F: Fn(&Scanner<C>, &LogEntry) + Sync,
    {
        let _guard = ScanGuard::acquire(&self.scanning, &self.state)?;

        self.set_state(ScanState::Partitioning);
        let ranges = partition(start, end, self.options.batch_size);
        self.metrics.reset();
        let started = Instant::now();
        let requested = end.saturating_sub(start);

        if !self.options.quiet {
            info!(
                log = %self.log_id,
                start,
                end,
                batches = ranges.remaining(),
                "Starting scan..."
            );
        }

        let halted = AtomicBool::new(false);
        let ctx = ScanContext {
            log_id: &self.log_id,
            metrics: &self.metrics,
            cancel,
            halted: &halted,
        };
        let reporter = ProgressReporter::new(start, requested, self.options.quiet);

        let result = thread::scope(|s| {
            self.run_pipeline(s, &ctx, ranges, &handler, &reporter, started)
        });
        let elapsed = started.elapsed();

        if let Err(err) = result {
            self.set_state(ScanState::Idle);
            warn!(log = %self.log_id, error = %err, "Scan failed");
            return Err(err);
        }
        let stats = self.metrics.get_stats();
        // A token triggered after the last entry was handled does not void the scan
        let finished = stats.processed == requested && stats.handled == stats.processed;
        if cancel.is_cancelled() && !finished {
            self.set_state(ScanState::Idle);
            info!(log = %self.log_id, processed = stats.processed, "Scan cancelled");
            return Err(ScanError::Cancelled);
        }

        self.set_state(ScanState::Complete);
        if !self.options.quiet {
            info!(
                log = %self.log_id,
                "Completed {} entries in {}",
                stats.processed,
                human_time(elapsed)
            );
        }
        self.metrics.log_stats();

        Ok(ScanSummary {
            start,
            end: end.max(start),
            processed: stats.processed,
            handled: stats.handled,
            fetch_failures: stats.fetch_failures,
            elapsed,
        })
    }

    /// Runs both worker pools inside `scope` and sequences their shutdown.
    fn run_pipeline<'scope, 'env, F>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        ctx: &'env ScanContext<'env>,
        ranges: Partition,
        handler: &'env F,
        reporter: &'env ProgressReporter,
        started: Instant,
    ) -> ScanResult<()>
    where
        F: Fn(&Scanner<C>, &LogEntry) + Sync,
    {
        let (range_tx, range_rx) = bounded::<IndexRange>(self.options.work_queue_bound());
        let (entry_tx, entry_rx) = bounded::<LogEntry>(self.options.entry_queue_bound());
        let (stop_tx, stop_rx) = bounded::<()>(0);

        self.set_state(ScanState::Running);

        let progress = if self.options.quiet {
            None
        } else {
            let interval = Duration::from_millis(self.options.progress_interval_ms.max(1));
            let metrics = ctx.metrics;
            Some(spawn_worker(scope, "logscan-progress".to_string(), move || {
                run_reporter(reporter, metrics, started, interval, stop_rx)
            })?)
        };

        let mut processors = Vec::with_capacity(self.options.num_process_workers.get());
        for id in 0..self.options.num_process_workers.get() {
            let entries = entry_rx.clone();
            processors.push(spawn_worker(scope, format!("processor-{}", id), move || {
                process_worker(id, ctx, entries, |entry| handler(self, entry))
            })?);
        }
        drop(entry_rx);

        let retry: &RetryPolicy = &self.options.retry;
        let mut fetchers = Vec::with_capacity(self.options.num_fetch_workers.get());
        for id in 0..self.options.num_fetch_workers.get() {
            let ranges = range_rx.clone();
            let entries = entry_tx.clone();
            fetchers.push(spawn_worker(scope, format!("fetcher-{}", id), move || {
                fetch_worker(id, ctx, &self.client, retry, ranges, entries)
            })?);
        }
        drop(range_rx);
        debug!(
            log = %self.log_id,
            fetchers = fetchers.len(),
            processors = processors.len(),
            "Workers started"
        );

        for range in ranges {
            if ctx.should_stop() {
                break;
            }
            // Fails only once every fetch worker has exited
            if range_tx.send(range).is_err() {
                break;
            }
        }
        drop(range_tx);

        self.set_state(ScanState::Draining);
        let mut first_error = None;
        let mut panic = None;

        for handle in fetchers {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(payload) => {
                    ctx.halt();
                    panic.get_or_insert(payload);
                }
            }
        }

        // Only now may the process workers see the end of the entry queue
        drop(entry_tx);

        for handle in processors {
            if let Err(payload) = handle.join() {
                panic.get_or_insert(payload);
            }
        }

        drop(stop_tx);
        if let Some(handle) = progress {
            if handle.join().is_err() {
                warn!(log = %self.log_id, "Progress reporter panicked");
            }
        }

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_state(&self, state: ScanState) {
        debug!(log = %self.log_id, ?state, "Scan state");
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Spawns a named thread in `scope`
fn spawn_worker<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    name: String,
    f: F,
) -> ScanResult<ScopedJoinHandle<'scope, T>>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn_scoped(scope, f)
        .map_err(|e| ScanError::worker_spawn(name, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CountingLog {
        size: u64,
    }

    impl LogClient for CountingLog {
        fn fetch_entries(&self, start: u64, end: u64) -> ScanResult<Vec<LogEntry>> {
            Ok((start..=end.min(self.size - 1))
                .map(|i| LogEntry::new(i, vec![]))
                .collect())
        }

        fn tree_size(&self) -> ScanResult<u64> {
            Ok(self.size)
        }
    }

    fn quiet_options() -> ScannerOptions {
        ScannerOptions {
            quiet: true,
            batch_size: 10,
            ..ScannerOptions::default()
        }
    }

    #[test]
    fn test_scan_state_transitions() {
        let scanner = Scanner::new("test", CountingLog { size: 50 }, quiet_options());
        assert_eq!(scanner.state(), ScanState::Idle);

        let states = Mutex::new(Vec::new());
        let summary = scanner
            .scan(0, 50, |s, _| states.lock().unwrap().push(s.state()))
            .unwrap();

        assert_eq!(summary.processed, 50);
        assert_eq!(summary.handled, 50);
        assert_eq!(scanner.state(), ScanState::Complete);
        assert!(states
            .lock()
            .unwrap()
            .iter()
            .all(|s| matches!(s, ScanState::Running | ScanState::Draining)));
    }

    #[test]
    fn test_nested_scan_is_rejected() {
        let scanner = Scanner::new("test", CountingLog { size: 5 }, quiet_options());
        let nested = Mutex::new(None);

        scanner
            .scan(0, 1, |s, _| {
                *nested.lock().unwrap() = Some(s.scan(0, 1, |_, _| {}));
            })
            .unwrap();

        let nested = nested.lock().unwrap().take().unwrap();
        assert!(matches!(nested, Err(ScanError::ScanInProgress)));

        // The scanner is reusable once the first scan returned
        assert_eq!(scanner.scan(0, 5, |_, _| {}).unwrap().processed, 5);
    }

    #[test]
    fn test_empty_range_completes_immediately() {
        let scanner = Scanner::new("test", CountingLog { size: 5 }, quiet_options());
        let summary = scanner.scan(3, 3, |_, _| panic!("no entries")).unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.end, 3);
    }
}
