use crossbeam_channel::{Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::partition::IndexRange;
use super::ScanContext;
use crate::client::{LogClient, LogEntry};
use crate::errors::{ScanError, ScanResult};
use crate::retry::RetryPolicy;

// Longest single sleep between stop checks while backing off
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a fetch worker left a range before finishing it
enum Interrupted {
    /// Cancelled by the caller or halted by another worker
    Stopped,
    /// Every process worker is gone
    Disconnected,
}

/// Pulls ranges off the work queue and forwards their entries, one at a
/// time, to the entry queue.
///
/// Returns once the work queue is closed and drained. A range that keeps
/// failing is retried according to `retry`; when the policy gives up the
/// whole scan is halted and the error is returned.
pub(crate) fn fetch_worker<C: LogClient>(
    id: usize,
    ctx: &ScanContext<'_>,
    client: &C,
    retry: &RetryPolicy,
    ranges: Receiver<IndexRange>,
    entries: Sender<LogEntry>,
) -> ScanResult<()> {
    for range in ranges.iter() {
        if ctx.should_stop() {
            break;
        }
        match fetch_range(ctx, client, retry, range, &entries) {
            Ok(()) => {}
            Err(Some(err)) => {
                ctx.halt();
                return Err(err);
            }
            Err(None) => break,
        }
    }
    debug!(log = ctx.log_id, "Fetcher {} finished", id);
    Ok(())
}

/// Fetches `range` until every index in it has been delivered.
///
/// `Err(None)` means the worker should stop without reporting an error.
fn fetch_range<C: LogClient>(
    ctx: &ScanContext<'_>,
    client: &C,
    retry: &RetryPolicy,
    mut range: IndexRange,
    entries: &Sender<LogEntry>,
) -> Result<(), Option<ScanError>> {
    let mut failures: u32 = 0;

    while !range.is_empty() {
        if ctx.should_stop() {
            return Err(None);
        }

        debug!(log = ctx.log_id, "Fetching entries {}", range);
        let batch = match client.fetch_entries(range.start, range.end) {
            Ok(batch) if !batch.is_empty() => {
                ctx.metrics.record_fetch(true);
                batch
            }
            Ok(_) => {
                ctx.metrics.record_fetch(false);
                warn!(log = ctx.log_id, "Log returned no entries for {}", range);
                failures = failures.saturating_add(1);
                wait_before_retry(ctx, retry, &range, failures)?;
                continue;
            }
            Err(e) => {
                ctx.metrics.record_fetch(false);
                warn!(
                    log = ctx.log_id,
                    "Problem fetching entries {} from log: {}", range, e
                );
                failures = failures.saturating_add(1);
                wait_before_retry(ctx, retry, &range, failures)?;
                continue;
            }
        };

        match deliver(ctx, &mut range, batch, entries) {
            Ok(()) => failures = 0,
            Err(Interrupted::Disconnected) => {
                debug!(log = ctx.log_id, "Entry queue closed while delivering {}", range);
                return Err(None);
            }
            Err(Interrupted::Stopped) => return Err(None),
        }
    }
    Ok(())
}

/// Re-indexes `batch` from the range cursor and pushes each entry.
///
/// Logs may return fewer entries than requested; the cursor is left on the
/// first index still missing.
fn deliver(
    ctx: &ScanContext<'_>,
    range: &mut IndexRange,
    batch: Vec<LogEntry>,
    entries: &Sender<LogEntry>,
) -> Result<(), Interrupted> {
    let wanted = usize::try_from(range.len()).unwrap_or(usize::MAX);
    if batch.len() > wanted {
        warn!(
            log = ctx.log_id,
            "Log returned {} entries for {}, ignoring the extra {}",
            batch.len(),
            range,
            batch.len() - wanted
        );
    }

    for mut entry in batch.into_iter().take(wanted) {
        entry.index = range.start;
        entries.send(entry).map_err(|_| Interrupted::Disconnected)?;
        ctx.metrics.record_processed();
        range.start += 1;
    }

    if ctx.should_stop() {
        return Err(Interrupted::Stopped);
    }
    Ok(())
}

/// Applies the retry policy after a failed attempt at `range`.
fn wait_before_retry(
    ctx: &ScanContext<'_>,
    retry: &RetryPolicy,
    range: &IndexRange,
    failures: u32,
) -> Result<(), Option<ScanError>> {
    if !retry.should_retry(failures) {
        warn!(
            log = ctx.log_id,
            "Giving up on entries {} after {} failures", range, failures
        );
        return Err(Some(ScanError::retries_exhausted(
            range.start,
            range.end,
            failures,
        )));
    }

    let delay = retry.backoff_duration(failures - 1);
    if delay.is_zero() {
        return Ok(());
    }
    debug!(log = ctx.log_id, "Retrying {} in {:?}", range, delay);

    let deadline = Instant::now() + delay;
    loop {
        if ctx.should_stop() {
            return Err(None);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}
