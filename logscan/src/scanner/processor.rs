use crossbeam_channel::Receiver;
use tracing::debug;

use super::ScanContext;
use crate::client::LogEntry;

/// Halts the scan if the handler unwinds this worker
struct HaltOnPanic<'a, 'b>(&'a ScanContext<'b>);

impl Drop for HaltOnPanic<'_, '_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.halt();
        }
    }
}

/// Feeds entries from the entry queue to `handler` until the queue is closed
/// and drained, or the scan is stopped.
///
/// The handler runs on this worker's thread. A panic in it halts the scan and
/// is re-raised by the scanner once the pools are joined.
pub(crate) fn process_worker<F>(
    id: usize,
    ctx: &ScanContext<'_>,
    entries: Receiver<LogEntry>,
    handler: F,
) where
    F: Fn(&LogEntry),
{
    let _guard = HaltOnPanic(ctx);
    for entry in entries.iter() {
        if ctx.should_stop() {
            break;
        }
        handler(&entry);
        ctx.metrics.record_handled();
    }
    debug!(log = ctx.log_id, "Processor {} finished", id);
}
