//! Log access.
//!
//! The scanner only needs two capabilities from a log: fetching a contiguous
//! batch of entries and reporting the current tree size. [`LogClient`]
//! captures both; [`FileLog`] is a line-oriented implementation backed by a
//! local file.

mod file;

pub use file::FileLog;

use crate::errors::ScanResult;
use std::borrow::Cow;

/// One record retrieved from a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position in the log. Assigned by the fetch worker from the range it
    /// requested, not taken from the server response.
    pub index: u64,
    /// Opaque entry contents
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn new(index: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Access to an index-addressed append-only log
pub trait LogClient: Send + Sync {
    /// Fetches entries `start..=end`.
    ///
    /// Implementations may return fewer entries than requested, but the
    /// entries returned must be contiguous starting at `start`.
    fn fetch_entries(&self, start: u64, end: u64) -> ScanResult<Vec<LogEntry>>;

    /// Current number of entries in the log
    fn tree_size(&self) -> ScanResult<u64>;
}

impl<C: LogClient + ?Sized> LogClient for Box<C> {
    fn fetch_entries(&self, start: u64, end: u64) -> ScanResult<Vec<LogEntry>> {
        (**self).fetch_entries(start, end)
    }

    fn tree_size(&self) -> ScanResult<u64> {
        (**self).tree_size()
    }
}

impl<C: LogClient + ?Sized> LogClient for std::sync::Arc<C> {
    fn fetch_entries(&self, start: u64, end: u64) -> ScanResult<Vec<LogEntry>> {
        (**self).fetch_entries(start, end)
    }

    fn tree_size(&self) -> ScanResult<u64> {
        (**self).tree_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_str_is_lossy() {
        let entry = LogEntry::new(3, b"abc\xff".to_vec());
        assert_eq!(entry.payload_str(), "abc\u{fffd}");

        let entry = LogEntry::new(4, "plain");
        assert_eq!(entry.payload_str(), "plain");
    }
}
