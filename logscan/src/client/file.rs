use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::{LogClient, LogEntry};
use crate::errors::{ScanError, ScanResult};

/// A log stored as a text file, one entry per line.
///
/// Line `i` (zero-based) is entry `i`. The file is read once at open time, so
/// the tree size is fixed for the lifetime of the value.
#[derive(Debug, Clone)]
pub struct FileLog {
    path: PathBuf,
    entries: Vec<Vec<u8>>,
    max_batch: Option<usize>,
}

impl FileLog {
    /// Reads the log at `path`
    pub fn open(path: impl AsRef<Path>) -> ScanResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let entries = Self::split_lines(&bytes);
        debug!(path = %path.display(), entries = entries.len(), "Opened file log");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            max_batch: None,
        })
    }

    /// Caps the number of entries returned by a single fetch, the way log
    /// servers truncate large batch requests
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = Some(max_batch.max(1));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn split_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
        let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        if body.is_empty() {
            return Vec::new();
        }
        body.split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .collect()
    }
}

impl LogClient for FileLog {
    fn fetch_entries(&self, start: u64, end: u64) -> ScanResult<Vec<LogEntry>> {
        let size = self.entries.len() as u64;
        if start > end || start >= size {
            return Err(ScanError::out_of_range(start, end, size));
        }

        let mut last = end.min(size - 1);
        if let Some(max) = self.max_batch {
            last = last.min(start.saturating_add(max as u64 - 1));
        }
        trace!("Serving entries {}..={} from {}", start, last, self.path.display());

        Ok((start..=last)
            .map(|i| LogEntry::new(i, self.entries[i as usize].clone()))
            .collect())
    }

    fn tree_size(&self) -> ScanResult<u64> {
        Ok(self.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_log(lines: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        (dir, path)
    }

    #[test]
    fn test_open_and_fetch() {
        let (_dir, path) = write_log(&["zero", "one", "two", "three"]);
        let log = FileLog::open(&path).unwrap();

        assert_eq!(log.tree_size().unwrap(), 4);
        let entries = log.fetch_entries(1, 2).unwrap();
        assert_eq!(
            entries,
            vec![LogEntry::new(1, "one"), LogEntry::new(2, "two")]
        );
    }

    #[test]
    fn test_fetch_past_end_is_truncated() {
        let (_dir, path) = write_log(&["a", "b", "c"]);
        let log = FileLog::open(&path).unwrap();

        let entries = log.fetch_entries(1, 100).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].payload, b"c");
    }

    #[test]
    fn test_fetch_outside_log_fails() {
        let (_dir, path) = write_log(&["a"]);
        let log = FileLog::open(&path).unwrap();

        let err = log.fetch_entries(1, 5).unwrap_err();
        assert!(matches!(err, ScanError::OutOfRange { size: 1, .. }));
        assert!(log.fetch_entries(3, 2).is_err());
    }

    #[test]
    fn test_max_batch_limits_response() {
        let lines: Vec<String> = (0..10).map(|i| format!("entry {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let (_dir, path) = write_log(&refs);
        let log = FileLog::open(&path).unwrap().with_max_batch(3);

        let entries = log.fetch_entries(2, 9).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].payload_str(), "entry 2");
        assert_eq!(entries[2].payload_str(), "entry 4");
    }

    #[test]
    fn test_empty_file_and_crlf() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "").unwrap();
        assert!(FileLog::open(&empty).unwrap().is_empty());

        let crlf = dir.path().join("crlf.txt");
        std::fs::write(&crlf, "a\r\nb\r\n").unwrap();
        let log = FileLog::open(&crlf).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.fetch_entries(0, 1).unwrap()[1].payload, b"b");
    }

    #[test]
    fn test_open_missing_file() {
        let result = FileLog::open("does-not-exist.log");
        assert!(matches!(result, Err(ScanError::IoError(_))));
    }
}
