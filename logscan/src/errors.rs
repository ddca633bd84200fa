/// Error types for logscan.
///
/// Fetch failures are normally absorbed by the fetch workers and retried
/// according to the configured [`RetryPolicy`](crate::retry::RetryPolicy).
/// Only failures the pipeline cannot recover from reach the caller of
/// [`Scanner::scan`](crate::scanner::Scanner::scan):
///
/// ```rust,ignore
/// match scanner.scan(0, size, handler) {
///     Ok(summary) => // Every entry was delivered,
///     Err(ScanError::RetriesExhausted { start, end, .. }) => // Log stayed unreachable,
///     Err(ScanError::Cancelled) => // Caller aborted the scan,
///     Err(e) => // Handle other errors
/// }
/// ```
use thiserror::Error;

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while talking to a log or running a scan
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error("Tree size error: {0}")]
    TreeSize(String),
    #[error("Requested entries {start}..={end} are outside a log of size {size}")]
    OutOfRange { start: u64, end: u64, size: u64 },
    #[error("Gave up fetching entries {start}..={end} after {attempts} failed attempts")]
    RetriesExhausted { start: u64, end: u64, attempts: u32 },
    #[error("Scan cancelled")]
    Cancelled,
    #[error("A scan is already running on this scanner")]
    ScanInProgress,
    #[error("Failed to start worker {name}: {reason}")]
    WorkerSpawn { name: String, reason: String },
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ScanError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn tree_size(msg: impl Into<String>) -> Self {
        Self::TreeSize(msg.into())
    }

    pub fn out_of_range(start: u64, end: u64, size: u64) -> Self {
        Self::OutOfRange { start, end, size }
    }

    pub fn retries_exhausted(start: u64, end: u64, attempts: u32) -> Self {
        Self::RetriesExhausted {
            start,
            end,
            attempts,
        }
    }

    pub fn worker_spawn(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WorkerSpawn {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

impl From<config::ConfigError> for ScanError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ScanError::fetch("connection reset");
        assert!(matches!(err, ScanError::Fetch(_)));

        let err = ScanError::tree_size("bad signature");
        assert!(matches!(err, ScanError::TreeSize(_)));

        let err = ScanError::out_of_range(10, 20, 5);
        assert!(matches!(err, ScanError::OutOfRange { size: 5, .. }));

        let err = ScanError::retries_exhausted(0, 999, 4);
        assert!(matches!(err, ScanError::RetriesExhausted { attempts: 4, .. }));

        let err = ScanError::worker_spawn("fetcher-0", "out of threads");
        assert!(matches!(err, ScanError::WorkerSpawn { .. }));
    }

    #[test]
    fn test_error_messages() {
        let err = ScanError::retries_exhausted(1000, 1999, 3);
        assert_eq!(
            err.to_string(),
            "Gave up fetching entries 1000..=1999 after 3 failed attempts"
        );

        let err = ScanError::out_of_range(5, 9, 3);
        assert_eq!(
            err.to_string(),
            "Requested entries 5..=9 are outside a log of size 3"
        );

        let err = ScanError::config_error("batch_size must be a number");
        assert_eq!(
            err.to_string(),
            "Configuration error: batch_size must be a number"
        );

        assert_eq!(ScanError::Cancelled.to_string(), "Scan cancelled");
    }
}
