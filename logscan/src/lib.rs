pub mod client;
pub mod config;
pub mod errors;
pub mod matcher;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod scanner;

pub use client::{FileLog, LogClient, LogEntry};
pub use config::ScannerOptions;
pub use errors::{ScanError, ScanResult};
pub use matcher::EntryMatcher;
pub use retry::{CancellationToken, RetryPolicy};
pub use scanner::{ScanState, ScanSummary, Scanner};
