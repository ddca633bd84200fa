use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::errors::ScanResult;
use crate::retry::RetryPolicy;

/// Options for a [`Scanner`](crate::scanner::Scanner).
///
/// # Configuration Locations
///
/// Options can be loaded from several files, later ones taking precedence:
/// 1. Global `$HOME/.config/logscan/config.yaml`
/// 2. Local `.logscan.yaml` in the current directory
/// 3. A file passed via `--config`
///
/// # Configuration Format
///
/// ```yaml
/// # Entries requested from the log per batch
/// batch_size: 1000
///
/// # Handler threads and fetch threads
/// num_process_workers: 4
/// num_fetch_workers: 2
///
/// # Suppress the progress display
/// quiet: false
///
/// # Give up on a range after 5 retries, backing off from 200ms
/// retry:
///   max_retries: 5
///   initial_backoff_ms: 200
///   max_backoff_ms: 10000
/// ```
///
/// Command-line flags override file values, see [`ScannerOptions::merge_with_cli`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerOptions {
    /// Number of entries to request in one batch from the log
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of concurrent handler workers
    #[serde(default = "default_workers")]
    pub num_process_workers: NonZeroUsize,

    /// Number of concurrent fetch workers
    #[serde(default = "default_workers")]
    pub num_fetch_workers: NonZeroUsize,

    /// Don't display progress or start/finish messages
    #[serde(default)]
    pub quiet: bool,

    /// Ranges buffered between the scanner and the fetch workers
    #[serde(default = "default_work_queue_capacity")]
    pub work_queue_capacity: usize,

    /// Entries buffered between the fetch and process workers
    #[serde(default = "default_entry_queue_capacity")]
    pub entry_queue_capacity: usize,

    /// Milliseconds between progress updates
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Behavior when fetching a range fails
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_batch_size() -> usize {
    1000
}

fn default_workers() -> NonZeroUsize {
    NonZeroUsize::MIN
}

fn default_work_queue_capacity() -> usize {
    1000
}

fn default_entry_queue_capacity() -> usize {
    100_000
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            num_process_workers: default_workers(),
            num_fetch_workers: default_workers(),
            quiet: false,
            work_queue_capacity: default_work_queue_capacity(),
            entry_queue_capacity: default_entry_queue_capacity(),
            progress_interval_ms: default_progress_interval_ms(),
            retry: RetryPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl ScannerOptions {
    /// Loads options from the default locations
    pub fn load() -> ScanResult<Self> {
        Self::load_from(None)
    }

    /// Loads options from the default locations plus an optional explicit file
    pub fn load_from(config_path: Option<&Path>) -> ScanResult<Self> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("logscan/config.yaml")),
            Some(PathBuf::from(".logscan.yaml")),
        ];
        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Merges command-line values over file values
    pub fn merge_with_cli(mut self, cli: ScannerOptions) -> Self {
        let defaults = ScannerOptions::default();

        if cli.batch_size != defaults.batch_size {
            self.batch_size = cli.batch_size;
        }
        if cli.num_process_workers != defaults.num_process_workers {
            self.num_process_workers = cli.num_process_workers;
        }
        if cli.num_fetch_workers != defaults.num_fetch_workers {
            self.num_fetch_workers = cli.num_fetch_workers;
        }
        if cli.quiet {
            self.quiet = true;
        }
        if cli.retry.max_retries.is_some() {
            self.retry.max_retries = cli.retry.max_retries;
        }
        if cli.retry.initial_backoff_ms != defaults.retry.initial_backoff_ms {
            self.retry.initial_backoff_ms = cli.retry.initial_backoff_ms;
        }
        if cli.log_level != defaults.log_level {
            self.log_level = cli.log_level;
        }
        self
    }

    /// Renders the options as a YAML document
    pub fn to_yaml(&self) -> ScanResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub(crate) fn work_queue_bound(&self) -> usize {
        self.work_queue_capacity.max(1)
    }

    pub(crate) fn entry_queue_bound(&self) -> usize {
        self.entry_queue_capacity.max(1)
    }
}
