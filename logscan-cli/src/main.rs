use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use logscan::{
    progress::human_time, CancellationToken, EntryMatcher, FileLog, LogEntry, ScanSummary,
    Scanner, ScannerOptions,
};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct ScanArgs {
    /// Log file to scan, one entry per line
    #[arg(short = 'l', long)]
    log: PathBuf,

    /// First index to scan
    #[arg(long, default_value = "0")]
    start: u64,

    /// One past the last index to scan (default: tree size)
    #[arg(long)]
    end: Option<u64>,

    /// Only print entries matching this regex (can be specified multiple times)
    #[arg(short = 'p', long = "pattern")]
    patterns: Vec<String>,

    /// Entries requested per batch
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,

    /// Number of handler threads
    #[arg(short = 'j', long)]
    workers: Option<NonZeroUsize>,

    /// Number of fetch threads
    #[arg(short = 'f', long)]
    fetch_workers: Option<NonZeroUsize>,

    /// Give up on a batch after this many retries (default: retry forever)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Initial delay between retries in milliseconds
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Cap entries served per request, like a log server would
    #[arg(long)]
    max_batch: Option<usize>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Don't show progress
    #[arg(short, long)]
    quiet: bool,

    /// Show only the summary, not entries
    #[arg(short, long)]
    stats: bool,

    /// Print entries as JSON lines
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the number of entries in a log
    TreeSize {
        /// Log file, one entry per line
        #[arg(short = 'l', long)]
        log: PathBuf,
    },

    /// Scan a range of a log
    Scan(Box<ScanArgs>),

    /// Print the effective configuration as YAML
    ShowConfig {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::TreeSize { log } => {
            init_logging(&ScannerOptions::default().log_level);
            let log = FileLog::open(&log)
                .with_context(|| format!("failed to open log {}", log.display()))?;
            let log_id = log.path().display().to_string();
            let scanner = Scanner::new(log_id, log, ScannerOptions::default());
            println!("{}", scanner.tree_size()?);
            Ok(())
        }
        Commands::Scan(args) => run_scan(*args),
        Commands::ShowConfig { config } => {
            let options = ScannerOptions::load_from(config.as_deref())?;
            print!("{}", options.to_yaml()?);
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Command-line values as options, defaults where a flag was not given
fn cli_options(args: &ScanArgs) -> ScannerOptions {
    let mut options = ScannerOptions::default();
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        options.num_process_workers = workers;
    }
    if let Some(fetch_workers) = args.fetch_workers {
        options.num_fetch_workers = fetch_workers;
    }
    options.quiet = args.quiet || args.json;
    options.retry.max_retries = args.max_retries;
    if let Some(backoff_ms) = args.backoff_ms {
        options.retry.initial_backoff_ms = backoff_ms;
    }
    if let Some(level) = &args.log_level {
        options.log_level = level.clone();
    }
    options
}

fn run_scan(args: ScanArgs) -> Result<()> {
    let options =
        ScannerOptions::load_from(args.config.as_deref())?.merge_with_cli(cli_options(&args));
    init_logging(&options.log_level);

    let mut log = FileLog::open(&args.log)
        .with_context(|| format!("failed to open log {}", args.log.display()))?;
    if let Some(max_batch) = args.max_batch {
        log = log.with_max_batch(max_batch);
    }

    let scanner = Scanner::new(args.log.display().to_string(), log, options);
    let tree_size = scanner.tree_size()?;
    let end = args.end.unwrap_or(tree_size);
    if end > tree_size {
        bail!("end index {} is beyond the tree size {}", end, tree_size);
    }

    let matcher = EntryMatcher::new(args.patterns.iter().cloned())?;
    debug!(
        log = scanner.log_id(),
        patterns = args.patterns.len(),
        "Scanning {}..{} of {} entries",
        args.start,
        end,
        tree_size
    );
    let matched = AtomicU64::new(0);
    let write_error = Mutex::new(None);
    let cancel = CancellationToken::new();
    let stdout = io::stdout();

    let summary = scanner.scan_with_cancel(args.start, end, &cancel, |_, entry| {
        if !matcher.matches(entry) {
            return;
        }
        matched.fetch_add(1, Ordering::Relaxed);
        if args.stats {
            return;
        }
        let mut out = stdout.lock();
        if let Err(e) = print_entry(&mut out, entry, args.json) {
            if let Ok(mut slot) = write_error.lock() {
                slot.get_or_insert(e);
            }
            cancel.cancel();
        }
    });

    if let Some(err) = write_error.into_inner().ok().flatten() {
        return Err(err).context("failed to write entry");
    }
    let summary = summary?;

    if !args.json {
        print_summary(&summary, matched.load(Ordering::Relaxed), &matcher);
    }
    Ok(())
}

fn print_entry(out: &mut impl Write, entry: &LogEntry, json: bool) -> io::Result<()> {
    if json {
        let line = serde_json::json!({
            "index": entry.index,
            "payload": entry.payload_str(),
        });
        writeln!(out, "{}", line)
    } else {
        writeln!(
            out,
            "{}: {}",
            entry.index.to_string().green(),
            entry.payload_str()
        )
    }
}

fn print_summary(summary: &ScanSummary, matched: u64, matcher: &EntryMatcher) {
    println!(
        "\n{} entries scanned ({}..{}) in {}",
        summary.processed.to_string().bold(),
        summary.start,
        summary.end,
        human_time(summary.elapsed)
    );
    if !matcher.is_empty() {
        println!("{} entries matched", matched.to_string().bold());
        for (pattern, hits) in matcher.hit_counts() {
            println!("  {}: {}", pattern.yellow(), hits);
        }
    }
    if summary.fetch_failures > 0 {
        println!(
            "{} failed fetches retried",
            summary.fetch_failures.to_string().red()
        );
    }
}
