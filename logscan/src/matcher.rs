use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::client::LogEntry;
use crate::errors::{ScanError, ScanResult};

static PATTERN_CACHE: Lazy<DashMap<String, Arc<Regex>>> = Lazy::new(DashMap::new);

/// A compiled pattern and the number of entries it matched
#[derive(Debug)]
struct CompiledPattern {
    text: String,
    regex: Arc<Regex>,
    hits: AtomicU64,
}

/// Matches entry payloads against a set of regular expressions.
///
/// Safe to share between process workers; hit counters are updated
/// atomically.
#[derive(Debug)]
pub struct EntryMatcher {
    patterns: Vec<CompiledPattern>,
}

impl EntryMatcher {
    /// Compiles `patterns`, reusing regexes compiled earlier in the process
    pub fn new<I, S>(patterns: I) -> ScanResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let text: String = p.into();
                let regex = Self::compile(&text)?;
                Ok(CompiledPattern {
                    text,
                    regex,
                    hits: AtomicU64::new(0),
                })
            })
            .collect::<ScanResult<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    fn compile(pattern: &str) -> ScanResult<Arc<Regex>> {
        if let Some(cached) = PATTERN_CACHE.get(pattern) {
            return Ok(Arc::clone(cached.value()));
        }
        let regex = Arc::new(
            Regex::new(pattern).map_err(|e| ScanError::invalid_pattern(e.to_string()))?,
        );
        PATTERN_CACHE.insert(pattern.to_string(), Arc::clone(&regex));
        Ok(regex)
    }

    /// True when there is nothing to match against, so every entry passes
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Checks `entry` against every pattern and counts the hits.
    ///
    /// An empty matcher matches everything.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let mut matched = false;
        for pattern in &self.patterns {
            if pattern.regex.is_match(&entry.payload) {
                trace!("Entry {} matched {}", entry.index, pattern.text);
                pattern.hits.fetch_add(1, Ordering::Relaxed);
                matched = true;
            }
        }
        matched
    }

    /// Hits per pattern, in the order the patterns were given
    pub fn hit_counts(&self) -> Vec<(String, u64)> {
        self.patterns
            .iter()
            .map(|p| (p.text.clone(), p.hits.load(Ordering::Relaxed)))
            .collect()
    }
}
