use std::fmt;

/// Inclusive span of log indices fetched as one batch.
///
/// A fetch worker owns the range it dequeued and advances `start` as
/// entries arrive, so `start > end` means the range is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub start: u64,
    pub end: u64,
}

impl IndexRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of indices still covered
    pub fn len(&self) -> u64 {
        if self.start > self.end {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Ascending ranges covering `[start, end)`, produced lazily.
///
/// Ranges are generated as the scanner enqueues them, so memory stays
/// bounded by the work queue whatever the width of the scan.
#[derive(Debug, Clone)]
pub struct Partition {
    next: u64,
    end: u64,
    batch: u64,
}

impl Partition {
    /// Number of ranges not yet produced
    pub fn remaining(&self) -> u64 {
        if self.batch == 0 || self.next >= self.end {
            0
        } else {
            (self.end - self.next - 1) / self.batch + 1
        }
    }
}

impl Iterator for Partition {
    type Item = IndexRange;

    fn next(&mut self) -> Option<IndexRange> {
        if self.batch == 0 || self.next >= self.end {
            return None;
        }
        let last = self.next.saturating_add(self.batch).min(self.end) - 1;
        let range = IndexRange::new(self.next, last);
        self.next = last + 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining()) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// Splits `[start, end)` into ascending ranges of at most `batch_size` indices.
///
/// `start >= end` or `batch_size == 0` yields no ranges.
pub fn partition(start: u64, end: u64, batch_size: usize) -> Partition {
    Partition {
        next: start,
        end,
        batch: batch_size as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(ranges: &[IndexRange], start: u64, end: u64, batch_size: usize) {
        assert_eq!(ranges.first().map(|r| r.start), Some(start));
        assert_eq!(ranges.last().map(|r| r.end), Some(end - 1));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start, "gap or overlap in {:?}", pair);
        }
        for r in ranges {
            assert!(r.start <= r.end);
            assert!(r.len() <= batch_size as u64);
        }
        let total: u64 = ranges.iter().map(IndexRange::len).sum();
        assert_eq!(total, end - start);
    }

    #[test]
    fn test_exact_cover_for_many_shapes() {
        for start in [0u64, 1, 7, 999, 1000] {
            for width in [1u64, 2, 9, 10, 11, 999, 1000, 1001, 4321] {
                for batch_size in [1usize, 3, 10, 1000, 5000] {
                    let end = start + width;
                    let ranges: Vec<_> = partition(start, end, batch_size).collect();
                    assert_exact_cover(&ranges, start, end, batch_size);
                }
            }
        }
    }

    #[test]
    fn test_only_last_range_is_short() {
        let ranges: Vec<_> = partition(0, 2500, 1000).collect();
        assert_eq!(
            ranges,
            vec![
                IndexRange::new(0, 999),
                IndexRange::new(1000, 1999),
                IndexRange::new(2000, 2499),
            ]
        );
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(partition(5, 5, 10).count(), 0);
        assert_eq!(partition(6, 5, 10).count(), 0);
        assert_eq!(partition(0, 100, 0).count(), 0);
        assert_eq!(partition(0, 100, 0).remaining(), 0);
    }

    #[test]
    fn test_no_overflow_near_max() {
        let ranges: Vec<_> = partition(u64::MAX - 10, u64::MAX, 4).collect();
        assert_exact_cover(&ranges, u64::MAX - 10, u64::MAX, 4);
        assert_eq!(ranges.len(), 3);
    }

    #[test]
    fn test_whole_index_space_is_lazy() {
        let mut ranges = partition(0, u64::MAX, 1);
        assert_eq!(ranges.remaining(), u64::MAX);

        let first: Vec<_> = ranges.by_ref().take(3).collect();
        assert_eq!(
            first,
            vec![
                IndexRange::new(0, 0),
                IndexRange::new(1, 1),
                IndexRange::new(2, 2),
            ]
        );
        assert_eq!(ranges.remaining(), u64::MAX - 3);

        let wide: Vec<_> = partition(0, u64::MAX, 1000).take(2).collect();
        assert_eq!(wide[1], IndexRange::new(1000, 1999));
    }

    #[test]
    fn test_remaining_counts_ranges() {
        let ranges = partition(0, 2500, 1000);
        assert_eq!(ranges.remaining(), 3);
        assert_eq!(ranges.size_hint(), (3, Some(3)));
        assert_eq!(ranges.count(), 3);
        assert_eq!(partition(0, 2000, 1000).remaining(), 2);
    }

    #[test]
    fn test_cursor_exhaustion() {
        let mut range = IndexRange::new(10, 11);
        assert_eq!(range.len(), 2);
        range.start += 2;
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert_eq!(IndexRange::new(3, 8).to_string(), "3..=8");
    }
}
