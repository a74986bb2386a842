// ============================================================================
// TIME BUCKETER
// ============================================================================
// Maps absolute millisecond timestamps onto (bucket, offset) pairs. The bucket
// index goes into the row key, the zero-padded offset becomes the column name
// so that lexicographic column order equals chronological order.
// ============================================================================

use crate::constants::{EVENTS_BUCKET_PERIOD_MS, STATS_BUCKET_PERIOD_MS};

/// Fixed-period partitioning of a millisecond timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucketer {
    period: i64,
    width: usize,
}

impl TimeBucketer {
    /// Create a bucketer for the given period in milliseconds.
    ///
    /// The padding width is the number of decimal digits of the period, so
    /// every offset in `0..period` fits.
    pub fn new(period: i64) -> Self {
        debug_assert!(period > 0, "bucket period must be positive");
        Self {
            period,
            width: period.to_string().len(),
        }
    }

    /// Bucketer used for stats value columns.
    pub fn stats() -> Self {
        Self::new(STATS_BUCKET_PERIOD_MS)
    }

    /// Bucketer used for event super columns.
    pub fn events() -> Self {
        Self::new(EVENTS_BUCKET_PERIOD_MS)
    }

    #[inline]
    pub fn period(&self) -> i64 {
        self.period
    }

    /// Split a timestamp into its bucket index and offset within the bucket.
    #[inline]
    pub fn split(&self, timestamp: i64) -> (i64, i64) {
        (
            timestamp.div_euclid(self.period),
            timestamp.rem_euclid(self.period),
        )
    }

    /// Inverse of [`split`](Self::split).
    #[inline]
    pub fn join(&self, bucket: i64, offset: i64) -> i64 {
        bucket * self.period + offset
    }

    /// Zero-pad an offset to the column name width.
    pub fn pad(&self, offset: i64) -> String {
        format!("{:0width$}", offset, width = self.width)
    }

    /// Decode a column name of the form `<offset>` or `<offset>:<tag>`.
    pub fn parse_column<'a>(&self, name: &'a str) -> Option<(i64, Option<&'a str>)> {
        let (offset, tag) = match name.split_once(':') {
            Some((offset, tag)) => (offset, Some(tag)),
            None => (name, None),
        };
        offset.parse::<i64>().ok().map(|o| (o, tag))
    }
}
