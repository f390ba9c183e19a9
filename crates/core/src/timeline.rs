//! Fixed-width time buckets over the span set.
//!
//! Every span that overlaps a bucket counts as running in it, even when it
//! only covers part of the bucket. With a granularity above 1 this makes
//! spans look more concurrent than they were, which [`TimelineView::skewed`]
//! reports.

use serde::Serialize;

use crate::{
    error::{EngineError, TimelineError},
    store::SpanRecord,
    types::SpanId,
};

/// Bucket width in time units, bounded to `1..=10000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Granularity(u32);

impl Granularity {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 10_000;

    pub fn new(value: u32) -> Result<Self, EngineError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(EngineError::InvalidGranularity {
                value,
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether bucketing at this scale can merge non-overlapping spans.
    pub fn is_skewed(self) -> bool {
        self.0 > 1
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

/// Half-open interval `[start, end)` in UNIX nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest range holding every started span. Open spans contribute
    /// their start only.
    pub fn covering<'a>(spans: impl IntoIterator<Item = &'a SpanRecord>) -> Option<Self> {
        let mut range: Option<TimeRange> = None;
        for span in spans {
            let Some(start) = span.start_nanos() else {
                continue;
            };
            let last = span.end_nanos().unwrap_or(start).max(start);
            let end = last.saturating_add(1);
            range = Some(match range {
                Some(r) => TimeRange::new(r.start.min(start), r.end.max(end)),
                None => TimeRange::new(start, end),
            });
        }
        range
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub start: u64,
    pub end: u64,
    /// Overlapping spans ordered by `(start, id)`.
    pub spans: Vec<SpanId>,
}

impl Bucket {
    pub fn concurrency(&self) -> usize {
        self.spans.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineView {
    pub granularity: Granularity,
    pub range: TimeRange,
    pub bucket_width: u64,
    pub buckets: Vec<Bucket>,
    /// Set whenever `granularity > 1`.
    pub skewed: bool,
    pub peak: usize,
}

impl TimelineView {
    pub const SKEW_WARNING: &'static str =
        "Concurrency may appear skewed when spans are scaled.";

    pub fn warning(&self) -> Option<&'static str> {
        self.skewed.then_some(Self::SKEW_WARNING)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEngine {
    unit_nanos: u64,
    max_buckets: u64,
}

impl Default for TimelineEngine {
    fn default() -> Self {
        Self::new(1, 100_000)
    }
}

impl TimelineEngine {
    pub fn new(unit_nanos: u64, max_buckets: u64) -> Self {
        Self {
            unit_nanos: unit_nanos.max(1),
            max_buckets,
        }
    }

    pub fn unit_nanos(&self) -> u64 {
        self.unit_nanos
    }

    pub fn compute<'a>(
        &self,
        spans: impl IntoIterator<Item = &'a SpanRecord>,
        range: TimeRange,
        granularity: Granularity,
    ) -> Result<TimelineView, TimelineError> {
        let width = u64::from(granularity.get())
            .checked_mul(self.unit_nanos)
            .ok_or(TimelineError::WidthOverflow {
                granularity: granularity.get(),
                unit_nanos: self.unit_nanos,
            })?;

        let needed = range.len().div_ceil(width);
        if needed > self.max_buckets {
            return Err(TimelineError::TooManyBuckets {
                span_nanos: range.len(),
                width,
                needed,
                limit: self.max_buckets,
            });
        }

        let mut members: Vec<Vec<(u64, SpanId)>> = vec![Vec::new(); needed as usize];
        if needed > 0 {
            for span in spans {
                let Some(start) = span.start_nanos() else {
                    continue;
                };
                let end = span.end_nanos().unwrap_or(range.end).max(start);

                let (first, last) = if start == end {
                    if start < range.start || start >= range.end {
                        continue;
                    }
                    let at = (start - range.start) / width;
                    (at, at)
                } else {
                    if start >= range.end || end <= range.start {
                        continue;
                    }
                    let first = (start.max(range.start) - range.start) / width;
                    let last = (end.min(range.end) - 1 - range.start) / width;
                    (first, last)
                };

                for bucket in &mut members[first as usize..=last as usize] {
                    bucket.push((start, span.id));
                }
            }
        }

        let mut peak = 0;
        let buckets = members
            .into_iter()
            .enumerate()
            .map(|(i, mut spans)| {
                spans.sort_unstable();
                peak = peak.max(spans.len());
                let start = range.start + i as u64 * width;
                Bucket {
                    start,
                    end: start.saturating_add(width).min(range.end),
                    spans: spans.into_iter().map(|(_, id)| id).collect(),
                }
            })
            .collect();

        Ok(TimelineView {
            granularity,
            range,
            bucket_width: width,
            buckets,
            skewed: granularity.is_skewed(),
            peak,
        })
    }
}
