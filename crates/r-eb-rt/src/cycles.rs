//! ---
//! eb_section: "02-pacing-scheduling"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Cycle ranges and the lock-free cycle allocator."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use r_eb_common::units::parse_count;

use crate::error::CycleRangeError;

/// Half-open range of cycle numbers, `[start, end)`; `end == None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl CycleRange {
    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn open(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Number of cycles, `None` when open-ended.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl FromStr for CycleRange {
    type Err = CycleRangeError;

    /// Accepts `N` (meaning `0..N`), `A..B` and `A..`, with count suffixes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let malformed = |reason: String| CycleRangeError::Malformed {
            spec: spec.to_owned(),
            reason,
        };
        let count = |part: &str| parse_count(part).map_err(|err| malformed(err.to_string()));

        let range = match spec.split_once("..") {
            None => CycleRange::bounded(0, count(spec)?),
            Some((start, "")) => CycleRange::open(count(start)?),
            Some((start, end)) => CycleRange::bounded(count(start)?, count(end)?),
        };
        if let Some(end) = range.end {
            if end < range.start {
                return Err(CycleRangeError::Inverted {
                    spec: spec.to_owned(),
                });
            }
        }
        Ok(range)
    }
}

impl fmt::Display for CycleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}..{}", self.start, end),
            None => write!(f, "{}..", self.start),
        }
    }
}

/// Thread-safe allocator of cycle numbers.
///
/// A single compare-and-swap on the next unissued cycle; no number is ever
/// handed out twice and none is skipped, whatever the number of callers.
#[derive(Debug)]
pub struct CycleSource {
    range: CycleRange,
    end: u64,
    next: AtomicU64,
}

impl CycleSource {
    pub fn new(range: CycleRange) -> Self {
        Self {
            range,
            end: range.end.unwrap_or(u64::MAX),
            next: AtomicU64::new(range.start),
        }
    }

    pub fn range(&self) -> CycleRange {
        self.range
    }

    /// Claim the next cycle, `None` once the range is exhausted.
    pub fn next(&self) -> Option<u64> {
        self.next_stride(1).map(|stride| stride.start)
    }

    /// Claim up to `len` consecutive cycles; the last stride may be short.
    pub fn next_stride(&self, len: u64) -> Option<Range<u64>> {
        let len = len.max(1);
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            if current >= self.end {
                return None;
            }
            let upper = current.saturating_add(len).min(self.end);
            match self.next.compare_exchange_weak(
                current,
                upper,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current..upper),
                Err(actual) => current = actual,
            }
        }
    }

    /// Cycles not yet claimed. Advisory only: it races with concurrent claims.
    pub fn remaining(&self) -> Option<u64> {
        self.range
            .end
            .map(|end| end.saturating_sub(self.next.load(Ordering::Relaxed)))
    }

    /// Cycles claimed so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - self.range.start
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.load(Ordering::Acquire) >= self.end
    }
}
