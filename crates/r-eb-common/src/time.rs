//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Shared primitives and utilities for the engine runtime."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Convert a duration into nanoseconds, saturating at `u64::MAX`.
pub fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Nanoseconds elapsed between `origin` and `now`, zero if `now` is earlier.
pub fn nanos_since(origin: Instant, now: Instant) -> u64 {
    duration_to_nanos(now.saturating_duration_since(origin))
}

/// Whole nanoseconds taken by one operation at `ops_per_sec`.
pub fn op_nanos(ops_per_sec: f64) -> u64 {
    (NANOS_PER_SEC as f64 / ops_per_sec).round().max(1.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_nanos_rounds_and_never_reaches_zero() {
        assert_eq!(op_nanos(1000.0), 1_000_000);
        assert_eq!(op_nanos(3.0), 333_333_333);
        assert_eq!(op_nanos(1e12), 1);
    }

    #[test]
    fn nanos_since_saturates_for_earlier_instants() {
        let origin = Instant::now();
        let later = origin + Duration::from_micros(5);
        assert_eq!(nanos_since(origin, later), 5_000);
        assert_eq!(nanos_since(later, origin), 0);
    }
}
