//! ---
//! eb_section: "02-pacing-scheduling"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Pure schedule arithmetic for rate limited cycles."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! Schedule arithmetic shared by every limiter.
//!
//! All instants are nanosecond offsets from the limiter origin. The model
//! holds no clock: callers pass `now`, which keeps every mode testable with
//! plain numbers.

use r_eb_common::time::{op_nanos, NANOS_PER_SEC};

use crate::spec::{PacingMode, RateLimiterConfig};

/// Scheduling state owned by a limiter and advanced one grant at a time.
///
/// Slots are measured from `anchor` as `anchor + issued / rate`, so rounding
/// never accumulates across grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeline {
    /// Origin of the current run of evenly spaced slots.
    pub anchor: u64,
    /// Slots handed out since `anchor`.
    pub issued: u64,
    /// Ideal start of the next grant.
    pub next_slot: u64,
    /// Effective start of the previous grant.
    pub last_start: Option<u64>,
    /// Grants issued since the timeline was anchored or rebased.
    pub grants: u64,
}

impl Timeline {
    pub fn anchored_at(now: u64) -> Self {
        Self {
            anchor: now,
            issued: 0,
            next_slot: now,
            last_start: None,
            grants: 0,
        }
    }

    /// How far `now` is behind the ideal start of the next grant.
    pub fn backlog(&self, now: u64) -> u64 {
        now.saturating_sub(self.next_slot)
    }

    fn reanchor(&mut self, at: u64) {
        self.anchor = at;
        self.issued = 0;
        self.next_slot = at;
    }
}

/// Outcome of one scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Ideal start according to the target rate.
    pub ideal: u64,
    /// When the caller may start; never earlier than the decision instant.
    pub start_at: u64,
    /// Lateness reported to the waittime gauge (always zero for `co`).
    pub backlog: u64,
    /// Lateness discarded by re-anchoring the schedule.
    pub forgiven: u64,
}

impl Grant {
    /// Nanoseconds the caller has to wait after `now`.
    pub fn delay_after(&self, now: u64) -> u64 {
        self.start_at.saturating_sub(now)
    }
}

/// Pure pacing model derived from a [`RateLimiterConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateModel {
    config: RateLimiterConfig,
    op_nanos: u64,
    burst_nanos: u64,
}

impl RateModel {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            op_nanos: op_nanos(config.target_rate),
            burst_nanos: op_nanos(config.target_rate * config.burst_ratio),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Nanoseconds between grants at the target rate.
    pub fn op_nanos(&self) -> u64 {
        self.op_nanos
    }

    /// Minimum spacing between grants while a `hybrid` limiter catches up.
    pub fn burst_nanos(&self) -> u64 {
        self.burst_nanos
    }

    /// Ideal start of the `index`-th grant relative to the anchor: `index / rate`.
    pub fn ideal_offset(&self, index: u64) -> u64 {
        let nanos = index as f64 * NANOS_PER_SEC as f64 / self.config.target_rate;
        if nanos >= u64::MAX as f64 {
            u64::MAX
        } else {
            nanos as u64
        }
    }

    /// Decide when the next grant may start and advance the timeline.
    pub fn schedule(&self, timeline: &mut Timeline, now: u64) -> Grant {
        timeline.grants = timeline.grants.saturating_add(1);
        let mut forgiven = 0;

        if let Some(modulo) = self.config.modulo {
            if timeline.grants % modulo == 0 && now > timeline.next_slot {
                forgiven += now - timeline.next_slot;
                timeline.reanchor(now);
            }
        }

        let ideal = timeline.next_slot;
        let backlog = now.saturating_sub(ideal);
        let (start_at, reported) = match self.config.mode {
            PacingMode::Strict => (ideal, backlog),
            PacingMode::Co if backlog > 0 => {
                forgiven += backlog;
                timeline.reanchor(now);
                (now, 0)
            }
            PacingMode::Co => (ideal, 0),
            PacingMode::Hybrid => {
                let earliest = timeline
                    .last_start
                    .map(|last| last.saturating_add(self.burst_nanos))
                    .unwrap_or(0);
                (ideal.max(earliest), backlog)
            }
        };

        let start_at = start_at.max(now);
        timeline.last_start = Some(start_at);
        timeline.issued = timeline.issued.saturating_add(1);
        timeline.next_slot = timeline
            .anchor
            .saturating_add(self.ideal_offset(timeline.issued));

        Grant {
            ideal,
            start_at,
            backlog: reported,
            forgiven,
        }
    }

    /// Carry an existing timeline over to this model after a reconfiguration.
    ///
    /// The next slot becomes the new anchor, so `strict` and `hybrid` keep
    /// any outstanding debt; `co` forgives it.
    /// Returns the new timeline and the forgiven nanoseconds.
    pub fn rebase(&self, previous: Option<Timeline>, now: u64) -> (Timeline, u64) {
        let Some(mut timeline) = previous else {
            return (Timeline::anchored_at(now), 0);
        };
        timeline.grants = 0;
        match self.config.mode {
            PacingMode::Co if now > timeline.next_slot => {
                let forgiven = now - timeline.next_slot;
                timeline.reanchor(now);
                (timeline, forgiven)
            }
            _ => {
                timeline.reanchor(timeline.next_slot);
                (timeline, 0)
            }
        }
    }
}
