//! ---
//! eb_section: "03-persistence-logging"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Activity scoped structured logging helpers."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Logging helpers shared by the engine, its binaries and tests.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
///
/// Output goes through the test writer so the harness captures it. Later
/// calls are no-ops.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured context attached to activity log events.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Alias of the activity.
    pub activity: Option<&'a str>,
    /// Workload kind driving the activity.
    pub workload: Option<&'a str>,
    /// Worker slot emitting the event.
    pub slot: Option<usize>,
    /// Cycle being executed.
    pub cycle: Option<u64>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an activity alias.
    pub fn with_activity(mut self, activity: &'a str) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Attach a workload kind.
    pub fn with_workload(mut self, workload: &'a str) -> Self {
        self.workload = Some(workload);
        self
    }

    /// Attach a worker slot.
    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Attach a cycle number.
    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = Some(cycle);
        self
    }
}

/// Outcome recorded with lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The transition completed as requested.
    Success,
    /// The transition completed, but something had to be forced.
    Degraded,
    /// The transition failed.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event such as `activity.started`.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let empty = LogContext::default();
    let ctx = context.unwrap_or(&empty);
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                activity = ctx.activity.unwrap_or(""),
                workload = ctx.workload.unwrap_or(""),
                slot = ctx.slot.unwrap_or_default(),
                cycle = ctx.cycle.unwrap_or_default(),
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Success => emit!(Level::INFO),
        SystemEventOutcome::Degraded => emit!(Level::WARN),
        SystemEventOutcome::Fault => emit!(Level::ERROR),
    }
}
