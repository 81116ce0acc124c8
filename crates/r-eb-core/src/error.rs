//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Engine error taxonomy."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::time::Duration;

use r_eb_common::ConfigError;
use r_eb_metrics::MetricsError;
use r_eb_rt::{CycleRangeError, RateSpecError};
use thiserror::Error;

/// Top level error returned by controller operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("engine invariant violated: {0}")]
    Invariant(String),
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Configuration(err.into())
    }
}

impl From<MetricsError> for EngineError {
    fn from(err: MetricsError) -> Self {
        match err {
            MetricsError::InvalidAlias(alias) => {
                EngineError::Configuration(ConfigurationError::InvalidAlias(alias))
            }
            other => EngineError::Invariant(other.to_string()),
        }
    }
}

/// Rejected activity parameters. Always raised before any state changes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error(transparent)]
    Parameter(#[from] ConfigError),
    #[error("invalid rate for '{key}': {source}")]
    Rate {
        key: String,
        #[source]
        source: RateSpecError,
    },
    #[error(transparent)]
    Cycles(#[from] CycleRangeError),
    #[error("activity alias '{0}' must be non-empty and must not contain '.'")]
    InvalidAlias(String),
    #[error("unknown activity type '{0}'")]
    UnknownType(String),
    #[error("parameter '{key}' cannot be changed while the activity is running")]
    Immutable { key: String },
    #[error("parameter '{key}' is no longer supported, use cyclerate=<rate>,<burst>,co")]
    Legacy { key: String },
}

impl ConfigurationError {
    pub fn rate(key: &str, source: RateSpecError) -> Self {
        ConfigurationError::Rate {
            key: key.to_owned(),
            source,
        }
    }
}

/// Operation not valid for the current activity state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("no activity named '{0}'")]
    UnknownActivity(String),
    #[error("activity '{0}' is already running")]
    AlreadyRunning(String),
    #[error("activity '{alias}' did not complete within {waited:?}")]
    Timeout { alias: String, waited: Duration },
    #[error("activity '{0}' has already terminated")]
    Terminal(String),
}

/// Failure of a single cycle phase. Counted and logged, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkUnitError {
    #[error("cycle {cycle} phase {phase} failed: {reason}")]
    Failed { cycle: u64, phase: u32, reason: String },
    #[error("cycle {cycle} phase {phase} panicked: {message}")]
    Panicked {
        cycle: u64,
        phase: u32,
        message: String,
    },
    /// The activity was stopped while the phase waited on its own pacing.
    #[error("cycle {cycle} phase {phase} interrupted by stop")]
    Interrupted { cycle: u64, phase: u32 },
}

impl WorkUnitError {
    pub fn failed(cycle: u64, phase: u32, reason: impl Into<String>) -> Self {
        WorkUnitError::Failed {
            cycle,
            phase,
            reason: reason.into(),
        }
    }

    pub fn cycle(&self) -> u64 {
        match self {
            WorkUnitError::Failed { cycle, .. }
            | WorkUnitError::Panicked { cycle, .. }
            | WorkUnitError::Interrupted { cycle, .. } => *cycle,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
