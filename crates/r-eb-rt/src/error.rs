//! ---
//! eb_section: "02-pacing-scheduling"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Pacing and cycle allocation helpers for the engine."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use thiserror::Error;

/// Problems with a rate specification such as `1000,1.5,hybrid`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateSpecError {
    #[error("rate spec is empty")]
    Empty,
    #[error("rate spec '{spec}' has too many fields, expected <rate>[,<burst>[,<mode>[,<modulo>]]]")]
    TooManyFields { spec: String },
    #[error("{field} '{value}' is not a number")]
    InvalidNumber { field: &'static str, value: String },
    #[error("rate must be greater than 0, got {0}")]
    NonPositiveRate(f64),
    #[error("rate must not exceed 1e9 ops/s (nanosecond precision), got {0}")]
    RateTooHigh(f64),
    #[error("burst ratio must be at least 1.0, got {0}")]
    BurstBelowOne(f64),
    #[error("unknown pacing mode '{0}', expected strict, co or hybrid")]
    UnknownMode(String),
    #[error("modulo must be greater than 0")]
    ZeroModulo,
}

/// Problems with a `cycles` value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CycleRangeError {
    #[error("malformed cycle range '{spec}': {reason}")]
    Malformed { spec: String, reason: String },
    #[error("cycle range '{spec}' ends before it starts")]
    Inverted { spec: String },
}

/// A rate limiter wait abandoned because the owning activity is stopping.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("rate limiter wait cancelled by stop signal")]
pub struct Cancelled;
