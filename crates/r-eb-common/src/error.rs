//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Shared primitives and utilities for the engine runtime."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use thiserror::Error;

/// Failure to interpret a count or duration literal such as `1K` or `250ms`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("empty value")]
    Empty,
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("unrecognised unit '{unit}' in '{spec}'")]
    UnknownUnit { spec: String, unit: String },
    #[error("'{0}' overflows a 64-bit value")]
    Overflow(String),
}

/// Problems with user supplied activity parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required parameter '{0}'")]
    Missing(String),
    #[error("parameter '{key}' has invalid value '{value}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("malformed parameter entry '{0}', expected key=value")]
    MalformedEntry(String),
}

impl ConfigError {
    pub fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_owned(),
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}
