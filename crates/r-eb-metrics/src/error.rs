//! ---
//! eb_section: "03-persistence-logging"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Metric registration errors."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("activity alias '{0}' must be non-empty and must not contain '.'")]
    InvalidAlias(String),
    #[error("metric '{name}' of activity '{alias}' is already registered as a {existing}")]
    KindMismatch {
        alias: String,
        name: String,
        existing: &'static str,
    },
}
