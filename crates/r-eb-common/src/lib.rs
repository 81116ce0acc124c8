//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Shared primitives and utilities for the engine runtime."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! Core shared primitives for the R-EB workspace.
//! This crate exposes activity parameter maps, count and duration unit
//! parsing, engine configuration loading and tracing setup consumed
//! across the workspace.

pub mod config;
pub mod error;
pub mod logging;
pub mod params;
pub mod time;
pub mod units;

pub use config::{ActivityDefaults, EngineConfig, LoadedEngineConfig, LoggingConfig, MetricsConfig};
pub use error::{ConfigError, UnitError};
pub use logging::{init_tracing, LogFormat};
pub use params::ParameterMap;
