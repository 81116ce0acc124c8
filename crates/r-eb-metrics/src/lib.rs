//! ---
//! eb_section: "03-persistence-logging"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Activity metrics collection and export utilities."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! Metrics for running activities.
//!
//! Workers record through `Arc` handles whose hot path is a handful of
//! atomic operations. Control callers read through [`MetricsRegistry`]
//! either per metric or with a dotted path such as
//! `"myactivity.cycles.oneMinuteRate"`.

pub mod collector;
pub mod error;
pub mod instruments;
pub mod registry;
pub mod server;

pub use collector::EngineCollector;
pub use error::MetricsError;
pub use instruments::{Counter, Ewma, Gauge, Timer};
pub use registry::{MetricReading, MetricSnapshot, MetricsRegistry, Statistic, TimerSnapshot};
pub use server::{new_registry, spawn_http_server, MetricsServer, SharedRegistry};

pub use prometheus;
