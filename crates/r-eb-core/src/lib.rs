//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Activity execution engine core."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! Activities run a workload over a range of cycles on a pool of tokio
//! workers, paced by rate limiters and observed through the metrics
//! registry. [`Scenario`] is the entry point for drivers.

pub mod activity;
pub mod controller;
pub mod diag;
pub mod error;
pub mod motor;
pub mod scenario;
pub mod workload;

pub use activity::{Activity, ActivityDef, ActivityRates, RunState};
pub use controller::{ActivityController, ActivitySummary};
pub use error::{ConfigurationError, EngineError, EngineResult, StateError, WorkUnitError};
pub use motor::WorkerPool;
pub use scenario::Scenario;
pub use workload::{Workload, WorkloadContext, WorkloadFactory, WorkloadRegistry};
