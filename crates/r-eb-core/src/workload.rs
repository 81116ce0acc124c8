//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Workload abstraction and the registry of workload kinds."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use r_eb_common::{ActivityDefaults, ParameterMap};
use r_eb_metrics::MetricsRegistry;
use tokio::sync::watch;

use crate::diag::DiagFactory;
use crate::error::{ConfigurationError, EngineError, WorkUnitError};

/// The work performed for each phase of each cycle.
///
/// One instance is shared by every worker of an activity, so implementations
/// keep their mutable state behind atomics or short locks.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Called once before any worker starts.
    async fn init(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Execute one phase of one cycle.
    async fn run_phase(&self, cycle: u64, phase: u32) -> Result<(), WorkUnitError>;

    /// Validate and apply changed parameters. An error leaves the previous
    /// settings in place.
    fn on_params_update(&self, _params: &ParameterMap) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

/// Everything a factory may consult when building a workload.
pub struct WorkloadContext<'a> {
    pub alias: &'a str,
    pub params: &'a ParameterMap,
    pub defaults: &'a ActivityDefaults,
    pub metrics: &'a Arc<MetricsRegistry>,
    /// Flips to `true` when the activity is asked to stop.
    pub stop: watch::Receiver<bool>,
}

/// Builds workloads of one kind, selected by the `type` parameter.
pub trait WorkloadFactory: Send + Sync {
    fn kind(&self) -> &str;

    fn create(&self, context: WorkloadContext<'_>) -> Result<Arc<dyn Workload>, EngineError>;
}

/// Known workload kinds.
#[derive(Clone)]
pub struct WorkloadRegistry {
    factories: IndexMap<String, Arc<dyn WorkloadFactory>>,
}

impl WorkloadRegistry {
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Registry holding the built-in `diag` kind.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DiagFactory));
        registry
    }

    /// Add a kind, replacing any factory with the same name.
    pub fn register(&mut self, factory: Arc<dyn WorkloadFactory>) {
        self.factories.insert(factory.kind().to_owned(), factory);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn WorkloadFactory>, ConfigurationError> {
        self.factories
            .get(kind)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownType(kind.to_owned()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for WorkloadRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for WorkloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}
