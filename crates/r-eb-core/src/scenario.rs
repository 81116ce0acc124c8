//! ---
//! eb_section: "04-configuration-orchestration"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Scenario facade handed to drivers and tests."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use r_eb_common::{EngineConfig, ParameterMap};
use r_eb_metrics::{MetricReading, MetricsRegistry};

use crate::activity::RunState;
use crate::controller::{ActivitySummary, ActivityController};
use crate::error::{EngineError, EngineResult};
use crate::workload::WorkloadRegistry;

/// One place to drive activities and read their metrics.
///
/// Cloning is cheap; clones share the same controller.
#[derive(Debug, Clone)]
pub struct Scenario {
    controller: Arc<ActivityController>,
}

impl Scenario {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_controller(Arc::new(ActivityController::new(config)))
    }

    pub fn with_workloads(config: EngineConfig, workloads: WorkloadRegistry) -> Self {
        Self::with_controller(Arc::new(ActivityController::with_workloads(config, workloads)))
    }

    pub fn with_controller(controller: Arc<ActivityController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<ActivityController> {
        &self.controller
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.controller.metrics()
    }

    pub async fn start(&self, params: ParameterMap) -> EngineResult<()> {
        self.controller.start(params).await
    }

    /// Start from a `key=value;key=value` definition.
    pub async fn start_str(&self, spec: &str) -> EngineResult<()> {
        let params = ParameterMap::parse(spec).map_err(EngineError::from)?;
        self.start(params).await
    }

    pub async fn run(&self, params: ParameterMap, limit: Duration) -> EngineResult<RunState> {
        self.controller.run(params, limit).await
    }

    pub async fn stop(&self, alias: &str) -> EngineResult<RunState> {
        self.controller.stop(alias).await
    }

    pub fn is_running_activity(&self, alias: &str) -> bool {
        self.controller.is_running_activity(alias)
    }

    pub async fn await_activity(&self, alias: &str, limit: Option<Duration>) -> EngineResult<RunState> {
        self.controller.await_activity(alias, limit).await
    }

    pub fn set_param(&self, alias: &str, key: &str, value: &str) -> EngineResult<()> {
        self.controller.set_param(alias, key, value)
    }

    pub fn param(&self, alias: &str, key: &str) -> EngineResult<Option<String>> {
        self.controller.param(alias, key)
    }

    pub fn activities(&self) -> Vec<ActivitySummary> {
        self.controller.activities()
    }

    pub async fn wait_millis(&self, millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    /// Read `alias.metric.statistic`; `None` when nothing by that name exists.
    pub fn metric(&self, path: &str) -> Option<f64> {
        self.reading(path).map(|reading| reading.as_f64())
    }

    pub fn reading(&self, path: &str) -> Option<MetricReading> {
        self.controller.metrics().lookup(path)
    }

    pub async fn shutdown(&self) {
        self.controller.stop_all().await;
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
