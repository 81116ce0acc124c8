//! ---
//! eb_section: "04-configuration-orchestration"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Activity controller: start, stop, await and live parameter changes."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::RwLock;
use r_eb_common::{EngineConfig, ParameterMap};
use r_eb_logging::{log_system_event, LogContext, SystemEventOutcome};
use r_eb_metrics::MetricsRegistry;
use r_eb_rt::RateLimiter;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::activity::{
    cycle_rate_alias, phases_param, rate_param, reject_legacy_keys, Activity, ActivityDef,
    RunState, ALIAS, CYCLE_RATE, PHASES, PHASE_RATE, STRIDE_RATE, STRUCTURAL_KEYS, TARGET_RATE, THREADS,
};
use crate::error::{ConfigurationError, EngineError, EngineResult, StateError};
use crate::motor::WorkerPool;
use crate::workload::{WorkloadContext, WorkloadRegistry};

#[derive(Debug, Clone)]
struct ActivityRuntime {
    activity: Arc<Activity>,
    pool: Arc<WorkerPool>,
}

/// Summary row returned by [`ActivityController::activities`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySummary {
    pub alias: String,
    pub kind: String,
    pub state: RunState,
    pub threads: usize,
    pub active_workers: usize,
    /// Unclaimed cycles, `None` for open-ended ranges.
    pub remaining: Option<u64>,
}

/// A validated parameter change waiting to be applied.
enum ParamChange {
    Threads(usize),
    Rate(Arc<RateLimiter>, Option<r_eb_rt::RateLimiterConfig>),
    Phases(u32),
    Workload,
}

/// Owns every activity started in this process.
#[derive(Debug)]
pub struct ActivityController {
    config: EngineConfig,
    metrics: Arc<MetricsRegistry>,
    workloads: WorkloadRegistry,
    activities: RwLock<IndexMap<String, ActivityRuntime>>,
}

impl ActivityController {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_workloads(config, WorkloadRegistry::with_builtin())
    }

    pub fn with_workloads(config: EngineConfig, workloads: WorkloadRegistry) -> Self {
        Self {
            config,
            metrics: Arc::new(MetricsRegistry::new()),
            workloads,
            activities: RwLock::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    /// Validate `params`, start the workers and return without waiting.
    ///
    /// Configuration errors are reported before anything is registered.
    pub async fn start(&self, params: ParameterMap) -> EngineResult<()> {
        let def = ActivityDef::from_params(params, &self.config.defaults)?;
        let factory = self.workloads.get(&def.kind)?;
        let alias = def.alias.clone();
        let default_threads = def.threads;

        let runtime = {
            let mut activities = self.activities.write();
            if let Some(existing) = activities.get(&alias) {
                if !existing.activity.state().is_terminal() {
                    return Err(StateError::AlreadyRunning(alias).into());
                }
            }
            self.metrics.begin_activity(&alias)?;
            let (stop, stop_signal) = watch::channel(false);
            let workload = factory.create(WorkloadContext {
                alias: &alias,
                params: &def.params,
                defaults: &self.config.defaults,
                metrics: &self.metrics,
                stop: stop_signal,
            })?;
            let activity = Arc::new(Activity::with_stop(def, workload, &self.metrics, stop)?);
            let runtime = ActivityRuntime {
                pool: Arc::new(WorkerPool::new(activity.clone())),
                activity,
            };
            activities.insert(alias.clone(), runtime.clone());
            runtime
        };
        let activity = &runtime.activity;
        let ctx = LogContext::new()
            .with_activity(&alias)
            .with_workload(activity.kind());

        if let Err(err) = activity.workload().init().await {
            activity.transition(&[RunState::Initialized], RunState::Stopped);
            log_system_event(
                Some(&ctx),
                "activity.start",
                &format!("workload init failed: {}", err),
                SystemEventOutcome::Fault,
            );
            return Err(err);
        }
        if !activity.transition(&[RunState::Initialized], RunState::Running) {
            info!(activity = %alias, state = %activity.state(), "activity stopped during init");
            return Ok(());
        }

        let threads = activity
            .params()
            .get_usize(THREADS)
            .ok()
            .flatten()
            .unwrap_or(default_threads);
        runtime.pool.resize(threads);
        if activity.active_workers() == 0 && activity.source().is_exhausted() {
            activity.transition(&[RunState::Running], RunState::Finished);
        }
        spawn_supervisor(runtime.clone(), self.config.shutdown_grace);

        log_system_event(
            Some(&ctx),
            "activity.start",
            &format!(
                "activity started with {} threads over cycles {}",
                threads,
                activity.source().range()
            ),
            SystemEventOutcome::Success,
        );
        Ok(())
    }

    /// Start, wait for completion or `limit`, stop, and report the final state.
    pub async fn run(&self, params: ParameterMap, limit: Duration) -> EngineResult<RunState> {
        let alias = params.require(ALIAS)?.trim().to_owned();
        self.start(params).await?;
        match self.await_activity(&alias, Some(limit)).await {
            Ok(state) => {
                self.runtime(&alias)?
                    .pool
                    .shutdown(self.config.shutdown_grace)
                    .await;
                Ok(state)
            }
            Err(EngineError::State(StateError::Timeout { .. })) => {
                warn!(activity = %alias, limit = ?limit, "activity timed out, stopping");
                self.stop(&alias).await
            }
            Err(err) => Err(err),
        }
    }

    /// Stop an activity cooperatively; repeated calls are harmless.
    pub async fn stop(&self, alias: &str) -> EngineResult<RunState> {
        let runtime = self.runtime(alias)?;
        let activity = &runtime.activity;
        if !activity.transition(&[RunState::Initialized, RunState::Running], RunState::Stopping) {
            if activity.state() == RunState::Stopping {
                return self.await_activity(alias, None).await;
            }
            return Ok(activity.state());
        }

        activity.request_stop();
        let aborted = runtime.pool.shutdown(self.config.shutdown_grace).await;
        activity.transition(&[RunState::Stopping], RunState::Stopped);

        let ctx = LogContext::new()
            .with_activity(alias)
            .with_workload(activity.kind());
        if aborted > 0 {
            log_system_event(
                Some(&ctx),
                "activity.stop",
                &format!("{} workers aborted after {:?}", aborted, self.config.shutdown_grace),
                SystemEventOutcome::Degraded,
            );
        } else {
            log_system_event(Some(&ctx), "activity.stop", "activity stopped", SystemEventOutcome::Success);
        }
        Ok(activity.state())
    }

    /// Stop every activity that has not terminated yet.
    pub async fn stop_all(&self) {
        let aliases: Vec<String> = self.activities.read().keys().cloned().collect();
        for alias in aliases {
            if let Err(err) = self.stop(&alias).await {
                warn!(activity = %alias, error = %err, "failed to stop activity");
            }
        }
    }

    /// True while the activity runs workers that still have cycles to claim.
    pub fn is_running_activity(&self, alias: &str) -> bool {
        self.activities
            .read()
            .get(alias)
            .map(|runtime| runtime.activity.is_running())
            .unwrap_or(false)
    }

    /// Wait until the activity terminates, or fail with [`StateError::Timeout`].
    pub async fn await_activity(&self, alias: &str, limit: Option<Duration>) -> EngineResult<RunState> {
        let activity = self.runtime(alias)?.activity;
        let mut states = activity.subscribe_state();
        let outcome = match limit {
            Some(limit) => {
                match tokio::time::timeout(limit, states.wait_for(RunState::is_terminal)).await {
                    Ok(result) => result.map(|state| *state),
                    Err(_) => {
                        return Err(StateError::Timeout {
                            alias: alias.to_owned(),
                            waited: limit,
                        }
                        .into())
                    }
                }
            }
            None => states.wait_for(RunState::is_terminal).await.map(|state| *state),
        };
        outcome.map_err(|_| EngineError::Invariant(format!("state channel of '{}' closed", alias)))
    }

    pub fn state(&self, alias: &str) -> EngineResult<RunState> {
        Ok(self.runtime(alias)?.activity.state())
    }

    /// Change one parameter of a live activity.
    ///
    /// The value is validated before anything is applied; a rejected value
    /// leaves the activity untouched.
    pub fn set_param(&self, alias: &str, key: &str, value: &str) -> EngineResult<()> {
        reject_legacy_keys([key])?;
        let runtime = self.runtime(alias)?;
        let activity = &runtime.activity;
        if activity.state().is_terminal() {
            return Err(StateError::Terminal(alias.to_owned()).into());
        }
        if STRUCTURAL_KEYS.contains(&key) {
            return Err(ConfigurationError::Immutable {
                key: key.to_owned(),
            }
            .into());
        }

        let mut params = activity.params();
        if let Some(other) = cycle_rate_alias(key) {
            params.remove(other);
        }
        params.set(key, value);
        let burst_ratio = self.config.defaults.burst_ratio;
        let limiters = activity.limiters();
        let change = match key {
            THREADS => ParamChange::Threads(
                params.get_usize(THREADS)?.unwrap_or(self.config.defaults.threads),
            ),
            CYCLE_RATE | TARGET_RATE => {
                ParamChange::Rate(limiters.cycle.clone(), rate_param(&params, key, burst_ratio)?)
            }
            STRIDE_RATE => {
                ParamChange::Rate(limiters.stride.clone(), rate_param(&params, key, burst_ratio)?)
            }
            PHASE_RATE => {
                ParamChange::Rate(limiters.phase.clone(), rate_param(&params, key, burst_ratio)?)
            }
            PHASES => ParamChange::Phases(phases_param(&params)?.unwrap_or(1)),
            _ => ParamChange::Workload,
        };
        activity.workload().on_params_update(&params)?;

        match change {
            ParamChange::Threads(threads) => {
                if activity.state() == RunState::Running {
                    runtime.pool.resize(threads);
                }
            }
            ParamChange::Rate(limiter, config) => limiter
                .reconfigure(config)
                .map_err(|err| ConfigurationError::rate(key, err))?,
            ParamChange::Phases(phases) => activity.set_phases(phases),
            ParamChange::Workload => {}
        }
        activity.store_params(params);
        info!(activity = %alias, key, value, "activity parameter updated");
        Ok(())
    }

    pub fn param(&self, alias: &str, key: &str) -> EngineResult<Option<String>> {
        Ok(self.runtime(alias)?.activity.param(key))
    }

    pub fn params(&self, alias: &str) -> EngineResult<ParameterMap> {
        Ok(self.runtime(alias)?.activity.params())
    }

    pub fn activities(&self) -> Vec<ActivitySummary> {
        self.activities
            .read()
            .values()
            .map(|runtime| {
                let activity = &runtime.activity;
                ActivitySummary {
                    alias: activity.alias().to_owned(),
                    kind: activity.kind().to_owned(),
                    state: activity.state(),
                    threads: runtime.pool.threads(),
                    active_workers: activity.active_workers(),
                    remaining: activity.source().remaining(),
                }
            })
            .collect()
    }

    fn runtime(&self, alias: &str) -> Result<ActivityRuntime, StateError> {
        self.activities
            .read()
            .get(alias)
            .cloned()
            .ok_or_else(|| StateError::UnknownActivity(alias.to_owned()))
    }
}

/// Join the workers of an activity once its range is exhausted.
fn spawn_supervisor(runtime: ActivityRuntime, grace: Duration) {
    tokio::spawn(async move {
        let activity = &runtime.activity;
        let mut states = activity.subscribe_state();
        let finished = match states
            .wait_for(|state| *state != RunState::Running)
            .await
        {
            Ok(state) => *state == RunState::Finished,
            Err(_) => false,
        };
        if !finished {
            return;
        }
        runtime.pool.shutdown(grace).await;
        let ctx = LogContext::new()
            .with_activity(activity.alias())
            .with_workload(activity.kind());
        log_system_event(
            Some(&ctx),
            "activity.finish",
            &format!("activity completed cycles {}", activity.source().range()),
            SystemEventOutcome::Success,
        );
    });
}
