//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Activity definitions, run states and per-activity runtime state."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use r_eb_common::{ActivityDefaults, ConfigError, ParameterMap};
use r_eb_metrics::{Counter, MetricsRegistry, Timer};
use r_eb_rt::{CycleRange, CycleSource, RateLimiter, RateLimiterConfig, RateSpec};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{ConfigurationError, EngineError};
use crate::workload::Workload;

pub const ALIAS: &str = "alias";
pub const TYPE: &str = "type";
pub const CYCLES: &str = "cycles";
pub const THREADS: &str = "threads";
pub const STRIDE: &str = "stride";
pub const PHASES: &str = "phases";
pub const INTERVAL: &str = "interval";
pub const CYCLE_RATE: &str = "cyclerate";
pub const TARGET_RATE: &str = "targetrate";
pub const STRIDE_RATE: &str = "striderate";
pub const PHASE_RATE: &str = "phaserate";

/// Keys fixed for the lifetime of a running activity.
pub const STRUCTURAL_KEYS: [&str; 4] = [ALIAS, TYPE, CYCLES, STRIDE];

const LEGACY_RATE_KEYS: [&str; 2] = ["cocyclerate", "co_cyclerate"];

/// Lifecycle of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Initialized,
    Running,
    Stopping,
    Stopped,
    Finished,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Stopped | RunState::Finished)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Initialized => "initialized",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
            RunState::Finished => "finished",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject the retired spellings of a coordinated-omission cycle rate.
pub fn reject_legacy_keys<'a>(
    keys: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigurationError> {
    match keys
        .into_iter()
        .find(|key| LEGACY_RATE_KEYS.contains(key))
    {
        Some(key) => Err(ConfigurationError::Legacy {
            key: key.to_owned(),
        }),
        None => Ok(()),
    }
}

/// Parse an optional `<rate>[,<burst>[,<mode>[,<modulo>]]]` parameter.
pub fn rate_param(
    params: &ParameterMap,
    key: &str,
    default_burst_ratio: f64,
) -> Result<Option<RateLimiterConfig>, ConfigurationError> {
    params
        .get(key)
        .map(|value| {
            value
                .parse::<RateSpec>()
                .and_then(|spec| spec.to_config(default_burst_ratio))
                .map_err(|err| ConfigurationError::rate(key, err))
        })
        .transpose()
}

/// Cycle rate, honouring `targetrate` as an alias of `cyclerate`.
pub fn cycle_rate_param(
    params: &ParameterMap,
    default_burst_ratio: f64,
) -> Result<Option<RateLimiterConfig>, ConfigurationError> {
    match rate_param(params, CYCLE_RATE, default_burst_ratio)? {
        Some(config) => Ok(Some(config)),
        None => rate_param(params, TARGET_RATE, default_burst_ratio),
    }
}

/// The other spelling of the cycle rate key, if `key` is one of them.
pub(crate) fn cycle_rate_alias(key: &str) -> Option<&'static str> {
    match key {
        CYCLE_RATE => Some(TARGET_RATE),
        TARGET_RATE => Some(CYCLE_RATE),
        _ => None,
    }
}

/// Rate limits applied at the three pacing points of a worker loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActivityRates {
    pub cycle: Option<RateLimiterConfig>,
    pub stride: Option<RateLimiterConfig>,
    pub phase: Option<RateLimiterConfig>,
}

impl ActivityRates {
    pub fn from_params(
        params: &ParameterMap,
        default_burst_ratio: f64,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            cycle: cycle_rate_param(params, default_burst_ratio)?,
            stride: rate_param(params, STRIDE_RATE, default_burst_ratio)?,
            phase: rate_param(params, PHASE_RATE, default_burst_ratio)?,
        })
    }
}

/// Validated description of an activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityDef {
    pub alias: String,
    pub kind: String,
    pub cycles: CycleRange,
    pub threads: usize,
    pub stride: u64,
    pub phases: u32,
    pub interval: Duration,
    pub rates: ActivityRates,
    pub params: ParameterMap,
}

impl ActivityDef {
    pub fn from_params(
        params: ParameterMap,
        defaults: &ActivityDefaults,
    ) -> Result<Self, ConfigurationError> {
        reject_legacy_keys(params.iter().map(|(key, _)| key))?;

        let alias = params.require(ALIAS)?.trim().to_owned();
        validate_alias(&alias)?;
        let kind = params.require(TYPE)?.trim().to_owned();
        let cycles = match params.get(CYCLES) {
            Some(value) => value.parse::<CycleRange>()?,
            None => CycleRange::open(0),
        };
        let threads = params.get_usize(THREADS)?.unwrap_or(defaults.threads);
        let stride = params.get_count(STRIDE)?.unwrap_or(1);
        if stride == 0 {
            return Err(ConfigError::invalid(STRIDE, "0", "must be at least 1").into());
        }
        let phases = phases_param(&params)?.unwrap_or(1);
        let interval = params.get_millis(INTERVAL)?.unwrap_or(defaults.interval);
        let rates = ActivityRates::from_params(&params, defaults.burst_ratio)?;

        Ok(Self {
            alias,
            kind,
            cycles,
            threads,
            stride,
            phases,
            interval,
            rates,
            params,
        })
    }

    /// Parse a `key=value;key=value` definition.
    pub fn parse(spec: &str, defaults: &ActivityDefaults) -> Result<Self, ConfigurationError> {
        Self::from_params(ParameterMap::parse(spec)?, defaults)
    }
}

pub(crate) fn phases_param(params: &ParameterMap) -> Result<Option<u32>, ConfigurationError> {
    let Some(phases) = params.get_count(PHASES)? else {
        return Ok(None);
    };
    match u32::try_from(phases) {
        Ok(phases) if phases > 0 => Ok(Some(phases)),
        _ => Err(ConfigError::invalid(PHASES, &phases.to_string(), "must be between 1 and 2^32-1").into()),
    }
}

fn validate_alias(alias: &str) -> Result<(), ConfigurationError> {
    if alias.is_empty() || alias.contains('.') {
        return Err(ConfigurationError::InvalidAlias(alias.to_owned()));
    }
    Ok(())
}

/// Register `<limiter>.waittime` and `<limiter>.cumulative_delay` gauges
/// reading live from `limiter`.
pub(crate) fn register_limiter_gauges(
    metrics: &MetricsRegistry,
    alias: &str,
    limiter: &Arc<RateLimiter>,
) -> Result<(), EngineError> {
    let waittime = Arc::downgrade(limiter);
    metrics.gauge_fn(alias, &format!("{}.waittime", limiter.name()), move || {
        waittime
            .upgrade()
            .map(|limiter| nanos_i64(limiter.waittime()))
            .unwrap_or(0)
    })?;
    let cumulative = Arc::downgrade(limiter);
    metrics.gauge_fn(
        alias,
        &format!("{}.cumulative_delay", limiter.name()),
        move || {
            cumulative
                .upgrade()
                .map(|limiter| nanos_i64(limiter.cumulative_delay()))
                .unwrap_or(0)
        },
    )?;
    Ok(())
}

fn nanos_i64(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Limiters shared by every worker of one activity.
#[derive(Debug)]
pub struct ActivityLimiters {
    pub cycle: Arc<RateLimiter>,
    pub stride: Arc<RateLimiter>,
    pub phase: Arc<RateLimiter>,
}

impl ActivityLimiters {
    fn new(rates: &ActivityRates) -> Result<Self, ConfigurationError> {
        let build = |name: &str, key: &str, config: Option<RateLimiterConfig>| {
            RateLimiter::new(name, config)
                .map(Arc::new)
                .map_err(|err| ConfigurationError::rate(key, err))
        };
        Ok(Self {
            cycle: build("cycle", CYCLE_RATE, rates.cycle)?,
            stride: build("stride", STRIDE_RATE, rates.stride)?,
            phase: build("phase", PHASE_RATE, rates.phase)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RateLimiter>> {
        [&self.cycle, &self.stride, &self.phase].into_iter()
    }
}

/// Metric handles recorded on the worker hot path.
#[derive(Debug)]
pub struct ActivityInstruments {
    pub cycles: Arc<Timer>,
    pub strides: Arc<Timer>,
    pub phases: Arc<Timer>,
    pub errors: Arc<Counter>,
}

impl ActivityInstruments {
    fn register(metrics: &MetricsRegistry, alias: &str) -> Result<Self, EngineError> {
        Ok(Self {
            cycles: metrics.timer(alias, "cycles")?,
            strides: metrics.timer(alias, "strides")?,
            phases: metrics.timer(alias, "phases")?,
            errors: metrics.counter(alias, "errors")?,
        })
    }
}

/// Runtime state of one started activity, shared with its workers.
pub struct Activity {
    alias: String,
    kind: String,
    stride: u64,
    phases: AtomicU32,
    params: RwLock<ParameterMap>,
    source: CycleSource,
    limiters: ActivityLimiters,
    instruments: ActivityInstruments,
    workload: Arc<dyn Workload>,
    state: watch::Sender<RunState>,
    stop: watch::Sender<bool>,
    active_workers: AtomicUsize,
}

impl Activity {
    /// Build the runtime for `def`; metrics are registered under its alias.
    pub fn new(
        def: ActivityDef,
        workload: Arc<dyn Workload>,
        metrics: &MetricsRegistry,
    ) -> Result<Self, EngineError> {
        Self::with_stop(def, workload, metrics, watch::channel(false).0)
    }

    /// Like [`Activity::new`], using a stop channel the workload already listens on.
    pub fn with_stop(
        def: ActivityDef,
        workload: Arc<dyn Workload>,
        metrics: &MetricsRegistry,
        stop: watch::Sender<bool>,
    ) -> Result<Self, EngineError> {
        let limiters = ActivityLimiters::new(&def.rates)?;
        for limiter in limiters.iter() {
            register_limiter_gauges(metrics, &def.alias, limiter)?;
        }
        let instruments = ActivityInstruments::register(metrics, &def.alias)?;
        let (state, _) = watch::channel(RunState::Initialized);
        Ok(Self {
            alias: def.alias,
            kind: def.kind,
            stride: def.stride,
            phases: AtomicU32::new(def.phases),
            params: RwLock::new(def.params),
            source: CycleSource::new(def.cycles),
            limiters,
            instruments,
            workload,
            state,
            stop,
            active_workers: AtomicUsize::new(0),
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn phases(&self) -> u32 {
        self.phases.load(Ordering::Relaxed)
    }

    pub(crate) fn set_phases(&self, phases: u32) {
        self.phases.store(phases, Ordering::Relaxed);
    }

    pub fn source(&self) -> &CycleSource {
        &self.source
    }

    pub fn limiters(&self) -> &ActivityLimiters {
        &self.limiters
    }

    pub fn instruments(&self) -> &ActivityInstruments {
        &self.instruments
    }

    pub fn workload(&self) -> &Arc<dyn Workload> {
        &self.workload
    }

    pub fn params(&self) -> ParameterMap {
        self.params.read().clone()
    }

    /// Current value of `key`; `cyclerate` and `targetrate` read each other.
    pub fn param(&self, key: &str) -> Option<String> {
        let params = self.params.read();
        params
            .get(key)
            .or_else(|| cycle_rate_alias(key).and_then(|other| params.get(other)))
            .map(str::to_owned)
    }

    pub(crate) fn store_params(&self, params: ParameterMap) {
        *self.params.write() = params;
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Move from `from` to `to`; returns false when the activity was elsewhere.
    pub(crate) fn transition(&self, from: &[RunState], to: RunState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(activity = %self.alias, state = %to, "activity state changed");
        }
        moved
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    pub(crate) fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a worker exit; the last one out on an exhausted range finishes the activity.
    pub(crate) fn worker_exited(&self) {
        let remaining = self.active_workers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.source.is_exhausted() {
            self.transition(&[RunState::Running], RunState::Finished);
        }
    }

    /// Running with at least one worker and cycles left to claim.
    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
            && self.active_workers() > 0
            && !self.source.is_exhausted()
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("alias", &self.alias)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("range", &self.source.range())
            .field("active_workers", &self.active_workers())
            .finish()
    }
}
