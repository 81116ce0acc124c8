//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Diagnostic workload used to exercise pacing and metrics."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! The `diag` workload does no real work. It can be slowed down by its own
//! rate limiter (`diagrate`), made to fail every Nth cycle (`errormodulo`),
//! log every Nth cycle (`modulo`) and emit a periodic report whose
//! scheduling delay lands in the `diag.delay` gauge (`interval`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use r_eb_common::{ConfigError, ParameterMap};
use r_eb_logging::{eb_debug, eb_info, LogContext};
use r_eb_metrics::Gauge;
use r_eb_rt::RateLimiter;
use tokio::sync::watch;

use crate::activity::{rate_param, register_limiter_gauges, INTERVAL};
use crate::error::{ConfigurationError, EngineError, WorkUnitError};
use crate::workload::{Workload, WorkloadContext, WorkloadFactory};

pub const DIAG_RATE: &str = "diagrate";
pub const ERROR_MODULO: &str = "errormodulo";
pub const MODULO: &str = "modulo";
pub const INIT_DELAY: &str = "initdelay";

const DEFAULT_REPORT_MODULO: u64 = 10_000_000;

pub struct DiagFactory;

impl WorkloadFactory for DiagFactory {
    fn kind(&self) -> &str {
        "diag"
    }

    fn create(&self, context: WorkloadContext<'_>) -> Result<Arc<dyn Workload>, EngineError> {
        let settings = DiagSettings::from_params(context.params, context.defaults.interval)?;
        let limiter = Arc::new(
            RateLimiter::new(
                "diag",
                rate_param(context.params, DIAG_RATE, context.defaults.burst_ratio)?,
            )
            .map_err(|err| ConfigurationError::rate(DIAG_RATE, err))?,
        );
        register_limiter_gauges(context.metrics, context.alias, &limiter)?;
        let delay = context.metrics.gauge(context.alias, "diag.delay")?;
        let init_delay = context
            .params
            .get_millis(INIT_DELAY)
            .map_err(ConfigurationError::from)?
            .unwrap_or(Duration::ZERO);

        Ok(Arc::new(DiagWorkload {
            alias: context.alias.to_owned(),
            default_burst_ratio: context.defaults.burst_ratio,
            default_interval: context.defaults.interval,
            init_delay,
            limiter,
            stop: context.stop,
            delay,
            settings: Mutex::new(settings),
            origin: Instant::now(),
            last_report: AtomicU64::new(0),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DiagSettings {
    error_modulo: Option<u64>,
    report_modulo: u64,
    /// `None` disables the periodic report.
    interval: Option<Duration>,
}

impl DiagSettings {
    fn from_params(params: &ParameterMap, default_interval: Duration) -> Result<Self, ConfigurationError> {
        let error_modulo = params.get_count(ERROR_MODULO)?;
        if error_modulo == Some(0) {
            return Err(ConfigError::invalid(ERROR_MODULO, "0", "must be at least 1").into());
        }
        let report_modulo = params.get_count(MODULO)?.unwrap_or(DEFAULT_REPORT_MODULO);
        if report_modulo == 0 {
            return Err(ConfigError::invalid(MODULO, "0", "must be at least 1").into());
        }
        let interval = params.get_millis(INTERVAL)?.unwrap_or(default_interval);
        Ok(Self {
            error_modulo,
            report_modulo,
            interval: (!interval.is_zero()).then_some(interval),
        })
    }
}

/// Diagnostic workload shared by all workers of one activity.
pub struct DiagWorkload {
    alias: String,
    default_burst_ratio: f64,
    default_interval: Duration,
    init_delay: Duration,
    limiter: Arc<RateLimiter>,
    stop: watch::Receiver<bool>,
    delay: Arc<Gauge>,
    settings: Mutex<DiagSettings>,
    origin: Instant,
    last_report: AtomicU64,
}

impl DiagWorkload {
    /// Emit the interval report when it is due; at most one caller wins each slot.
    fn maybe_report(&self, cycle: u64, phase: u32, interval: Duration) {
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        let now_ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        let last = self.last_report.load(Ordering::Acquire);
        let since = now_ms.saturating_sub(last);
        if since <= interval_ms {
            return;
        }
        if self
            .last_report
            .compare_exchange(last, last + interval_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let delay = since - interval_ms;
        self.delay.set(i64::try_from(delay).unwrap_or(i64::MAX));
        let ctx = LogContext::new()
            .with_activity(&self.alias)
            .with_workload("diag")
            .with_cycle(cycle);
        eb_info!(context = ctx, "diag interval report, phase={}, report delay={}ms", phase, delay);
    }
}

#[async_trait]
impl Workload for DiagWorkload {
    async fn init(&self) -> Result<(), EngineError> {
        if !self.init_delay.is_zero() {
            eb_debug!(
                context = LogContext::new().with_activity(&self.alias),
                "delaying diag init for {:?}",
                self.init_delay
            );
            tokio::time::sleep(self.init_delay).await;
        }
        Ok(())
    }

    async fn run_phase(&self, cycle: u64, phase: u32) -> Result<(), WorkUnitError> {
        let mut stop = self.stop.clone();
        if self.limiter.acquire_or_stop(&mut stop).await.is_err() {
            return Err(WorkUnitError::Interrupted { cycle, phase });
        }

        let settings = *self.settings.lock();
        if let Some(interval) = settings.interval {
            self.maybe_report(cycle, phase, interval);
        }
        if cycle % settings.report_modulo == 0 {
            let ctx = LogContext::new()
                .with_activity(&self.alias)
                .with_workload("diag")
                .with_cycle(cycle);
            eb_info!(context = ctx, "diag modulo report, phase={}", phase);
        }
        match settings.error_modulo {
            Some(modulo) if cycle % modulo == 0 => Err(WorkUnitError::failed(
                cycle,
                phase,
                format!("diag fails every {} cycles", modulo),
            )),
            _ => Ok(()),
        }
    }

    fn on_params_update(&self, params: &ParameterMap) -> Result<(), ConfigurationError> {
        let settings = DiagSettings::from_params(params, self.default_interval)?;
        let rate = rate_param(params, DIAG_RATE, self.default_burst_ratio)?;
        if rate != self.limiter.config() {
            self.limiter
                .reconfigure(rate)
                .map_err(|err| ConfigurationError::rate(DIAG_RATE, err))?;
        }
        *self.settings.lock() = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use r_eb_common::ActivityDefaults;
    use r_eb_metrics::MetricsRegistry;

    use super::*;

    fn build(spec: &str) -> (Arc<dyn Workload>, Arc<MetricsRegistry>) {
        let (workload, metrics, _) = build_with_stop(spec);
        (workload, metrics)
    }

    fn build_with_stop(spec: &str) -> (Arc<dyn Workload>, Arc<MetricsRegistry>, watch::Sender<bool>) {
        let params = ParameterMap::parse(spec).unwrap();
        let metrics = Arc::new(MetricsRegistry::new());
        let defaults = ActivityDefaults::default();
        let (stop, stop_signal) = watch::channel(false);
        let workload = DiagFactory
            .create(WorkloadContext {
                alias: "diag_test",
                params: &params,
                defaults: &defaults,
                metrics: &metrics,
                stop: stop_signal,
            })
            .unwrap();
        (workload, metrics, stop)
    }

    #[tokio::test]
    async fn error_modulo_fails_matching_cycles() {
        let (workload, _) = build("errormodulo=3;interval=0");
        let failures: Vec<u64> = {
            let mut failures = Vec::new();
            for cycle in 0..10 {
                if let Err(err) = workload.run_phase(cycle, 0).await {
                    failures.push(err.cycle());
                }
            }
            failures
        };
        assert_eq!(failures, vec![0, 3, 6, 9]);
    }

    #[tokio::test]
    async fn no_failures_by_default() {
        let (workload, _) = build("interval=0");
        for cycle in 0..100 {
            workload.run_phase(cycle, 0).await.unwrap();
        }
    }

    #[tokio::test]
    async fn params_update_reconfigures_the_diag_limiter() {
        let (workload, metrics) = build("diagrate=100");
        assert!(metrics.lookup("diag_test.diag.waittime.value").is_some());
        workload
            .on_params_update(&ParameterMap::parse("diagrate=5000,1.0,co;errormodulo=2").unwrap())
            .unwrap();
        assert!(workload.run_phase(4, 0).await.is_err());
        assert!(workload.run_phase(5, 0).await.is_ok());
    }

    #[test]
    fn invalid_knobs_are_rejected() {
        let params = ParameterMap::parse("errormodulo=0").unwrap();
        assert!(DiagSettings::from_params(&params, Duration::from_secs(1)).is_err());
        let params = ParameterMap::parse("diagrate=fast").unwrap();
        let metrics = Arc::new(MetricsRegistry::new());
        let defaults = ActivityDefaults::default();
        let result = DiagFactory.create(WorkloadContext {
            alias: "diag_test",
            params: &params,
            defaults: &defaults,
            metrics: &metrics,
            stop: watch::channel(false).1,
        });
        assert!(matches!(
            result.err(),
            Some(EngineError::Configuration(ConfigurationError::Rate { .. }))
        ));
    }

    #[tokio::test]
    async fn interval_report_records_delay() {
        let (workload, metrics) = build("interval=1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        workload.run_phase(1, 0).await.unwrap();
        let delay = metrics
            .lookup("diag_test.diag.delay.value")
            .map(|reading| reading.as_f64())
            .unwrap();
        assert!(delay >= 10.0, "delay was {delay}");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_the_diag_rate_wait() {
        let (workload, _, stop) = build_with_stop("diagrate=1;interval=0");
        workload.run_phase(0, 0).await.unwrap();

        let waiting = {
            let workload = workload.clone();
            tokio::spawn(async move { workload.run_phase(1, 0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.send_replace(true);
        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(WorkUnitError::Interrupted { cycle: 1, phase: 0 })));
    }
}
