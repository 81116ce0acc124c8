//! ---
//! eb_section: "03-persistence-logging"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Per-activity metric namespaces and dotted-path queries."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::error::MetricsError;
use crate::instruments::{Counter, Gauge, Timer};

#[derive(Debug, Clone)]
enum Metric {
    Counter(Arc<Counter>),
    Timer(Arc<Timer>),
    Gauge(Arc<Gauge>),
}

impl Metric {
    fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Timer(_) => "timer",
            Metric::Gauge(_) => "gauge",
        }
    }

    fn snapshot(&self) -> MetricSnapshot {
        match self {
            Metric::Counter(counter) => MetricSnapshot::Counter {
                count: counter.get(),
            },
            Metric::Timer(timer) => MetricSnapshot::Timer(TimerSnapshot {
                count: timer.count(),
                mean_rate: timer.mean_rate(),
                one_minute_rate: timer.one_minute_rate(),
                mean_latency_nanos: timer.mean_latency_nanos(),
                max_latency_nanos: timer.max_latency_nanos(),
            }),
            Metric::Gauge(gauge) => MetricSnapshot::Gauge {
                value: gauge.value(),
            },
        }
    }
}

#[derive(Debug)]
struct Namespace {
    started: Instant,
    metrics: RwLock<IndexMap<String, Metric>>,
}

impl Namespace {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            metrics: RwLock::new(IndexMap::new()),
        }
    }
}

/// Point-in-time view of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub count: u64,
    pub mean_rate: f64,
    pub one_minute_rate: f64,
    pub mean_latency_nanos: f64,
    pub max_latency_nanos: u64,
}

/// Point-in-time view of any metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MetricSnapshot {
    Counter { count: u64 },
    Timer(TimerSnapshot),
    Gauge { value: i64 },
}

impl MetricSnapshot {
    pub fn statistic(&self, statistic: Statistic) -> Option<f64> {
        match (self, statistic) {
            (MetricSnapshot::Counter { count }, Statistic::Count | Statistic::Value) => {
                Some(*count as f64)
            }
            (MetricSnapshot::Gauge { value }, Statistic::Value) => Some(*value as f64),
            (MetricSnapshot::Timer(timer), statistic) => match statistic {
                Statistic::Count => Some(timer.count as f64),
                Statistic::MeanRate => Some(timer.mean_rate),
                Statistic::OneMinuteRate => Some(timer.one_minute_rate),
                Statistic::MeanLatencyNanos => Some(timer.mean_latency_nanos),
                Statistic::MaxLatencyNanos => Some(timer.max_latency_nanos as f64),
                Statistic::Value => None,
            },
            _ => None,
        }
    }
}

/// Statistic selected by the last segment of a dotted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Count,
    MeanRate,
    OneMinuteRate,
    Value,
    MeanLatencyNanos,
    MaxLatencyNanos,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Count => "count",
            Statistic::MeanRate => "meanRate",
            Statistic::OneMinuteRate => "oneMinuteRate",
            Statistic::Value => "value",
            Statistic::MeanLatencyNanos => "meanLatencyNanos",
            Statistic::MaxLatencyNanos => "maxLatencyNanos",
        }
    }
}

impl FromStr for Statistic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Statistic::Count),
            "meanRate" => Ok(Statistic::MeanRate),
            "oneMinuteRate" => Ok(Statistic::OneMinuteRate),
            "value" => Ok(Statistic::Value),
            "meanLatencyNanos" => Ok(Statistic::MeanLatencyNanos),
            "maxLatencyNanos" => Ok(Statistic::MaxLatencyNanos),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a dotted-path query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricReading {
    Number(f64),
    Metric(MetricSnapshot),
}

impl MetricReading {
    /// The numeric value; whole-metric readings yield their primary statistic.
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricReading::Number(value) => *value,
            MetricReading::Metric(MetricSnapshot::Counter { count }) => *count as f64,
            MetricReading::Metric(MetricSnapshot::Timer(timer)) => timer.count as f64,
            MetricReading::Metric(MetricSnapshot::Gauge { value }) => *value as f64,
        }
    }
}

/// Registry of every activity's metrics, keyed by alias then metric name.
///
/// Registration takes a write lock on one namespace; recording goes through
/// the returned handles and never touches the registry again.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    namespaces: RwLock<IndexMap<String, Arc<Namespace>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the namespace of `alias` and restart its mean-rate clock.
    ///
    /// Handles obtained before the reset keep working but are no longer
    /// visible through the registry.
    pub fn begin_activity(&self, alias: &str) -> Result<(), MetricsError> {
        validate_alias(alias)?;
        let previous = self
            .namespaces
            .write()
            .insert(alias.to_owned(), Arc::new(Namespace::new()));
        if previous.is_some() {
            debug!(activity = %alias, "metrics namespace reset");
        }
        Ok(())
    }

    pub fn counter(&self, alias: &str, name: &str) -> Result<Arc<Counter>, MetricsError> {
        let metric = self.get_or_register(alias, name, || {
            Metric::Counter(Arc::new(Counter::new()))
        })?;
        match metric {
            Metric::Counter(counter) => Ok(counter),
            other => Err(mismatch(alias, name, &other)),
        }
    }

    pub fn timer(&self, alias: &str, name: &str) -> Result<Arc<Timer>, MetricsError> {
        let namespace = self.namespace(alias)?;
        let started = namespace.started;
        let metric = register_in(&namespace, name, || {
            Metric::Timer(Arc::new(Timer::new(started)))
        });
        match metric {
            Metric::Timer(timer) => Ok(timer),
            other => Err(mismatch(alias, name, &other)),
        }
    }

    pub fn gauge(&self, alias: &str, name: &str) -> Result<Arc<Gauge>, MetricsError> {
        let metric = self.get_or_register(alias, name, || Metric::Gauge(Arc::new(Gauge::new())))?;
        match metric {
            Metric::Gauge(gauge) => Ok(gauge),
            other => Err(mismatch(alias, name, &other)),
        }
    }

    /// Register a callback gauge, replacing any gauge of the same name.
    pub fn gauge_fn(
        &self,
        alias: &str,
        name: &str,
        source: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Result<Arc<Gauge>, MetricsError> {
        let namespace = self.namespace(alias)?;
        let mut metrics = namespace.metrics.write();
        if let Some(existing) = metrics.get(name) {
            if !matches!(existing, Metric::Gauge(_)) {
                return Err(mismatch(alias, name, existing));
            }
        }
        let gauge = Arc::new(Gauge::from_fn(source));
        metrics.insert(name.to_owned(), Metric::Gauge(gauge.clone()));
        Ok(gauge)
    }

    pub fn increment(&self, alias: &str, name: &str) -> Result<(), MetricsError> {
        self.counter(alias, name)?.inc();
        Ok(())
    }

    pub fn set_gauge(&self, alias: &str, name: &str, value: i64) -> Result<(), MetricsError> {
        self.gauge(alias, name)?.set(value);
        Ok(())
    }

    pub fn snapshot(&self, alias: &str, name: &str) -> Option<MetricSnapshot> {
        let namespace = self.namespaces.read().get(alias).cloned()?;
        let metric = namespace.metrics.read().get(name).cloned()?;
        Some(metric.snapshot())
    }

    /// Every metric of `alias` in registration order.
    pub fn snapshot_activity(&self, alias: &str) -> Vec<(String, MetricSnapshot)> {
        let Some(namespace) = self.namespaces.read().get(alias).cloned() else {
            return Vec::new();
        };
        let metrics: Vec<(String, Metric)> = namespace
            .metrics
            .read()
            .iter()
            .map(|(name, metric)| (name.clone(), metric.clone()))
            .collect();
        metrics
            .into_iter()
            .map(|(name, metric)| (name, metric.snapshot()))
            .collect()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.namespaces.read().keys().cloned().collect()
    }

    /// Resolve `alias.metric[.statistic]`.
    ///
    /// Metric names may themselves contain dots (`cycle.waittime`), so the
    /// full remainder is tried as a metric name before the last segment is
    /// read as a statistic. Anything unresolved is `None`.
    pub fn lookup(&self, path: &str) -> Option<MetricReading> {
        let (alias, rest) = path.split_once('.')?;
        if let Some(snapshot) = self.snapshot(alias, rest) {
            return Some(MetricReading::Metric(snapshot));
        }
        let (name, statistic) = rest.rsplit_once('.')?;
        let statistic: Statistic = statistic.parse().ok()?;
        self.snapshot(alias, name)?
            .statistic(statistic)
            .map(MetricReading::Number)
    }

    fn namespace(&self, alias: &str) -> Result<Arc<Namespace>, MetricsError> {
        if let Some(namespace) = self.namespaces.read().get(alias) {
            return Ok(namespace.clone());
        }
        validate_alias(alias)?;
        Ok(self
            .namespaces
            .write()
            .entry(alias.to_owned())
            .or_insert_with(|| Arc::new(Namespace::new()))
            .clone())
    }

    fn get_or_register(
        &self,
        alias: &str,
        name: &str,
        create: impl FnOnce() -> Metric,
    ) -> Result<Metric, MetricsError> {
        let namespace = self.namespace(alias)?;
        Ok(register_in(&namespace, name, create))
    }
}

fn register_in(namespace: &Namespace, name: &str, create: impl FnOnce() -> Metric) -> Metric {
    if let Some(metric) = namespace.metrics.read().get(name) {
        return metric.clone();
    }
    namespace
        .metrics
        .write()
        .entry(name.to_owned())
        .or_insert_with(create)
        .clone()
}

fn validate_alias(alias: &str) -> Result<(), MetricsError> {
    if alias.is_empty() || alias.contains('.') {
        return Err(MetricsError::InvalidAlias(alias.to_owned()));
    }
    Ok(())
}

fn mismatch(alias: &str, name: &str, existing: &Metric) -> MetricsError {
    MetricsError::KindMismatch {
        alias: alias.to_owned(),
        name: name.to_owned(),
        existing: existing.kind(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn handles_are_shared_per_name() {
        let registry = MetricsRegistry::new();
        let a = registry.counter("act", "errors").unwrap();
        let b = registry.counter("act", "errors").unwrap();
        a.inc();
        b.add(2);
        registry.increment("act", "errors").unwrap();
        assert_eq!(
            registry.snapshot("act", "errors"),
            Some(MetricSnapshot::Counter { count: 4 })
        );
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let registry = MetricsRegistry::new();
        registry.counter("act", "cycles").unwrap();
        assert_eq!(
            registry.timer("act", "cycles").unwrap_err(),
            MetricsError::KindMismatch {
                alias: "act".into(),
                name: "cycles".into(),
                existing: "counter",
            }
        );
    }

    #[test]
    fn dotted_aliases_are_rejected() {
        let registry = MetricsRegistry::new();
        assert!(matches!(
            registry.begin_activity("a.b"),
            Err(MetricsError::InvalidAlias(_))
        ));
        assert!(registry.counter("", "errors").is_err());
    }

    #[test]
    fn lookup_resolves_statistics_and_whole_metrics() {
        let registry = MetricsRegistry::new();
        registry.begin_activity("act").unwrap();
        let timer = registry.timer("act", "cycles").unwrap();
        timer.update(Duration::from_micros(5));
        registry.set_gauge("act", "cycle.waittime", 42).unwrap();

        assert_eq!(registry.lookup("act.cycles.count"), Some(MetricReading::Number(1.0)));
        assert_eq!(
            registry.lookup("act.cycles.maxLatencyNanos"),
            Some(MetricReading::Number(5000.0))
        );
        assert_eq!(
            registry.lookup("act.cycle.waittime.value"),
            Some(MetricReading::Number(42.0))
        );
        assert_eq!(
            registry.lookup("act.cycle.waittime"),
            Some(MetricReading::Metric(MetricSnapshot::Gauge { value: 42 }))
        );
        assert!(matches!(
            registry.lookup("act.cycles"),
            Some(MetricReading::Metric(MetricSnapshot::Timer(_)))
        ));
    }

    #[test]
    fn unknown_paths_are_absent() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("act", "g", 1).unwrap();
        assert_eq!(registry.lookup("act"), None);
        assert_eq!(registry.lookup("other.g.value"), None);
        assert_eq!(registry.lookup("act.missing.count"), None);
        assert_eq!(registry.lookup("act.g.bogus"), None);
        assert_eq!(registry.lookup("act.g.meanRate"), None);
    }

    #[test]
    fn begin_activity_resets_the_namespace() {
        let registry = MetricsRegistry::new();
        registry.increment("act", "errors").unwrap();
        registry.begin_activity("act").unwrap();
        assert_eq!(registry.snapshot("act", "errors"), None);
        assert_eq!(registry.aliases(), vec!["act".to_string()]);
    }

    #[test]
    fn callback_gauge_replaces_plain_gauge() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("act", "diag.delay", 5).unwrap();
        registry.gauge_fn("act", "diag.delay", || 9).unwrap();
        assert_eq!(registry.lookup("act.diag.delay.value").map(|r| r.as_f64()), Some(9.0));
        let names: Vec<String> = registry
            .snapshot_activity("act")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["diag.delay".to_string()]);
    }
}
