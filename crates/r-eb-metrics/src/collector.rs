//! ---
//! eb_section: "03-persistence-logging"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Prometheus collector over the activity metrics registry."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, IntCounterVec, IntGaugeVec, Opts};

use crate::registry::{MetricSnapshot, MetricsRegistry};

/// Exposes every activity namespace as labelled Prometheus families.
///
/// Values are copied from the registry at scrape time; nothing on the
/// worker hot path knows about Prometheus.
pub struct EngineCollector {
    metrics: Arc<MetricsRegistry>,
    families: Mutex<Families>,
    descs: Vec<Desc>,
}

struct Families {
    counts: IntCounterVec,
    rates: GaugeVec,
    latency: GaugeVec,
    gauges: IntGaugeVec,
}

impl EngineCollector {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Result<Self> {
        let counts = IntCounterVec::new(
            Opts::new("r_eb_events_total", "Events recorded by counters and timers"),
            &["activity", "metric"],
        )?;
        let rates = GaugeVec::new(
            Opts::new("r_eb_rate_per_second", "Timer event rates by window"),
            &["activity", "metric", "window"],
        )?;
        let latency = GaugeVec::new(
            Opts::new("r_eb_latency_nanoseconds", "Timer service time by statistic"),
            &["activity", "metric", "stat"],
        )?;
        let gauges = IntGaugeVec::new(
            Opts::new("r_eb_gauge", "Latest gauge values"),
            &["activity", "metric"],
        )?;

        let descs = counts
            .desc()
            .into_iter()
            .chain(rates.desc())
            .chain(latency.desc())
            .chain(gauges.desc())
            .cloned()
            .collect();

        Ok(Self {
            metrics,
            families: Mutex::new(Families {
                counts,
                rates,
                latency,
                gauges,
            }),
            descs,
        })
    }
}

impl Collector for EngineCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let families = self.families.lock();
        families.counts.reset();
        families.rates.reset();
        families.latency.reset();
        families.gauges.reset();

        for alias in self.metrics.aliases() {
            for (name, snapshot) in self.metrics.snapshot_activity(&alias) {
                let labels = [alias.as_str(), name.as_str()];
                match snapshot {
                    MetricSnapshot::Counter { count } => {
                        families.counts.with_label_values(&labels).inc_by(count);
                    }
                    MetricSnapshot::Gauge { value } => {
                        families.gauges.with_label_values(&labels).set(value);
                    }
                    MetricSnapshot::Timer(timer) => {
                        families.counts.with_label_values(&labels).inc_by(timer.count);
                        families
                            .rates
                            .with_label_values(&[labels[0], labels[1], "mean"])
                            .set(timer.mean_rate);
                        families
                            .rates
                            .with_label_values(&[labels[0], labels[1], "1m"])
                            .set(timer.one_minute_rate);
                        families
                            .latency
                            .with_label_values(&[labels[0], labels[1], "mean"])
                            .set(timer.mean_latency_nanos);
                        families
                            .latency
                            .with_label_values(&[labels[0], labels[1], "max"])
                            .set(timer.max_latency_nanos as f64);
                    }
                }
            }
        }

        let mut out = families.counts.collect();
        out.extend(families.rates.collect());
        out.extend(families.latency.collect());
        out.extend(families.gauges.collect());
        out
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use prometheus::{Registry, TextEncoder};

    use super::*;

    #[test]
    fn scrape_includes_every_metric_kind() {
        let metrics = Arc::new(MetricsRegistry::new());
        metrics.begin_activity("act").unwrap();
        metrics.timer("act", "cycles").unwrap().update(Duration::from_micros(3));
        metrics.increment("act", "errors").unwrap();
        metrics.set_gauge("act", "cycle.waittime", 17).unwrap();

        let registry = Registry::new();
        registry
            .register(Box::new(EngineCollector::new(metrics).unwrap()))
            .unwrap();
        let body = TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();

        assert!(body.contains(r#"r_eb_events_total{activity="act",metric="cycles"} 1"#));
        assert!(body.contains(r#"r_eb_events_total{activity="act",metric="errors"} 1"#));
        assert!(body.contains(r#"r_eb_gauge{activity="act",metric="cycle.waittime"} 17"#));
        assert!(body.contains(r#"r_eb_latency_nanoseconds{activity="act",metric="cycles",stat="max"} 3000"#));
    }
}
