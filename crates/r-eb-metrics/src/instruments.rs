//! ---
//! eb_section: "03-persistence-logging"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Atomic counters, timers, gauges and the one-minute moving rate."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;
const TICK_NANOS: u64 = 5_000_000_000;
const TICK_SECS: f64 = 5.0;
const ONE_MINUTE_SECS: f64 = 60.0;

fn nanos_since(origin: Instant) -> u64 {
    u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Exponentially weighted moving rate over one minute, ticked every five seconds.
///
/// Ticks are applied lazily by whichever caller first notices that one or
/// more tick boundaries have passed; missed ticks decay the rate as if they
/// had happened on time with no events.
pub struct Ewma {
    origin: Instant,
    alpha: f64,
    uncounted: AtomicU64,
    rate: AtomicU64,
    initialized: AtomicBool,
    last_tick: AtomicU64,
}

impl Ewma {
    pub fn one_minute() -> Self {
        Self {
            origin: Instant::now(),
            alpha: 1.0 - (-TICK_SECS / ONE_MINUTE_SECS).exp(),
            uncounted: AtomicU64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
            last_tick: AtomicU64::new(0),
        }
    }

    pub fn mark(&self, n: u64) {
        self.mark_at(n, nanos_since(self.origin));
    }

    /// Events per second.
    pub fn rate(&self) -> f64 {
        self.rate_at(nanos_since(self.origin))
    }

    fn mark_at(&self, n: u64, now: u64) {
        self.tick_to(now);
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    fn rate_at(&self, now: u64) -> f64 {
        self.tick_to(now);
        f64::from_bits(self.rate.load(Ordering::Acquire))
    }

    fn tick_to(&self, now: u64) {
        let last = self.last_tick.load(Ordering::Acquire);
        let age = now.saturating_sub(last);
        if age < TICK_NANOS {
            return;
        }
        let ticks = age / TICK_NANOS;
        if self
            .last_tick
            .compare_exchange(last, last + ticks * TICK_NANOS, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let instant = self.uncounted.swap(0, Ordering::AcqRel) as f64 / TICK_SECS;
        let mut rate = f64::from_bits(self.rate.load(Ordering::Acquire));
        if self.initialized.swap(true, Ordering::AcqRel) {
            rate += self.alpha * (instant - rate);
        } else {
            rate = instant;
        }
        let idle_ticks = (ticks - 1).min(i32::MAX as u64) as i32;
        rate *= (1.0 - self.alpha).powi(idle_ticks);
        self.rate.store(rate.to_bits(), Ordering::Release);
    }
}

impl fmt::Debug for Ewma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ewma")
            .field("rate", &f64::from_bits(self.rate.load(Ordering::Relaxed)))
            .field("uncounted", &self.uncounted.load(Ordering::Relaxed))
            .finish()
    }
}

/// Event count, rates and service time of a recurring operation.
#[derive(Debug)]
pub struct Timer {
    started: Instant,
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    one_minute: Ewma,
}

impl Timer {
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            max_nanos: AtomicU64::new(0),
            one_minute: Ewma::one_minute(),
        }
    }

    pub fn update(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
        self.one_minute.mark(1);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Count divided by the seconds elapsed since the activity started.
    pub fn mean_rate(&self) -> f64 {
        let secs = self.started.elapsed().as_nanos() as f64 / NANOS_PER_SEC;
        if secs <= 0.0 {
            return 0.0;
        }
        self.count() as f64 / secs
    }

    pub fn one_minute_rate(&self) -> f64 {
        self.one_minute.rate()
    }

    pub fn mean_latency_nanos(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.total_nanos.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn max_latency_nanos(&self) -> u64 {
        self.max_nanos.load(Ordering::Relaxed)
    }
}

type GaugeFn = Box<dyn Fn() -> i64 + Send + Sync>;

/// Latest value of a quantity, either set by the owner or read from a callback.
pub struct Gauge {
    value: AtomicI64,
    source: Option<GaugeFn>,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
            source: None,
        }
    }

    /// A gauge whose value is computed on every read.
    pub fn from_fn(source: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            value: AtomicI64::new(0),
            source: Some(Box::new(source)),
        }
    }

    /// Ignored for callback gauges.
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        match &self.source {
            Some(source) => source(),
            None => self.value.load(Ordering::Relaxed),
        }
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge")
            .field("value", &self.value())
            .field("callback", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn ewma_first_tick_takes_the_instant_rate() {
        let ewma = Ewma::one_minute();
        ewma.mark_at(500, SEC);
        assert_eq!(ewma.rate_at(4 * SEC), 0.0);
        let rate = ewma.rate_at(5 * SEC);
        assert!((rate - 100.0).abs() < 1e-9, "rate was {rate}");
    }

    #[test]
    fn ewma_decays_over_missed_ticks() {
        let ewma = Ewma::one_minute();
        ewma.mark_at(500, 0);
        let first = ewma.rate_at(5 * SEC);
        let after_a_minute = ewma.rate_at(65 * SEC);
        let expected = first * (-1.0f64).exp();
        assert!(
            (after_a_minute - expected).abs() < 1e-6,
            "expected {expected}, got {after_a_minute}"
        );
    }

    #[test]
    fn ewma_converges_to_a_steady_rate() {
        let ewma = Ewma::one_minute();
        for second in 0..600 {
            ewma.mark_at(200, second * SEC);
        }
        let rate = ewma.rate_at(600 * SEC);
        assert!((rate - 200.0).abs() < 1.0, "rate was {rate}");
    }

    #[test]
    fn timer_tracks_latency_and_count() {
        let timer = Timer::new(Instant::now());
        timer.update(Duration::from_micros(10));
        timer.update(Duration::from_micros(30));
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.mean_latency_nanos(), 20_000.0);
        assert_eq!(timer.max_latency_nanos(), 30_000);
        assert!(timer.mean_rate() > 0.0);
    }

    #[test]
    fn callback_gauges_ignore_set() {
        let shared = Arc::new(AtomicI64::new(7));
        let gauge = {
            let shared = shared.clone();
            Gauge::from_fn(move || shared.load(Ordering::Relaxed))
        };
        gauge.set(99);
        assert_eq!(gauge.value(), 7);
        shared.store(11, Ordering::Relaxed);
        assert_eq!(gauge.value(), 11);

        let plain = Gauge::new();
        plain.set(-3);
        assert_eq!(plain.value(), -3);
    }

    #[test]
    fn counters_are_shared_across_threads() {
        let counter = Arc::new(Counter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), 4000);
    }
}
