//! ---
//! eb_section: "02-pacing-scheduling"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Shared, reconfigurable rate limiter for activity workers."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use r_eb_common::time::duration_to_nanos;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::error::{Cancelled, RateSpecError};
use crate::model::{Grant, RateModel, Timeline};
use crate::spec::RateLimiterConfig;

/// Published `next_slot` before the first grant anchors the schedule.
const UNANCHORED: u64 = u64::MAX;

#[derive(Debug, Default)]
struct PacerState {
    model: Option<RateModel>,
    timeline: Option<Timeline>,
}

/// Async rate limiter shared by every worker of an activity.
///
/// The configuration and the schedule live together behind one short
/// critical section, so a reconfiguration is observed whole by the next
/// scheduling decision and never torn. Sleeping happens outside the lock.
/// An unconfigured limiter grants immediately. The schedule is anchored by
/// the first grant, not by construction or configuration.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    origin: Instant,
    state: Mutex<PacerState>,
    limited: AtomicBool,
    next_slot: AtomicU64,
    cumulative_delay: AtomicU64,
    grants: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter; `None` leaves it unlimited until reconfigured.
    pub fn new(
        name: impl Into<String>,
        config: Option<RateLimiterConfig>,
    ) -> Result<Self, RateSpecError> {
        let limiter = Self::unlimited(name);
        limiter.reconfigure(config)?;
        Ok(limiter)
    }

    pub fn unlimited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: Instant::now(),
            state: Mutex::new(PacerState::default()),
            limited: AtomicBool::new(false),
            next_slot: AtomicU64::new(UNANCHORED),
            cumulative_delay: AtomicU64::new(0),
            grants: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Currently published configuration, `None` when unlimited.
    pub fn config(&self) -> Option<RateLimiterConfig> {
        self.state.lock().model.map(|model| *model.config())
    }

    pub fn is_limited(&self) -> bool {
        self.limited.load(Ordering::Acquire)
    }

    /// Atomically publish a new configuration.
    ///
    /// Callers already sleeping keep the start time they were granted; the
    /// next decision uses the new rate. Outstanding backlog carries over
    /// unless the new mode is `co`.
    pub fn reconfigure(&self, config: Option<RateLimiterConfig>) -> Result<(), RateSpecError> {
        if let Some(config) = &config {
            config.validate()?;
        }
        let now = self.now_nanos();
        let mut state = self.state.lock();
        match config {
            Some(config) => {
                let model = RateModel::new(config);
                if let Some(previous) = state.timeline {
                    let (timeline, forgiven) = model.rebase(Some(previous), now);
                    state.timeline = Some(timeline);
                    self.next_slot.store(timeline.next_slot, Ordering::Release);
                    self.cumulative_delay.fetch_add(forgiven, Ordering::Relaxed);
                }
                state.model = Some(model);
                self.limited.store(true, Ordering::Release);
                info!(limiter = %self.name, rate = config.target_rate, burst_ratio = config.burst_ratio, mode = %config.mode, "rate limiter configured");
            }
            None => {
                if let Some(timeline) = state.timeline.take() {
                    self.cumulative_delay
                        .fetch_add(timeline.backlog(now), Ordering::Relaxed);
                }
                state.model = None;
                self.next_slot.store(UNANCHORED, Ordering::Release);
                self.limited.store(false, Ordering::Release);
                debug!(limiter = %self.name, "rate limiter unlimited");
            }
        }
        Ok(())
    }

    /// Wait until the next grant may start; returns the grant when limited.
    pub async fn acquire(&self) -> Option<Grant> {
        let (deadline, grant) = self.reserve()?;
        if let Some(deadline) = deadline {
            sleep_until(deadline).await;
        }
        Some(grant)
    }

    /// Like [`RateLimiter::acquire`], but abandons the wait once `stop` flips to `true`.
    pub async fn acquire_or_stop(
        &self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Option<Grant>, Cancelled> {
        if *stop.borrow() {
            return Err(Cancelled);
        }
        let Some((deadline, grant)) = self.reserve() else {
            return Ok(None);
        };
        let Some(deadline) = deadline else {
            return Ok(Some(grant));
        };
        tokio::select! {
            _ = sleep_until(deadline) => Ok(Some(grant)),
            stopped = async { stop.wait_for(|stopped| *stopped).await.map(drop) } => match stopped {
                Ok(_) => Err(Cancelled),
                // sender dropped: the wait can no longer be stopped
                Err(_) => {
                    sleep_until(deadline).await;
                    Ok(Some(grant))
                }
            },
        }
    }

    fn reserve(&self) -> Option<(Option<Instant>, Grant)> {
        if !self.is_limited() {
            return None;
        }
        let now = self.now_nanos();
        let grant = {
            let mut state = self.state.lock();
            let model = state.model?;
            let timeline = state.timeline.get_or_insert_with(|| Timeline::anchored_at(now));
            let grant = model.schedule(timeline, now);
            self.next_slot.store(timeline.next_slot, Ordering::Release);
            grant
        };
        if grant.forgiven > 0 {
            self.cumulative_delay
                .fetch_add(grant.forgiven, Ordering::Relaxed);
        }
        self.grants.fetch_add(1, Ordering::Relaxed);
        let delay = grant.delay_after(now);
        let deadline = (delay > 0).then(|| self.origin + Duration::from_nanos(grant.start_at));
        Some((deadline, grant))
    }

    /// Current lateness against the ideal schedule, zero when on time or unlimited.
    ///
    /// Computed from the last published slot without taking the lock, so a
    /// stalled consumer shows a growing value even between decisions.
    pub fn waittime(&self) -> Duration {
        if !self.is_limited() {
            return Duration::ZERO;
        }
        let slot = self.next_slot.load(Ordering::Acquire);
        Duration::from_nanos(self.now_nanos().saturating_sub(slot))
    }

    /// Total lateness discarded by re-anchoring (`co`, `modulo`, switching to unlimited).
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_nanos(self.cumulative_delay.load(Ordering::Relaxed))
    }

    pub fn grants(&self) -> u64 {
        self.grants.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> String {
        match self.config() {
            Some(config) => format!(
                "{}: rate={}, burst_ratio={}, mode={}, waittime={:?}",
                self.name,
                config.target_rate,
                config.burst_ratio,
                config.mode,
                self.waittime()
            ),
            None => format!("{}: unlimited", self.name),
        }
    }

    fn now_nanos(&self) -> u64 {
        duration_to_nanos(Instant::now().saturating_duration_since(self.origin))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::spec::PacingMode;

    fn config(rate: f64, mode: PacingMode) -> RateLimiterConfig {
        RateLimiterConfig::new(rate).unwrap().with_mode(mode)
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_limiter_grants_immediately() {
        let limiter = RateLimiter::unlimited("cycle");
        let started = Instant::now();
        for _ in 0..1000 {
            assert!(limiter.acquire().await.is_none());
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(limiter.waittime(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_limiter_spaces_grants() {
        let limiter = RateLimiter::new("cycle", Some(config(100.0, PacingMode::Strict))).unwrap();
        let started = Instant::now();
        for _ in 0..11 {
            limiter.acquire().await;
        }
        // first grant is immediate, ten more at 10ms each
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(102), "{:?}", elapsed);
        assert_eq!(limiter.grants(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_starts_at_the_first_grant() {
        let limiter = RateLimiter::new("cycle", Some(config(100.0, PacingMode::Strict))).unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.waittime(), Duration::ZERO);

        let started = Instant::now();
        let first = limiter.acquire().await.unwrap();
        assert_eq!(first.backlog, 0);
        for _ in 0..10 {
            limiter.acquire().await;
        }
        // no burst to catch up on the time spent before the first grant
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(102), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_shows_in_waittime_until_caught_up() {
        let limiter = RateLimiter::new("cycle", Some(config(1000.0, PacingMode::Strict))).unwrap();
        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(limiter.waittime() >= Duration::from_millis(48));
        // strict catches up without waiting until the backlog is gone
        for _ in 0..60 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.waittime(), Duration::ZERO);
        assert_eq!(limiter.cumulative_delay(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn co_limiter_forgives_stalls() {
        let limiter = RateLimiter::new("cycle", Some(config(1000.0, PacingMode::Co))).unwrap();
        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(50)).await;
        let grant = limiter.acquire().await.unwrap();
        assert_eq!(grant.backlog, 0);
        assert_eq!(limiter.waittime(), Duration::ZERO);
        assert!(limiter.cumulative_delay() >= Duration::from_millis(48));
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_changes_rate_for_next_decision() {
        let limiter = RateLimiter::new("cycle", Some(config(10.0, PacingMode::Strict))).unwrap();
        limiter.acquire().await;
        limiter.reconfigure(Some(config(1000.0, PacingMode::Strict))).unwrap();
        let started = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        // the slot already granted under 10/s is at 100ms, then 1ms apart
        assert!(started.elapsed() <= Duration::from_millis(110));
        limiter.reconfigure(None).unwrap();
        assert!(!limiter.is_limited());
        assert!(limiter.acquire().await.is_none());
    }

    #[test]
    fn invalid_reconfiguration_keeps_previous_config() {
        let limiter = RateLimiter::new("cycle", Some(config(10.0, PacingMode::Hybrid))).unwrap();
        let bad = RateLimiterConfig {
            target_rate: -1.0,
            burst_ratio: 1.0,
            mode: PacingMode::Strict,
            modulo: None,
        };
        assert_eq!(
            limiter.reconfigure(Some(bad)),
            Err(RateSpecError::NonPositiveRate(-1.0))
        );
        assert_eq!(limiter.config().unwrap().target_rate, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_cancels_waits() {
        let limiter = Arc::new(RateLimiter::new("cycle", Some(config(1.0, PacingMode::Strict))).unwrap());
        let (stop_tx, mut stop_rx) = watch::channel(false);
        assert!(limiter.acquire_or_stop(&mut stop_rx).await.unwrap().is_some());

        let waiter = {
            let limiter = limiter.clone();
            let mut stop_rx = stop_rx.clone();
            tokio::spawn(async move { limiter.acquire_or_stop(&mut stop_rx).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop_tx.send(true).unwrap();
        assert_eq!(waiter.await.unwrap(), Err(Cancelled));
        assert_eq!(limiter.acquire_or_stop(&mut stop_rx).await, Err(Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stop_channel_still_waits_for_the_slot() {
        let limiter = RateLimiter::new("cycle", Some(config(10.0, PacingMode::Strict))).unwrap();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        drop(stop_tx);
        let started = Instant::now();
        assert!(limiter.acquire_or_stop(&mut stop_rx).await.unwrap().is_some());
        assert!(limiter.acquire_or_stop(&mut stop_rx).await.unwrap().is_some());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_workers_share_one_schedule() {
        let limiter = Arc::new(RateLimiter::new("cycle", Some(config(2000.0, PacingMode::Strict))).unwrap());
        let started = std::time::Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    limiter.acquire().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        // 400 grants at 2000/s take about 200ms regardless of worker count
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(190), "finished too fast: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "finished too slow: {:?}", elapsed);
    }
}
