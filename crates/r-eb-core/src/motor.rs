//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Worker pool driving activity cycles."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use r_eb_logging::{eb_error, LogContext};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::error::WorkUnitError;

/// One worker task and its private stop flag.
#[derive(Debug)]
struct WorkerRuntime {
    slot: usize,
    stop_tx: watch::Sender<bool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WorkerRuntime {
    fn spawn(activity: Arc<Activity>, slot: usize) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        activity.worker_started();
        let task = tokio::spawn(run_worker(activity, slot, stop_rx));
        Self {
            slot,
            stop_tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Ask the worker to exit after its current stride.
    fn retire(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the task; returns false when it had to be aborted.
    async fn join(&self, grace: Duration) -> bool {
        let handle = self.task.lock().take();
        let Some(mut task) = handle else {
            return true;
        };
        match timeout(grace, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(slot = self.slot, error = %err, "worker join error");
                true
            }
            Err(_) => {
                task.abort();
                let _ = task.await;
                false
            }
        }
    }
}

/// Resizable pool of workers ("motors") for one activity.
///
/// Each slot owns a tokio task. Growing spawns new slots; shrinking retires
/// the highest slots, which finish the stride they already claimed.
#[derive(Debug)]
pub struct WorkerPool {
    activity: Arc<Activity>,
    workers: Mutex<Vec<WorkerRuntime>>,
    retired: Mutex<Vec<WorkerRuntime>>,
}

impl WorkerPool {
    pub fn new(activity: Arc<Activity>) -> Self {
        Self {
            activity,
            workers: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    /// Number of slots currently assigned; retired workers are not counted.
    pub fn threads(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn resize(&self, threads: usize) {
        let mut workers = self.workers.lock();
        let current = workers.len();
        if threads > current {
            for slot in current..threads {
                workers.push(WorkerRuntime::spawn(self.activity.clone(), slot));
            }
        } else if threads < current {
            let removed: Vec<WorkerRuntime> = workers.drain(threads..).collect();
            for worker in &removed {
                worker.retire();
            }
            self.retired.lock().extend(removed);
        }
        if threads != current {
            info!(activity = %self.activity.alias(), from = current, to = threads, "worker pool resized");
        }
    }

    /// Wait up to `grace` for every worker, aborting stragglers.
    ///
    /// Returns the number of aborted workers.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let workers: Vec<WorkerRuntime> = {
            let mut all: Vec<WorkerRuntime> = self.workers.lock().drain(..).collect();
            all.extend(self.retired.lock().drain(..));
            all
        };
        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        for worker in workers {
            worker.retire();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !worker.join(remaining).await {
                warn!(activity = %self.activity.alias(), slot = worker.slot, "worker aborted after grace period");
                aborted += 1;
            }
        }
        aborted
    }
}

/// Keeps the active worker count right even when a task is aborted mid-cycle.
struct ExitGuard(Arc<Activity>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.worker_exited();
    }
}

/// Cycles a worker runs between voluntary yields to the runtime.
const YIELD_EVERY: u64 = 64;

async fn run_worker(activity: Arc<Activity>, slot: usize, slot_stop: watch::Receiver<bool>) {
    let _exit = ExitGuard(activity.clone());
    let mut stop = activity.stop_signal();
    let mut cycles_run: u64 = 0;
    debug!(activity = %activity.alias(), slot, "worker started");

    'strides: loop {
        if *slot_stop.borrow() || *stop.borrow() {
            break;
        }
        let Some(stride) = activity.source().next_stride(activity.stride()) else {
            break;
        };
        let stride_started = Instant::now();
        if activity
            .limiters()
            .stride
            .acquire_or_stop(&mut stop)
            .await
            .is_err()
        {
            break;
        }

        for cycle in stride {
            if activity
                .limiters()
                .cycle
                .acquire_or_stop(&mut stop)
                .await
                .is_err()
            {
                break 'strides;
            }
            let cycle_started = Instant::now();
            let mut failure = None;
            for phase in 0..activity.phases() {
                if activity
                    .limiters()
                    .phase
                    .acquire_or_stop(&mut stop)
                    .await
                    .is_err()
                {
                    break 'strides;
                }
                let phase_started = Instant::now();
                if let Err(err) = run_phase_guarded(&activity, cycle, phase).await {
                    if let WorkUnitError::Interrupted { .. } = &err {
                        break 'strides;
                    }
                    if let WorkUnitError::Panicked { .. } = &err {
                        let ctx = LogContext::new()
                            .with_activity(activity.alias())
                            .with_slot(slot)
                            .with_cycle(cycle);
                        eb_error!(context = ctx, "{}", err);
                    }
                    failure = Some(err);
                }
                activity
                    .instruments()
                    .phases
                    .update(phase_started.elapsed());
            }
            activity
                .instruments()
                .cycles
                .update(cycle_started.elapsed());
            if let Some(err) = failure {
                activity.instruments().errors.inc();
                debug!(activity = %activity.alias(), slot, error = %err, "cycle failed");
            }
            cycles_run += 1;
            if cycles_run % YIELD_EVERY == 0 {
                // unpaced cycles never reach a timer; hand the runtime back
                tokio::task::yield_now().await;
            }
        }
        activity
            .instruments()
            .strides
            .update(stride_started.elapsed());
    }

    debug!(activity = %activity.alias(), slot, cycles = cycles_run, "worker exited");
}

async fn run_phase_guarded(activity: &Activity, cycle: u64, phase: u32) -> Result<(), WorkUnitError> {
    match AssertUnwindSafe(activity.workload().run_phase(cycle, phase))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(WorkUnitError::Panicked {
            cycle,
            phase,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use r_eb_common::{ActivityDefaults, ParameterMap};
    use r_eb_metrics::MetricsRegistry;

    use super::*;
    use crate::activity::{ActivityDef, RunState};
    use crate::workload::Workload;

    /// Records every cycle it sees and misbehaves on request.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
        panic_on: Option<u64>,
        fail_on: Option<u64>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Workload for Recorder {
        async fn run_phase(&self, cycle: u64, phase: u32) -> Result<(), WorkUnitError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if phase == 0 {
                self.seen.lock().push(cycle);
            }
            if self.panic_on == Some(cycle) {
                panic!("boom at {cycle}");
            }
            if self.fail_on == Some(cycle) {
                return Err(WorkUnitError::failed(cycle, phase, "requested"));
            }
            Ok(())
        }
    }

    fn activity(spec: &str, workload: Arc<Recorder>) -> (Arc<Activity>, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let def = ActivityDef::from_params(
            ParameterMap::parse(spec).unwrap(),
            &ActivityDefaults::default(),
        )
        .unwrap();
        metrics.begin_activity(&def.alias).unwrap();
        let activity = Arc::new(Activity::new(def, workload, &metrics).unwrap());
        assert!(activity.transition(&[RunState::Initialized], RunState::Running));
        (activity, metrics)
    }

    async fn wait_for_state(activity: &Activity, state: RunState) {
        let mut rx = activity.subscribe_state();
        timeout(Duration::from_secs(10), rx.wait_for(|s| *s == state))
            .await
            .expect("state reached in time")
            .expect("state channel open");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_cycle_runs_exactly_once() {
        let recorder = Arc::new(Recorder::default());
        let (activity, metrics) = activity("alias=once;type=test;cycles=0..5000;stride=7;phases=2", recorder.clone());
        let pool = WorkerPool::new(activity.clone());
        pool.resize(6);
        wait_for_state(&activity, RunState::Finished).await;
        assert_eq!(pool.shutdown(Duration::from_secs(1)).await, 0);

        let seen = recorder.seen.lock().clone();
        let unique: HashSet<u64> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 5000);
        assert_eq!(unique.len(), 5000);
        assert_eq!(metrics.lookup("once.cycles.count").unwrap().as_f64(), 5000.0);
        assert_eq!(metrics.lookup("once.phases.count").unwrap().as_f64(), 10000.0);
        assert_eq!(metrics.lookup("once.strides.count").unwrap().as_f64(), 715.0);
        assert_eq!(activity.active_workers(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_and_panics_are_counted_not_fatal() {
        let recorder = Arc::new(Recorder {
            panic_on: Some(3),
            fail_on: Some(7),
            ..Recorder::default()
        });
        let (activity, metrics) = activity("alias=faulty;type=test;cycles=10", recorder.clone());
        let pool = WorkerPool::new(activity.clone());
        pool.resize(1);
        wait_for_state(&activity, RunState::Finished).await;
        pool.shutdown(Duration::from_secs(1)).await;

        assert_eq!(recorder.seen.lock().len(), 10);
        assert_eq!(metrics.lookup("faulty.errors.count").unwrap().as_f64(), 2.0);
        assert_eq!(metrics.lookup("faulty.cycles.count").unwrap().as_f64(), 10.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shrinking_keeps_coverage_gapless() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_micros(200)),
            ..Recorder::default()
        });
        let (activity, _) = activity("alias=resize;type=test;cycles=0..3000;stride=5", recorder.clone());
        let pool = WorkerPool::new(activity.clone());
        pool.resize(8);
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.resize(2);
        assert_eq!(pool.threads(), 2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.resize(5);
        wait_for_state(&activity, RunState::Finished).await;
        pool.shutdown(Duration::from_secs(1)).await;

        let mut seen = recorder.seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..3000).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unpaced_workers_leave_room_for_timers() {
        let recorder = Arc::new(Recorder::default());
        let (activity, _) = activity("alias=busy;type=test;cycles=0..100000000", recorder.clone());
        let pool = WorkerPool::new(activity.clone());
        pool.resize(8);

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(2), "timer starved: {:?}", started.elapsed());
        assert!(!recorder.seen.lock().is_empty());

        activity.request_stop();
        assert_eq!(pool.shutdown(Duration::from_secs(5)).await, 0);
        assert_eq!(activity.active_workers(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_signal_interrupts_rate_waits() {
        let recorder = Arc::new(Recorder::default());
        let (activity, _) = activity("alias=slow;type=test;cycles=1000;cyclerate=2", recorder.clone());
        let pool = WorkerPool::new(activity.clone());
        pool.resize(2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        activity.request_stop();
        let started = Instant::now();
        assert_eq!(pool.shutdown(Duration::from_secs(5)).await, 0);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(activity.active_workers(), 0);
        assert_eq!(activity.state(), RunState::Running);
        assert!(recorder.seen.lock().len() <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stuck_workers_are_aborted_after_grace() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_secs(60)),
            ..Recorder::default()
        });
        let (activity, _) = activity("alias=stuck;type=test;cycles=10", recorder);
        let pool = WorkerPool::new(activity.clone());
        pool.resize(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        activity.request_stop();
        assert_eq!(pool.shutdown(Duration::from_millis(50)).await, 1);
        assert_eq!(activity.active_workers(), 0);
    }
}
