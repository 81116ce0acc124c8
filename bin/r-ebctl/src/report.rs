//! ---
//! eb_section: "05-networking-external-interfaces"
//! eb_subsection: "binary"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Drives one activity and renders its periodic report lines."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use r_eb_common::ParameterMap;
use r_eb_core::{RunState, Scenario};
use tokio::signal;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DriveOptions {
    /// Keep reporting after the activity finishes, until interrupted.
    pub follow: bool,
    pub timeout: Option<Duration>,
    pub report_interval: Duration,
}

/// Start the activity described by `params` and report on it until it ends.
pub async fn drive(scenario: &Scenario, params: ParameterMap, options: DriveOptions) -> Result<()> {
    let alias = params
        .require("alias")
        .context("activity parameters need an alias")?
        .trim()
        .to_owned();
    scenario.start(params).await?;

    let deadline = options.timeout.map(|limit| Instant::now() + limit);
    let mut ticker = (!options.report_interval.is_zero()).then(|| {
        let mut ticker = time::interval_at(
            Instant::now() + options.report_interval,
            options.report_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let finished = scenario.await_activity(&alias, None);
    tokio::pin!(finished);
    let interrupted = signal::ctrl_c();
    tokio::pin!(interrupted);
    let mut done = false;

    loop {
        tokio::select! {
            result = &mut interrupted => {
                result.context("failed to listen for ctrl-c")?;
                info!(activity = %alias, "interrupted, stopping");
                break;
            }
            state = &mut finished, if !done => {
                let state = state?;
                done = true;
                info!(activity = %alias, state = %state, "activity ended");
                if !options.follow {
                    break;
                }
            }
            _ = sleep_until(deadline) => {
                warn!(activity = %alias, "timeout elapsed, stopping");
                break;
            }
            _ = tick(&mut ticker) => {
                println!("{}", report_line(scenario, &alias));
            }
        }
    }

    let state = scenario.stop(&alias).await?;
    scenario.shutdown().await;
    println!("{}", report_line(scenario, &alias));
    println!("{alias}: final state {state}");
    if state == RunState::Stopped && !options.follow {
        info!(activity = %alias, "activity did not run to completion");
    }
    Ok(())
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// One line summarising throughput, latency and pacing of `alias`.
pub fn report_line(scenario: &Scenario, alias: &str) -> String {
    let read = |metric: &str| scenario.metric(&format!("{alias}.{metric}")).unwrap_or(0.0);
    let remaining = scenario
        .activities()
        .into_iter()
        .find(|summary| summary.alias == alias)
        .and_then(|summary| summary.remaining)
        .map(|remaining| remaining.to_string())
        .unwrap_or_else(|| String::from("-"));
    format!(
        "{alias}: cycles={count} rate={mean:.1}/s 1m={one:.1}/s latency_mean={latency:.1}us errors={errors} waittime={wait:.3}ms remaining={remaining}",
        count = read("cycles.count") as u64,
        mean = read("cycles.meanRate"),
        one = read("cycles.oneMinuteRate"),
        latency = read("cycles.meanLatencyNanos") / 1_000.0,
        errors = read("errors.count") as u64,
        wait = read("cycle.waittime.value") / 1_000_000.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_reports_a_finished_activity() {
        let scenario = Scenario::default();
        let params =
            ParameterMap::parse("alias=cli;type=diag;cycles=500;threads=2;interval=0").unwrap();
        drive(
            &scenario,
            params,
            DriveOptions {
                follow: false,
                timeout: Some(Duration::from_secs(10)),
                report_interval: Duration::ZERO,
            },
        )
        .await
        .expect("drive");

        let line = report_line(&scenario, "cli");
        assert!(line.starts_with("cli: cycles=500 "), "{line}");
        assert!(line.contains("errors=0"), "{line}");
        assert!(line.ends_with("remaining=0"), "{line}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_stops_an_open_ended_activity() {
        let scenario = Scenario::default();
        let params = ParameterMap::parse("alias=open;type=diag;cycles=0..;cyclerate=100").unwrap();
        drive(
            &scenario,
            params,
            DriveOptions {
                follow: false,
                timeout: Some(Duration::from_millis(300)),
                report_interval: Duration::from_millis(100),
            },
        )
        .await
        .expect("drive");
        assert!(!scenario.is_running_activity("open"));
        assert!(report_line(&scenario, "open").ends_with("remaining=-"));
    }
}
