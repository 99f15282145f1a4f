//! Cadence loop
//!
//! Runs start on a fixed grid: run `n + 1` is due one interval after run
//! `n` was due, not one interval after it finished. A run that overruns
//! its slot delays the next one until it reaches a terminal state; the
//! next run then starts at once and the grid restarts from there. Runs
//! never overlap and missed slots are not replayed.

use crate::pipeline::{LineagePipeline, RunContext, RunTrigger};
use bqlineage_core::{RunReport, Schedule};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct Scheduler {
    pipeline: LineagePipeline,
    schedule: Schedule,
}

/// Start of the slot after `due`, or `now` when that slot has passed
pub fn next_due(due: Instant, interval: Duration, now: Instant) -> Instant {
    let next = due + interval;
    if next < now {
        now
    } else {
        next
    }
}

impl Scheduler {
    pub fn new(pipeline: LineagePipeline, schedule: Schedule) -> Self {
        Self { pipeline, schedule }
    }

    /// Run until `max_runs` runs have finished, forever when `None`
    ///
    /// `@once` always stops after the first run. A failed run does not stop
    /// the loop. `on_report` sees every finished run; the number of runs is
    /// returned.
    pub async fn run_loop<F>(&self, max_runs: Option<usize>, mut on_report: F) -> usize
    where
        F: FnMut(&RunReport),
    {
        let limit = match self.schedule {
            Schedule::Once => Some(1),
            Schedule::Every(_) => max_runs,
        };

        let mut due = Instant::now();
        let mut logical_time = Utc::now();
        let mut runs = 0;
        loop {
            if limit.is_some_and(|limit| runs >= limit) {
                break;
            }

            let ctx = RunContext::at(RunTrigger::Scheduled, logical_time);
            let report = self.pipeline.run(ctx).await;
            runs += 1;
            on_report(&report);

            if limit.is_some_and(|limit| runs >= limit) {
                break;
            }

            let Some(interval) = self.schedule.interval() else {
                break;
            };

            let Some(slot) = due.checked_add(interval) else {
                warn!(dag_id = %self.pipeline.dag_id(), "interval out of range, stopping");
                break;
            };
            let now = Instant::now();
            due = next_due(due, interval, now);
            if due == slot {
                logical_time = advance_logical_time(logical_time, interval);
            } else {
                warn!(
                    dag_id = %self.pipeline.dag_id(),
                    late_by_secs = now.saturating_duration_since(slot).as_secs(),
                    "run overran its interval, starting next run now"
                );
                logical_time = Utc::now();
            }

            info!(
                dag_id = %self.pipeline.dag_id(),
                next_in_secs = due.saturating_duration_since(now).as_secs(),
                "waiting for next run"
            );
            tokio::time::sleep_until(due).await;
        }

        runs
    }
}

/// Logical time of the next slot; falls back to the wall clock when the
/// interval does not fit a chrono duration
fn advance_logical_time(logical_time: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|step| logical_time.checked_add_signed(step))
        .unwrap_or_else(Utc::now)
}
