//! Schedule monitor: the minute-aligned control loop.
//!
//! Each tick re-reads the rule set, picks the first eligible rule and compares
//! it with the run it started last time. A new rule (or a new channel) starts
//! a scheduled run; no rule stops the tracked one, unless the operator has
//! taken the output over in the meantime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDateTime, NaiveTime, Timelike};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use diffuser_actuator::CycleController;
use diffuser_core::error::Result;
use diffuser_core::traits::RuleStore;
use diffuser_core::types::{Channel, ScheduleRule};

use crate::recurrence::{applies_today, in_window};

const SECS_PER_DAY: i64 = 24 * 60 * 60;
/// Shortest scheduled run the monitor will ask for.
const MIN_RUN_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackedRun {
    rule_id: u64,
    channel: Channel,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No rule eligible and nothing tracked.
    Idle,
    Started {
        rule_id: u64,
        channel: Channel,
        ceiling: Duration,
    },
    /// The tracked rule is still the target.
    Continued { rule_id: u64 },
    /// The tracked rule left its window. `deactivated` is false when the
    /// output had already been taken over or released.
    Stopped { rule_id: u64, deactivated: bool },
}

/// First enabled rule, in list order, that applies on `now`'s weekday and
/// whose window contains `now`.
pub fn select_target(rules: &[ScheduleRule], now: NaiveDateTime) -> Option<&ScheduleRule> {
    let today = now.weekday();
    let time = now.time();
    rules.iter().find(|rule| {
        rule.enabled()
            && applies_today(rule.recurrence(), today)
            && rule.start_time() != rule.end_time()
            && in_window(time, rule.start_time(), rule.end_time())
    })
}

/// Seconds from `now` until the window's end, wrapping past midnight,
/// never less than a minute.
pub fn remaining_run(now: NaiveTime, end: NaiveTime) -> Duration {
    let now_secs = i64::from(now.num_seconds_from_midnight());
    let end_secs = i64::from(end.num_seconds_from_midnight());
    let mut remaining = end_secs - now_secs;
    if remaining <= 0 {
        remaining += SECS_PER_DAY;
    }
    Duration::from_secs(remaining.max(MIN_RUN_SECS) as u64)
}

/// Sleep length that lands on the next `:00`.
pub fn duration_until_next_minute(now: NaiveTime) -> Duration {
    let into_minute = Duration::from_secs(u64::from(now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond()));
    Duration::from_secs(60).saturating_sub(into_minute)
}

pub struct ScheduleMonitor {
    store: Arc<dyn RuleStore>,
    controller: Arc<CycleController>,
    tracked: Option<TrackedRun>,
}

impl ScheduleMonitor {
    pub fn new(store: Arc<dyn RuleStore>, controller: Arc<CycleController>) -> Self {
        Self {
            store,
            controller,
            tracked: None,
        }
    }

    /// Tick against the local wall clock.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.tick_at(Local::now().naive_local()).await
    }

    /// One monitor iteration at `now`.
    pub async fn tick_at(&mut self, now: NaiveDateTime) -> Result<TickOutcome> {
        let rules = self.store.load_all()?;

        let Some(target) = select_target(&rules, now) else {
            return Ok(self.stop_tracked().await);
        };

        let run = TrackedRun {
            rule_id: target.id(),
            channel: target.channel(),
        };
        if self.tracked == Some(run) {
            return Ok(TickOutcome::Continued { rule_id: run.rule_id });
        }

        let ceiling = remaining_run(now.time(), target.end_time());
        self.controller
            .force_schedule_transition(run.channel, target.cycle_time(), target.pulse_duration(), Some(ceiling))
            .await?;
        self.tracked = Some(run);
        tracing::info!(
            "📅 Started scheduled {} ({}) for {}s",
            run.channel,
            target.window_label(),
            ceiling.as_secs()
        );
        Ok(TickOutcome::Started {
            rule_id: run.rule_id,
            channel: run.channel,
            ceiling,
        })
    }

    async fn stop_tracked(&mut self) -> TickOutcome {
        let Some(run) = self.tracked.take() else {
            return TickOutcome::Idle;
        };
        let status = self.controller.status().await;
        let still_ours = status.active_schedule_channel() == Some(run.channel) && !status.user_override();
        if still_ours {
            self.controller.deactivate().await;
            tracing::info!("📅 Ended scheduled {} (rule {})", run.channel, run.rule_id);
        } else {
            tracing::info!("📅 Rule {} ended, output no longer scheduled: leaving it alone", run.rule_id);
        }
        TickOutcome::Stopped {
            rule_id: run.rule_id,
            deactivated: still_ours,
        }
    }

    /// Run the loop on a background task, ticking at every minute boundary.
    pub fn spawn(mut self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            tracing::info!("⏰ Schedule monitor started");
            loop {
                let sleep = duration_until_next_minute(Local::now().time());
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = stop_rx.changed() => break,
                }
                match self.tick().await {
                    Ok(TickOutcome::Idle) | Ok(TickOutcome::Continued { .. }) => {}
                    Ok(outcome) => tracing::debug!("Monitor tick: {outcome:?}"),
                    Err(e) => tracing::error!("❌ Schedule monitor tick failed: {e}"),
                }
            }
            tracing::info!("⏰ Schedule monitor stopped");
        });
        MonitorHandle {
            stop: stop_tx,
            handle,
        }
    }
}

/// Handle to a spawned monitor loop.
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Ask the loop to exit and wait up to `wait` for it.
    pub async fn shutdown(self, wait: Duration) {
        let _ = self.stop.send(true);
        let mut handle = self.handle;
        if tokio::time::timeout(wait, &mut handle).await.is_err() {
            tracing::warn!("⚠️ Schedule monitor did not stop within {wait:?}, aborting");
            handle.abort();
        }
    }
}
