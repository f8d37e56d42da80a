//! Dispatcher daemon: fires due scheduled tasks by callback name.
//!
//! Each tick opens a fresh [`Session`] on a blocking thread, takes every due
//! task and invokes its callback as a background continuation. Tasks armed
//! by the runner resume their job; the yearly housekeeping tasks carry no job
//! and re-arm themselves for the next year after firing.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::jobs::report::ConsoleNotifier;
use crate::jobs::yearly::yearly_fire_at;
use crate::jobs::{Callback, Invocation};
use crate::scheduler::{ScheduledTask, Scheduler, SchedulerBridge};
use crate::session::Session;
use crate::store::KvStore;

/// Callbacks armed once a year rather than by the runner.
pub const YEARLY_CALLBACKS: [Callback; 2] =
    [Callback::CreateYearlyHierarchy, Callback::CreateYearlySpreadsheets];

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<Notify>,
}

impl Clone for Dispatcher {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            clock: Arc::clone(&self.clock),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Dispatcher {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop after the current tick.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Arm the yearly tasks, then poll until shutdown.
    pub async fn run(&self) -> Result<()> {
        let poll = Duration::from_millis(self.config.settings.dispatch.poll_interval_ms);
        let this = self.clone();
        blocking(move || {
            let session = Session::open(&this.config, this.clock.clone())?;
            ensure_yearly_tasks(&session)
        })
        .await?;

        info!(poll_ms = poll.as_millis() as u64, "dispatcher started");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("dispatcher shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(poll) => {}
            }
            if let Err(e) = self.tick().await {
                error!("dispatch tick failed: {e}");
            }
        }
    }

    /// Fire everything that is due now. Workspace changes are saved even
    /// when the tick fails part way.
    pub async fn tick(&self) -> Result<TickReport> {
        let this = self.clone();
        blocking(move || {
            let session = Session::open(&this.config, this.clock.clone())?;
            let fired = fire_due(&session);
            session.save()?;
            let report = fired?;
            let purged = session.kv().purge_expired(this.clock.now())?;
            if purged > 0 {
                debug!(purged, "expired entries removed");
            }
            Ok(report)
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("dispatch task panicked: {e}")))?
}

/// Take every due task from the session's scheduler and run it, one at a
/// time. A task that fails is counted and logged; the rest still run.
pub fn fire_due(session: &Session) -> Result<TickReport> {
    let now = session.clock().now();
    let due = session.scheduler().take_due(now)?;
    if due.is_empty() {
        return Ok(TickReport::default());
    }
    debug!(count = due.len(), "tasks due");

    let bridge = session.bridge();
    let mut report = TickReport::default();
    for task in due {
        let callback: Callback = match task.callback.parse() {
            Ok(c) => c,
            Err(e) => {
                warn!(handle = %task.handle, "dropping task: {e}");
                report.failed += 1;
                continue;
            }
        };

        if let Err(e) = fire_task(session, &bridge, &task, callback, &mut report) {
            error!(%callback, handle = %task.handle, "task lost: {e}");
            report.failed += 1;
            if let Err(e) = bridge.release(task.handle) {
                warn!(handle = %task.handle, "failed to release task: {e}");
            }
        }

        if YEARLY_CALLBACKS.contains(&callback) {
            let year = session.calendar().year() + 1;
            if let Err(e) = arm_yearly(session, callback, year) {
                error!(%callback, year, "failed to re-arm yearly task: {e}");
            }
        }
    }
    Ok(report)
}

fn fire_task(
    session: &Session,
    bridge: &SchedulerBridge<'_>,
    task: &ScheduledTask,
    callback: Callback,
    report: &mut TickReport,
) -> Result<()> {
    let key = bridge.job_for(task.handle)?;
    let inv = Invocation::continuation(callback, key.as_ref());
    info!(%callback, handle = %task.handle, key = ?key.as_ref().map(ToString::to_string), "firing task");
    report.fired += 1;

    let result = session.run(&inv, &ConsoleNotifier);
    bridge.release(task.handle)?;
    match result {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::Conflict => {
            // Another invocation holds the job; try again later.
            if let Some(key) = &key {
                bridge.arm(key, callback.name(), session.settings().runner.continuation_delay())?;
            }
            report.failed += 1;
        }
        Err(_) => report.failed += 1,
    }
    Ok(())
}

/// Make sure each yearly task is scheduled. A year-end already past this
/// year fires at once.
pub fn ensure_yearly_tasks(session: &Session) -> Result<()> {
    let scheduled = session.scheduler().list_scheduled()?;
    let year = session.calendar().year();
    for callback in YEARLY_CALLBACKS {
        if scheduled.iter().any(|t| t.callback == callback.name()) {
            continue;
        }
        arm_yearly(session, callback, year)?;
    }
    Ok(())
}

fn arm_yearly(session: &Session, callback: Callback, year: i32) -> Result<()> {
    let fire_at = yearly_fire_at(year, session.offset())?;
    let delay = (fire_at - session.clock().now()).max(TimeDelta::zero());
    let handle = session.scheduler().schedule_once(callback.name(), delay)?;
    info!(%callback, %handle, %fire_at, "yearly task armed");
    Ok(())
}
