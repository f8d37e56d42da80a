//! Time-boxed iteration over work lists.
//!
//! A job invocation starts with [`ResumableJobRunner::begin`], which takes
//! the job's lease, consumes any checkpoint left by a previous invocation
//! and disarms its continuation. [`ResumableJobRunner::run`] then walks the
//! work list. Before each item the elapsed time since `begin` is compared to
//! the budget; once it is reached the unprocessed items are checkpointed, a
//! continuation is armed and the run returns [`RunOutcome::Suspended`].
//! Running out of items writes the completion marker instead.
//!
//! An item error aborts the run and propagates to the caller. Nothing is
//! checkpointed for the failed run.

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointStore, Lease};
use crate::clock::Clock;
use crate::error::Result;
use crate::model::{JobKey, JobState};
use crate::scheduler::{Scheduler, SchedulerBridge};
use crate::store::kv::KvStore;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

/// Budgets and expiries for the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Work budget per invocation.
    pub budget_ms: u64,
    /// Delay before a suspended job's continuation fires.
    pub continuation_delay_ms: u64,
    /// Expiry of checkpoints, completion markers and cached blobs.
    pub checkpoint_ttl_secs: u64,
    /// Expiry of a job lease. Renewed before every item, so it must
    /// outlast the slowest single item rather than a whole invocation.
    pub lease_ttl_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            budget_ms: 240_000,
            continuation_delay_ms: 120_000,
            checkpoint_ttl_secs: 3_600,
            lease_ttl_ms: 360_000,
        }
    }
}

impl RunnerConfig {
    pub fn budget(&self) -> TimeDelta {
        millis(self.budget_ms)
    }

    pub fn continuation_delay(&self) -> TimeDelta {
        millis(self.continuation_delay_ms)
    }

    pub fn checkpoint_ttl(&self) -> TimeDelta {
        millis(self.checkpoint_ttl_secs.saturating_mul(1_000))
    }

    pub fn lease_ttl(&self) -> TimeDelta {
        millis(self.lease_ttl_ms)
    }
}

fn millis(ms: u64) -> TimeDelta {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX)
}

/// How a run ended. Budget exhaustion is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { processed: usize },
    Suspended { processed: usize, remaining: usize },
}

impl RunOutcome {
    pub fn processed(&self) -> usize {
        match self {
            RunOutcome::Completed { processed } | RunOutcome::Suspended { processed, .. } => {
                *processed
            }
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }
}

/// One invocation of a job, from `begin` to the end of its run.
pub struct JobRun<'a> {
    key: JobKey,
    callback: String,
    start: DateTime<Utc>,
    span: Span,
    resumed_from: Option<Checkpoint<serde_json::Value>>,
    lease: Lease<'a>,
}

impl JobRun<'_> {
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn callback(&self) -> &str {
        &self.callback
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The checkpoint this invocation resumes from, typed. Yields it once.
    pub fn resume_point<T: DeserializeOwned>(&mut self) -> Result<Option<Checkpoint<T>>> {
        let Some(checkpoint) = self.resumed_from.take() else {
            return Ok(None);
        };
        let remaining = checkpoint
            .remaining
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(Some(Checkpoint {
            remaining,
            cursor: checkpoint.cursor,
            written_at: checkpoint.written_at,
        }))
    }
}

pub struct ResumableJobRunner<'a> {
    checkpoints: CheckpointStore<'a>,
    bridge: SchedulerBridge<'a>,
    clock: &'a dyn Clock,
    config: RunnerConfig,
}

impl<'a> ResumableJobRunner<'a> {
    pub fn new(
        kv: &'a dyn KvStore,
        scheduler: &'a dyn Scheduler,
        clock: &'a dyn Clock,
        config: RunnerConfig,
    ) -> Self {
        Self {
            checkpoints: CheckpointStore::new(kv, clock),
            bridge: SchedulerBridge::new(scheduler, kv),
            clock,
            config,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore<'a> {
        &self.checkpoints
    }

    pub fn bridge(&self) -> &SchedulerBridge<'a> {
        &self.bridge
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start an invocation of `key`.
    ///
    /// Takes the lease, then clears the checkpoint slot and any armed
    /// continuation. A resumed invocation keeps what it read from the slot
    /// (see [`JobRun::resume_point`]); a fresh one discards it.
    pub fn begin(&self, key: &JobKey, callback: &str, resumed: bool) -> Result<JobRun<'a>> {
        let lease = self
            .checkpoints
            .acquire_lease(key, Uuid::new_v4(), self.config.lease_ttl())?;
        let span = start_job_span(callback, key, resumed);

        let resumed_from: Option<Checkpoint<serde_json::Value>> = if resumed {
            self.checkpoints.take_checkpoint(key)?
        } else {
            self.checkpoints.delete(&key.to_string())?;
            None
        };
        self.bridge.disarm(key)?;

        let from = if resumed_from.is_some() {
            JobState::Suspended
        } else {
            JobState::Idle
        };
        transition(&span, from, JobState::Running);
        span.in_scope(|| {
            debug!(
                owner = %lease.owner(),
                pending = resumed_from.as_ref().map(|c| c.remaining.len()),
                cursor = resumed_from.as_ref().and_then(|c| c.cursor),
                "job started"
            );
        });

        Ok(JobRun {
            key: key.clone(),
            callback: callback.to_string(),
            start: self.clock.now(),
            span,
            resumed_from,
            lease,
        })
    }

    /// Process `items` in order until done or out of budget.
    pub fn run<T, F>(&self, job: &JobRun<'_>, items: Vec<T>, mut per_item: F) -> Result<RunOutcome>
    where
        T: Serialize,
        F: FnMut(&T) -> Result<()>,
    {
        let _entered = job.span.enter();
        let total = items.len();

        for i in 0..total {
            if self.out_of_budget(job)? {
                let rest: Vec<T> = items.into_iter().skip(i).collect();
                let remaining = Checkpoint::items(rest, self.clock.now());
                self.checkpoints
                    .save_checkpoint(&job.key, &remaining, self.config.checkpoint_ttl())?;
                return self.suspend(job, i, total - i);
            }
            if let Err(e) = per_item(&items[i]) {
                self.fail(job, i, &e);
                return Err(e);
            }
            metrics::items_processed().add(1, &[KeyValue::new("callback", job.callback.clone())]);
        }

        self.complete(job, total)
    }

    /// Process `items[from..]`, checkpointing the index of the next item on
    /// suspension. For jobs that rescan a stable external list on resume.
    pub fn run_cursor<T, F>(
        &self,
        job: &JobRun<'_>,
        items: &[T],
        from: usize,
        mut per_item: F,
    ) -> Result<RunOutcome>
    where
        F: FnMut(usize, &T) -> Result<()>,
    {
        let _entered = job.span.enter();
        let mut processed = 0;

        for (i, item) in items.iter().enumerate().skip(from) {
            if self.out_of_budget(job)? {
                let cursor = Checkpoint::<serde_json::Value>::at_cursor(i, self.clock.now());
                self.checkpoints
                    .save_checkpoint(&job.key, &cursor, self.config.checkpoint_ttl())?;
                return self.suspend(job, processed, items.len() - i);
            }
            if let Err(e) = per_item(i, item) {
                self.fail(job, processed, &e);
                return Err(e);
            }
            processed += 1;
            metrics::items_processed().add(1, &[KeyValue::new("callback", job.callback.clone())]);
        }

        self.complete(job, processed)
    }

    /// Record a single-pass job as finished.
    pub fn finish(&self, job: &JobRun<'_>, processed: usize) -> Result<RunOutcome> {
        let _entered = job.span.enter();
        self.complete(job, processed)
    }

    /// Renews the lease, then compares elapsed time to the budget.
    fn out_of_budget(&self, job: &JobRun<'_>) -> Result<bool> {
        self.checkpoints
            .renew_lease(&job.key, &job.lease, self.config.lease_ttl())?;
        Ok(self.clock.now() - job.start >= self.config.budget())
    }

    fn suspend(&self, job: &JobRun<'_>, processed: usize, remaining: usize) -> Result<RunOutcome> {
        self.bridge
            .arm(&job.key, &job.callback, self.config.continuation_delay())?;
        metrics::continuations_armed().add(1, &[KeyValue::new("callback", job.callback.clone())]);
        transition(&job.span, JobState::Running, JobState::Suspended);
        info!(processed, remaining, "time budget reached, job suspended");
        Ok(RunOutcome::Suspended {
            processed,
            remaining,
        })
    }

    fn complete(&self, job: &JobRun<'_>, processed: usize) -> Result<RunOutcome> {
        self.checkpoints
            .mark_complete(&job.key, self.config.checkpoint_ttl())?;
        transition(&job.span, JobState::Running, JobState::Idle);
        info!(processed, "job completed");
        Ok(RunOutcome::Completed { processed })
    }

    fn fail(&self, job: &JobRun<'_>, processed: usize, error: &crate::error::Error) {
        transition(&job.span, JobState::Running, JobState::Idle);
        warn!(processed, kind = %error.kind(), "job aborted on item error: {error}");
    }
}

fn transition(span: &Span, from: JobState, to: JobState) {
    record_state_transition(span, from, to);
    metrics::job_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::ResumeStatus;
    use crate::clock::ManualClock;
    use crate::error::{Error, ErrorKind};
    use crate::scheduler::SqliteScheduler;
    use crate::store::kv::SqliteKvStore;
    use std::sync::Arc;

    fn config() -> RunnerConfig {
        RunnerConfig {
            budget_ms: 1_000,
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn defaults_match_the_hosted_quota() {
        let c = RunnerConfig::default();
        assert_eq!(c.budget(), TimeDelta::milliseconds(240_000));
        assert_eq!(c.continuation_delay(), TimeDelta::milliseconds(120_000));
        assert_eq!(c.checkpoint_ttl(), TimeDelta::hours(1));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let c: RunnerConfig = serde_json::from_str(r#"{"budget_ms": 5}"#).unwrap();
        assert_eq!(c.budget_ms, 5);
        assert_eq!(c.continuation_delay_ms, 120_000);
    }

    #[test]
    fn suspends_before_the_item_that_crosses_the_budget() {
        let clock = Arc::new(ManualClock::default());
        let kv = SqliteKvStore::in_memory().unwrap();
        let scheduler = SqliteScheduler::in_memory(clock.clone()).unwrap();
        let runner = ResumableJobRunner::new(&kv, &scheduler, clock.as_ref(), config());
        let key = JobKey::new("doc", "Jun");

        let job = runner.begin(&key, "generateTimesheet", false).unwrap();
        let mut seen = Vec::new();
        let outcome = runner
            .run(&job, vec!["a", "b", "c", "d", "e"], |item| {
                seen.push(item.to_string());
                clock.advance_ms(500);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, ["a", "b"]);
        assert_eq!(
            outcome,
            RunOutcome::Suspended {
                processed: 2,
                remaining: 3
            }
        );
        assert_eq!(
            runner.checkpoints().status(&key).unwrap(),
            ResumeStatus::Pending(3)
        );
        assert!(runner.bridge().is_armed(&key).unwrap());
    }

    #[test]
    fn item_error_aborts_without_checkpoint() {
        let clock = Arc::new(ManualClock::default());
        let kv = SqliteKvStore::in_memory().unwrap();
        let scheduler = SqliteScheduler::in_memory(clock.clone()).unwrap();
        let runner = ResumableJobRunner::new(&kv, &scheduler, clock.as_ref(), config());
        let key = JobKey::new("doc", "Jun");

        let job = runner.begin(&key, "generateTimesheet", false).unwrap();
        let err = runner
            .run(&job, vec![1, 2, 3], |n| {
                if *n == 2 {
                    Err(Error::Other("boom".to_string()))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(
            runner.checkpoints().status(&key).unwrap(),
            ResumeStatus::NeverRan
        );
        assert!(!runner.bridge().is_armed(&key).unwrap());
    }

    #[test]
    fn overlapping_invocations_conflict() {
        let clock = Arc::new(ManualClock::default());
        let kv = SqliteKvStore::in_memory().unwrap();
        let scheduler = SqliteScheduler::in_memory(clock.clone()).unwrap();
        let runner = ResumableJobRunner::new(&kv, &scheduler, clock.as_ref(), config());
        let key = JobKey::new("doc", "Jun");

        let first = runner.begin(&key, "generateTimesheet", false).unwrap();
        let err = runner
            .begin(&key, "generateTimesheet", true)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        drop(first);
        assert!(runner.begin(&key, "generateTimesheet", true).is_ok());
    }

    #[test]
    fn resumed_run_picks_up_exactly_the_rest() {
        let clock = Arc::new(ManualClock::default());
        let kv = SqliteKvStore::in_memory().unwrap();
        let scheduler = SqliteScheduler::in_memory(clock.clone()).unwrap();
        let runner = ResumableJobRunner::new(&kv, &scheduler, clock.as_ref(), config());
        let key = JobKey::new("doc", "Jun");
        let mut seen: Vec<String> = Vec::new();

        let job = runner.begin(&key, "generateTimesheet", false).unwrap();
        let first = runner
            .run(&job, vec!["a", "b", "c", "d", "e"], |item| {
                seen.push(item.to_string());
                clock.advance_ms(500);
                Ok(())
            })
            .unwrap();
        assert!(first.is_suspended());
        drop(job);

        let mut job = runner.begin(&key, "generateTimesheet", true).unwrap();
        assert!(!runner.bridge().is_armed(&key).unwrap());
        let checkpoint = job.resume_point::<String>().unwrap().unwrap();
        assert_eq!(checkpoint.remaining, ["c", "d", "e"]);
        assert!(job.resume_point::<String>().unwrap().is_none());

        let second = runner
            .run(&job, checkpoint.remaining, |item| {
                seen.push(item.clone());
                clock.advance_ms(100);
                Ok(())
            })
            .unwrap();

        assert_eq!(second, RunOutcome::Completed { processed: 3 });
        assert_eq!(seen, ["a", "b", "c", "d", "e"]);
        assert_eq!(
            runner.checkpoints().status(&key).unwrap(),
            ResumeStatus::Finished
        );
    }

    #[test]
    fn slow_items_keep_the_lease() {
        let clock = Arc::new(ManualClock::default());
        let kv = SqliteKvStore::in_memory().unwrap();
        let scheduler = SqliteScheduler::in_memory(clock.clone()).unwrap();
        let runner = ResumableJobRunner::new(
            &kv,
            &scheduler,
            clock.as_ref(),
            RunnerConfig {
                budget_ms: 10_000,
                lease_ttl_ms: 2_000,
                ..RunnerConfig::default()
            },
        );
        let key = JobKey::new("doc", "Jun");

        let job = runner.begin(&key, "generateTimesheet", false).unwrap();
        let mut rival = None;
        runner
            .run(&job, vec![1, 2], |n| {
                if *n == 1 {
                    // Outlasts the lease taken at begin.
                    clock.advance_ms(2_500);
                } else {
                    rival = Some(runner.begin(&key, "generateTimesheet", true).err().map(|e| e.kind()));
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(rival, Some(Some(ErrorKind::Conflict)));
    }
}
