//! One-shot delayed task scheduler and the bridge that binds tasks to jobs.
//!
//! A [`Scheduler`] only knows callback names and fire times. The
//! [`SchedulerBridge`] keeps at most one live continuation per job key by
//! storing the task handle under `{key}:trigger` and cancelling it before
//! arming a new one. A reverse entry `continuation:{handle}` lets the
//! dispatcher find the job a fired task belongs to.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::JobKey;
use crate::store::kv::KvStore;

/// Opaque id of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub Uuid);

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskHandle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TaskHandle)
            .map_err(|e| Error::Other(format!("bad task handle {s:?}: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub handle: TaskHandle,
    pub callback: String,
    pub fire_at: DateTime<Utc>,
}

pub trait Scheduler {
    fn schedule_once(&self, callback: &str, delay: TimeDelta) -> Result<TaskHandle>;

    /// Cancel a task. Unknown or already-fired handles are ignored.
    fn cancel(&self, handle: TaskHandle) -> Result<()>;

    /// Tasks not yet fired, earliest first.
    fn list_scheduled(&self) -> Result<Vec<ScheduledTask>>;
}

// ---------------------------------------------------------------------------
// SQLite scheduler
// ---------------------------------------------------------------------------

/// Durable scheduler backed by a `scheduled_tasks` table. Tasks fire when
/// a dispatcher calls [`SqliteScheduler::take_due`].
pub struct SqliteScheduler {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl SqliteScheduler {
    pub fn open(path: impl AsRef<std::path::Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let scheduler = Self { conn, clock };
        scheduler.init()?;
        Ok(scheduler)
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let scheduler = Self { conn, clock };
        scheduler.init()?;
        Ok(scheduler)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                handle      TEXT PRIMARY KEY,
                callback    TEXT NOT NULL,
                fire_at     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_fire_at ON scheduled_tasks(fire_at);
            ",
        )?;
        Ok(())
    }

    /// Remove and return every task due at or before `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let tx = self.conn.unchecked_transaction()?;
        let due = {
            let mut stmt = tx.prepare(
                "SELECT handle, callback, fire_at FROM scheduled_tasks
                 WHERE fire_at <= ?1 ORDER BY fire_at ASC, created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![to_stored(now)], row_to_raw)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(raw_to_task)
                .collect::<Result<Vec<_>>>()?
        };
        tx.execute(
            "DELETE FROM scheduled_tasks WHERE fire_at <= ?1",
            params![to_stored(now)],
        )?;
        tx.commit()?;
        Ok(due)
    }
}

impl Scheduler for SqliteScheduler {
    fn schedule_once(&self, callback: &str, delay: TimeDelta) -> Result<TaskHandle> {
        let now = self.clock.now();
        let handle = TaskHandle(Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO scheduled_tasks (handle, callback, fire_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                handle.to_string(),
                callback,
                to_stored(now + delay),
                to_stored(now)
            ],
        )?;
        Ok(handle)
    }

    fn cancel(&self, handle: TaskHandle) -> Result<()> {
        self.conn.execute(
            "DELETE FROM scheduled_tasks WHERE handle = ?1",
            params![handle.to_string()],
        )?;
        Ok(())
    }

    fn list_scheduled(&self) -> Result<Vec<ScheduledTask>> {
        let mut stmt = self.conn.prepare(
            "SELECT handle, callback, fire_at FROM scheduled_tasks
             ORDER BY fire_at ASC, created_at ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_raw)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(raw_to_task).collect()
    }
}

type RawTask = (String, String, String);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTask> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn raw_to_task((handle, callback, fire_at): RawTask) -> Result<ScheduledTask> {
    let fire_at = DateTime::parse_from_rfc3339(&fire_at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad fire_at for task {handle}: {e}")))?;
    Ok(ScheduledTask {
        handle: handle.parse()?,
        callback,
        fire_at,
    })
}

fn to_stored(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

const CONTINUATION_PREFIX: &str = "continuation:";

fn continuation_key(handle: TaskHandle) -> String {
    format!("{CONTINUATION_PREFIX}{handle}")
}

/// Binds scheduler tasks to job keys.
pub struct SchedulerBridge<'a> {
    scheduler: &'a dyn Scheduler,
    kv: &'a dyn KvStore,
}

impl<'a> SchedulerBridge<'a> {
    pub fn new(scheduler: &'a dyn Scheduler, kv: &'a dyn KvStore) -> Self {
        Self { scheduler, kv }
    }

    /// Schedule `callback` for `key` after `delay`, replacing any
    /// continuation already armed for the key.
    pub fn arm(&self, key: &JobKey, callback: &str, delay: TimeDelta) -> Result<TaskHandle> {
        self.disarm(key)?;
        let handle = self.scheduler.schedule_once(callback, delay)?;
        self.kv.put(&key.trigger_key(), &handle.to_string(), None)?;
        self.kv
            .put(&continuation_key(handle), &serde_json::to_string(key)?, None)?;
        info!(
            key = %key,
            callback,
            %handle,
            delay_ms = delay.num_milliseconds(),
            "continuation armed"
        );
        Ok(handle)
    }

    /// Cancel and forget the continuation for `key`. Returns whether one
    /// was stored.
    pub fn disarm(&self, key: &JobKey) -> Result<bool> {
        let Some(handle) = self.stored_handle(key)? else {
            return Ok(false);
        };
        self.scheduler.cancel(handle)?;
        self.kv.delete(&continuation_key(handle))?;
        self.kv.delete(&key.trigger_key())?;
        debug!(key = %key, %handle, "continuation disarmed");
        Ok(true)
    }

    /// Whether `key` has a continuation that has not fired yet.
    pub fn is_armed(&self, key: &JobKey) -> Result<bool> {
        let Some(handle) = self.stored_handle(key)? else {
            return Ok(false);
        };
        Ok(self
            .scheduler
            .list_scheduled()?
            .iter()
            .any(|t| t.handle == handle))
    }

    pub fn pending(&self) -> Result<Vec<ScheduledTask>> {
        self.scheduler.list_scheduled()
    }

    /// The job a task was armed for, if the bridge armed it.
    pub fn job_for(&self, handle: TaskHandle) -> Result<Option<JobKey>> {
        self.kv
            .get(&continuation_key(handle))?
            .map(|entry| serde_json::from_str(&entry.value).map_err(Error::from))
            .transpose()
    }

    /// Forget a task that has fired. Its reverse entry is dropped, and so
    /// is the job's trigger while it still names this task. A continuation
    /// armed since then is left alone.
    pub fn release(&self, handle: TaskHandle) -> Result<()> {
        let slot = continuation_key(handle);
        let Some(entry) = self.kv.get(&slot)? else {
            return Ok(());
        };
        self.kv.delete(&slot)?;
        let Ok(key) = serde_json::from_str::<JobKey>(&entry.value) else {
            warn!(%handle, "dropped unreadable continuation entry");
            return Ok(());
        };
        if self.stored_handle(&key)? == Some(handle) {
            self.kv.delete(&key.trigger_key())?;
            debug!(key = %key, %handle, "fired continuation released");
        }
        Ok(())
    }

    fn stored_handle(&self, key: &JobKey) -> Result<Option<TaskHandle>> {
        self.kv
            .get(&key.trigger_key())?
            .map(|entry| entry.value.parse())
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::kv::SqliteKvStore;

    fn setup() -> (Arc<ManualClock>, SqliteScheduler, SqliteKvStore) {
        let clock = Arc::new(ManualClock::default());
        let scheduler = SqliteScheduler::in_memory(clock.clone()).unwrap();
        let kv = SqliteKvStore::in_memory().unwrap();
        (clock, scheduler, kv)
    }

    #[test]
    fn take_due_returns_only_due_tasks_once() {
        let (clock, scheduler, _) = setup();
        let early = scheduler
            .schedule_once("generateTimesheet", TimeDelta::seconds(10))
            .unwrap();
        scheduler
            .schedule_once("refreshAvailabilityData", TimeDelta::seconds(60))
            .unwrap();

        clock.advance(TimeDelta::seconds(10));
        let due = scheduler.take_due(clock.now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].handle, early);
        assert_eq!(due[0].callback, "generateTimesheet");

        assert!(scheduler.take_due(clock.now()).unwrap().is_empty());
        assert_eq!(scheduler.list_scheduled().unwrap().len(), 1);
    }

    #[test]
    fn cancel_unknown_handle_is_a_no_op() {
        let (_, scheduler, _) = setup();
        scheduler.cancel(TaskHandle(Uuid::new_v4())).unwrap();
    }

    #[test]
    fn arming_twice_leaves_one_continuation() {
        let (_, scheduler, kv) = setup();
        let bridge = SchedulerBridge::new(&scheduler, &kv);
        let key = JobKey::new("doc", "Jun");

        let first = bridge
            .arm(&key, "generateTimesheet", TimeDelta::minutes(2))
            .unwrap();
        let second = bridge
            .arm(&key, "generateTimesheet", TimeDelta::minutes(2))
            .unwrap();

        let pending = bridge.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].handle, second);
        assert!(bridge.job_for(first).unwrap().is_none());
        assert_eq!(bridge.job_for(second).unwrap(), Some(key.clone()));
        assert!(bridge.is_armed(&key).unwrap());
    }

    #[test]
    fn disarm_clears_task_and_handle() {
        let (_, scheduler, kv) = setup();
        let bridge = SchedulerBridge::new(&scheduler, &kv);
        let key = JobKey::new("doc", "Jun");

        assert!(!bridge.disarm(&key).unwrap());
        let handle = bridge
            .arm(&key, "generateTimesheet", TimeDelta::minutes(2))
            .unwrap();
        assert!(bridge.disarm(&key).unwrap());

        assert!(bridge.pending().unwrap().is_empty());
        assert!(!bridge.is_armed(&key).unwrap());
        assert!(bridge.job_for(handle).unwrap().is_none());
    }

    #[test]
    fn keys_for_other_jobs_are_untouched() {
        let (_, scheduler, kv) = setup();
        let bridge = SchedulerBridge::new(&scheduler, &kv);
        let jun = JobKey::new("doc", "Jun");
        let jul = JobKey::new("doc", "Jul");

        bridge.arm(&jun, "generateTimesheet", TimeDelta::minutes(2)).unwrap();
        bridge.arm(&jul, "generateTimesheet", TimeDelta::minutes(2)).unwrap();
        bridge.disarm(&jun).unwrap();

        assert!(bridge.is_armed(&jul).unwrap());
        assert_eq!(bridge.pending().unwrap().len(), 1);
    }

    #[test]
    fn release_forgets_a_fired_task() {
        let (clock, scheduler, kv) = setup();
        let bridge = SchedulerBridge::new(&scheduler, &kv);
        let key = JobKey::new("doc", "Jun");
        let handle = bridge
            .arm(&key, "generateTimesheet", TimeDelta::minutes(2))
            .unwrap();

        clock.advance(TimeDelta::minutes(2));
        assert_eq!(scheduler.take_due(clock.now()).unwrap().len(), 1);
        bridge.release(handle).unwrap();

        assert!(bridge.job_for(handle).unwrap().is_none());
        assert!(kv.get(&key.trigger_key()).unwrap().is_none());
        bridge.release(handle).unwrap();
    }

    #[test]
    fn release_keeps_a_newer_continuation() {
        let (_, scheduler, kv) = setup();
        let bridge = SchedulerBridge::new(&scheduler, &kv);
        let key = JobKey::new("doc", "Jun");
        let fired = bridge
            .arm(&key, "generateTimesheet", TimeDelta::zero())
            .unwrap();
        let rearmed = bridge
            .arm(&key, "generateTimesheet", TimeDelta::minutes(2))
            .unwrap();
        // The fired task's reverse entry outlived the re-arm.
        kv.put(&continuation_key(fired), &serde_json::to_string(&key).unwrap(), None)
            .unwrap();

        bridge.release(fired).unwrap();
        assert!(bridge.is_armed(&key).unwrap());
        assert_eq!(bridge.job_for(rearmed).unwrap(), Some(key));
    }

    #[test]
    fn release_drops_unreadable_entries() {
        let (_, scheduler, kv) = setup();
        let bridge = SchedulerBridge::new(&scheduler, &kv);
        let handle = scheduler
            .schedule_once("generateTimesheet", TimeDelta::zero())
            .unwrap();
        kv.put(&continuation_key(handle), "{not json", None).unwrap();

        assert!(bridge.job_for(handle).is_err());
        bridge.release(handle).unwrap();
        assert!(bridge.job_for(handle).unwrap().is_none());
    }
}
