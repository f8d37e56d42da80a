//! Dispatcher: yearly tasks, firing due continuations, restarts.

mod common;

use std::sync::Arc;

use chrono::{TimeDelta, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use common::Fixture;
use crewsheet::checkpoint::{CheckpointStore, ResumeStatus};
use crewsheet::clock::{Clock, ManualClock};
use crewsheet::config::{Config, Settings};
use crewsheet::dispatch::{Dispatcher, TickReport, ensure_yearly_tasks, fire_due};
use crewsheet::jobs::Callback;
use crewsheet::model::JobKey;
use crewsheet::scheduler::Scheduler;
use crewsheet::session::Session;
use crewsheet::store::drive::{find_file, find_folder};
use crewsheet::store::{KvStore, TabularStore};

fn test_config(dir: &TempDir) -> Config {
    let mut settings = Settings::default();
    settings.dispatch.poll_interval_ms = 10;
    Config {
        db_path: dir.path().join("crewsheet.db"),
        workspace_path: dir.path().join("workspace.json"),
        settings,
        otel_endpoint: None,
        log_level: "info".to_string(),
    }
}

fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(common::start()))
}

// ---------------------------------------------------------------------------
// Yearly tasks
// ---------------------------------------------------------------------------

#[test]
fn yearly_tasks_are_armed_once_for_the_year_end() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let session = Session::open(&config, test_clock()).unwrap();

    ensure_yearly_tasks(&session).unwrap();
    ensure_yearly_tasks(&session).unwrap();

    let tasks = session.scheduler().list_scheduled().unwrap();
    assert_eq!(tasks.len(), 2);
    let expected = Utc.with_ymd_and_hms(2026, 12, 9, 16, 0, 0).unwrap();
    assert!(tasks.iter().all(|t| t.fire_at == expected));
    let mut names: Vec<_> = tasks.iter().map(|t| t.callback.as_str()).collect();
    names.sort();
    assert_eq!(names, ["createYearlyHierarchy", "createYearlySpreadsheets"]);
}

#[tokio::test]
async fn year_end_tick_builds_next_year_and_rearms() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let clock = test_clock();
    {
        let session = Session::open(&config, clock.clone()).unwrap();
        ensure_yearly_tasks(&session).unwrap();
    }

    let dispatcher = Dispatcher::new(config.clone(), clock.clone());
    assert_eq!(dispatcher.tick().await.unwrap(), TickReport::default());

    clock.set(Utc.with_ymd_and_hms(2026, 12, 10, 1, 0, 0).unwrap());
    let report = dispatcher.tick().await.unwrap();
    assert_eq!(report, TickReport { fired: 2, failed: 0 });

    // A fresh session sees what the tick saved.
    let session = Session::open(&config, clock.clone()).unwrap();
    let ws = session.workspace();
    let next = find_folder(ws, "ESS 2027", None).unwrap().unwrap();
    let roster = find_file(ws, "Yearly Roster Mastersheet", Some(&next))
        .unwrap()
        .unwrap();
    assert_eq!(ws.sheet_names(&roster.id).unwrap(), ["Jan"]);

    let tasks = session.scheduler().list_scheduled().unwrap();
    let expected = Utc.with_ymd_and_hms(2027, 12, 9, 16, 0, 0).unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.fire_at == expected));
}

#[tokio::test]
async fn run_arms_yearly_tasks_and_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let clock = test_clock();
    let dispatcher = Dispatcher::new(config.clone(), clock.clone());

    let handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.run().await }
    });
    dispatcher.shutdown();
    handle.await.unwrap().unwrap();

    let session = Session::open(&config, clock).unwrap();
    assert_eq!(session.scheduler().list_scheduled().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Continuations
// ---------------------------------------------------------------------------

#[test]
fn unknown_callbacks_are_dropped() {
    let f = Fixture::new(Settings::default(), 0);
    f.session
        .scheduler()
        .schedule_once("doSomething", TimeDelta::zero())
        .unwrap();

    let report = fire_due(&f.session).unwrap();
    assert_eq!(report, TickReport { fired: 0, failed: 1 });
    assert!(f.session.scheduler().list_scheduled().unwrap().is_empty());
}

#[test]
fn held_job_is_rearmed_instead_of_lost() {
    let f = Fixture::new(Settings::default(), 0);
    let roster = f.roster();
    let key = JobKey::new(&roster.spreadsheet_id, &roster.sheet);
    let bridge = f.session.bridge();
    bridge
        .arm(&key, Callback::GenerateTimesheet.name(), TimeDelta::minutes(2))
        .unwrap();

    let checkpoints = CheckpointStore::new(f.session.kv(), f.session.clock());
    let _held = checkpoints
        .acquire_lease(&key, Uuid::new_v4(), TimeDelta::hours(1))
        .unwrap();

    f.clock.advance(TimeDelta::minutes(3));
    let report = fire_due(&f.session).unwrap();
    assert_eq!(report, TickReport { fired: 1, failed: 1 });

    let pending = bridge.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(bridge.job_for(pending[0].handle).unwrap(), Some(key.clone()));
    assert!(pending[0].fire_at > f.clock.now());
}

#[test]
fn continuation_state_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let clock = test_clock();
    let key = JobKey::new("ss-1", "Jun");

    {
        let session = Session::open(&config, clock.clone()).unwrap();
        session
            .bridge()
            .arm(&key, Callback::GenerateTimesheet.name(), TimeDelta::minutes(2))
            .unwrap();
    }

    let session = Session::open(&config, clock).unwrap();
    let bridge = session.bridge();
    assert!(bridge.is_armed(&key).unwrap());
    let pending = bridge.pending().unwrap();
    assert_eq!(bridge.job_for(pending[0].handle).unwrap(), Some(key));
}

#[test]
fn a_broken_task_does_not_lose_the_ones_after_it() {
    let f = Fixture::new(Settings::default(), 0);
    let broken = f
        .session
        .scheduler()
        .schedule_once(Callback::GenerateTimesheet.name(), TimeDelta::minutes(1))
        .unwrap();
    f.session
        .kv()
        .put(&format!("continuation:{broken}"), "{not json", None)
        .unwrap();

    let availability = f.availability();
    let key = JobKey::new(&availability.spreadsheet_id, &availability.sheet);
    f.session
        .bridge()
        .arm(&key, Callback::RefreshAvailabilityData.name(), TimeDelta::minutes(2))
        .unwrap();

    f.clock.advance(TimeDelta::minutes(3));
    let report = fire_due(&f.session).unwrap();
    assert_eq!(report, TickReport { fired: 1, failed: 1 });

    let checkpoints = CheckpointStore::new(f.session.kv(), f.session.clock());
    assert_eq!(checkpoints.status(&key).unwrap(), ResumeStatus::Finished);
    assert!(f.session.scheduler().list_scheduled().unwrap().is_empty());
    assert!(f.session.bridge().job_for(broken).unwrap().is_none());
}

#[test]
fn failed_continuation_leaves_no_trigger_behind() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let clock = test_clock();
    // No main folder, so the job fails before it claims its key.
    let session = Session::open(&config, clock.clone()).unwrap();
    let key = JobKey::new("fld-000001", Callback::CreateNewIndividualTemplate.name());
    let bridge = session.bridge();
    let handle = bridge
        .arm(&key, Callback::CreateNewIndividualTemplate.name(), TimeDelta::minutes(2))
        .unwrap();

    clock.advance(TimeDelta::minutes(3));
    let report = fire_due(&session).unwrap();
    assert_eq!(report, TickReport { fired: 1, failed: 1 });
    assert!(session.kv().get(&key.trigger_key()).unwrap().is_none());
    assert!(bridge.job_for(handle).unwrap().is_none());
}
