//! Store handles for one batch of invocations.
//!
//! A session opens the key-value store, the scheduler and the workspace,
//! builds a [`JobContext`] per invocation and writes the workspace back when
//! asked. The daemon opens a fresh session for every batch of due tasks.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::FixedOffset;
use tracing::debug;

use crate::calendar::Calendar;
use crate::clock::Clock;
use crate::config::{Config, Settings};
use crate::error::Result;
use crate::jobs::report::Notifier;
use crate::jobs::{Invocation, JobContext, invoke};
use crate::runner::{ResumableJobRunner, RunOutcome};
use crate::scheduler::{SchedulerBridge, SqliteScheduler};
use crate::store::kv::SqliteKvStore;
use crate::store::memory::MemoryWorkspace;

pub struct Session {
    kv: SqliteKvStore,
    scheduler: SqliteScheduler,
    workspace: MemoryWorkspace,
    workspace_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    settings: Settings,
    offset: FixedOffset,
}

impl Session {
    /// Open the stores named by `config`.
    pub fn open(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let kv = SqliteKvStore::open(&config.db_path)?;
        let scheduler = SqliteScheduler::open(&config.db_path, clock.clone())?;
        let workspace = MemoryWorkspace::load(&config.workspace_path)?;
        debug!(
            db = %config.db_path.display(),
            workspace = %config.workspace_path.display(),
            "session opened"
        );
        Ok(Self {
            kv,
            scheduler,
            workspace,
            workspace_path: Some(config.workspace_path.clone()),
            clock,
            offset: config.settings.utc_offset()?,
            settings: config.settings.clone(),
        })
    }

    /// A session that lives only in memory.
    pub fn in_memory(settings: Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            kv: SqliteKvStore::in_memory()?,
            scheduler: SqliteScheduler::in_memory(clock.clone())?,
            workspace: MemoryWorkspace::new(),
            workspace_path: None,
            clock,
            offset: settings.utc_offset()?,
            settings,
        })
    }

    pub fn kv(&self) -> &SqliteKvStore {
        &self.kv
    }

    pub fn scheduler(&self) -> &SqliteScheduler {
        &self.scheduler
    }

    pub fn workspace(&self) -> &MemoryWorkspace {
        &self.workspace
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn calendar(&self) -> Calendar {
        Calendar::new(self.clock.as_ref(), self.offset)
    }

    pub fn bridge(&self) -> SchedulerBridge<'_> {
        SchedulerBridge::new(&self.scheduler, &self.kv)
    }

    pub fn runner(&self) -> ResumableJobRunner<'_> {
        ResumableJobRunner::new(
            &self.kv,
            &self.scheduler,
            self.clock.as_ref(),
            self.settings.runner.clone(),
        )
    }

    /// Run one invocation through [`invoke`].
    pub fn run(&self, inv: &Invocation, notifier: &dyn Notifier) -> Result<RunOutcome> {
        let runner = self.runner();
        let ctx = JobContext {
            tabular: &self.workspace,
            drive: &self.workspace,
            runner: &runner,
            clock: self.clock.as_ref(),
            calendar: self.calendar(),
            folders: &self.settings.folders,
            notifier,
        };
        invoke(&ctx, inv)
    }

    /// Write the workspace back to its file, if it has one.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.workspace_path {
            self.workspace.save(path)?;
            debug!(workspace = %path.display(), "workspace saved");
        }
        Ok(())
    }
}
