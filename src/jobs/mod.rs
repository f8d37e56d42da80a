//! Entry points.
//!
//! Every menu action and trigger maps to a [`Callback`]. [`invoke`] runs one
//! invocation against a [`JobContext`] and is the only place errors are
//! caught: they are counted, logged, appended to the error log and, for
//! interactive invocations, shown as an alert before being returned.

pub mod availability;
pub mod individual;
pub mod layout;
pub mod report;
pub mod roster;
pub mod timesheet;
pub mod yearly;

use std::str::FromStr;

use opentelemetry::KeyValue;
use tracing::{error, info, warn};

use crate::calendar::Calendar;
use crate::clock::Clock;
use crate::config::FolderNames;
use crate::error::{Error, Result};
use crate::model::JobKey;
use crate::runner::{ResumableJobRunner, RunOutcome};
use crate::store::drive::{DriveStore, FolderRef, find_file, find_folder};
use crate::store::tabular::{SheetRef, TabularStore};
use crate::telemetry::metrics;

use layout::TemplateKind;
use report::{BACKGROUND_NOTICE, ErrorLog, Notifier, alert_message};

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Name under which an entry point is scheduled and invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callback {
    UpdateRosterSpreadsheet,
    RefreshAvailabilityData,
    GenerateTimesheet,
    CreateNewIndividualTemplate,
    GenerateIndividualSpreadsheet,
    CreateYearlyHierarchy,
    CreateYearlySpreadsheets,
    CreateMonthlyAvailSpreadsheet,
    CreateMonthlyRosterSpreadsheet,
}

impl Callback {
    pub const ALL: [Callback; 9] = [
        Callback::UpdateRosterSpreadsheet,
        Callback::RefreshAvailabilityData,
        Callback::GenerateTimesheet,
        Callback::CreateNewIndividualTemplate,
        Callback::GenerateIndividualSpreadsheet,
        Callback::CreateYearlyHierarchy,
        Callback::CreateYearlySpreadsheets,
        Callback::CreateMonthlyAvailSpreadsheet,
        Callback::CreateMonthlyRosterSpreadsheet,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Callback::UpdateRosterSpreadsheet => "updateRosterSpreadsheet",
            Callback::RefreshAvailabilityData => "refreshAvailabilityData",
            Callback::GenerateTimesheet => "generateTimesheet",
            Callback::CreateNewIndividualTemplate => "createNewIndividualTemplate",
            Callback::GenerateIndividualSpreadsheet => "generateIndividualSpreadsheet",
            Callback::CreateYearlyHierarchy => "createYearlyHierarchy",
            Callback::CreateYearlySpreadsheets => "createYearlySpreadsheets",
            Callback::CreateMonthlyAvailSpreadsheet => "createMonthlyAvailSpreadsheet",
            Callback::CreateMonthlyRosterSpreadsheet => "createMonthlyRosterSpreadsheet",
        }
    }

    /// Whether the job checkpoints and re-arms itself.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            Callback::RefreshAvailabilityData
                | Callback::GenerateTimesheet
                | Callback::CreateNewIndividualTemplate
                | Callback::GenerateIndividualSpreadsheet
        )
    }

    /// Whether the job's key is the sheet it works on.
    pub fn targets_sheet(self) -> bool {
        matches!(
            self,
            Callback::UpdateRosterSpreadsheet
                | Callback::RefreshAvailabilityData
                | Callback::GenerateTimesheet
                | Callback::GenerateIndividualSpreadsheet
        )
    }
}

impl std::fmt::Display for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Callback {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Callback::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| Error::Validation(format!("unknown callback: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// One request to run an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub callback: Callback,
    /// The active sheet, for jobs that work on one.
    pub target: Option<SheetRef>,
    /// Continue from the job's checkpoint instead of starting over.
    pub resumed: bool,
    /// A user is waiting and can see alerts.
    pub interactive: bool,
    /// Year for the yearly housekeeping jobs. Defaults to next year.
    pub year: Option<i32>,
}

impl Invocation {
    /// A fresh run started by a user.
    pub fn interactive(callback: Callback, target: Option<SheetRef>) -> Self {
        Self {
            callback,
            target,
            resumed: false,
            interactive: true,
            year: None,
        }
    }

    /// A run started by a fired scheduled task. `key` is the job the task
    /// was armed for, if any.
    pub fn continuation(callback: Callback, key: Option<&JobKey>) -> Self {
        let target = key
            .filter(|_| callback.targets_sheet())
            .map(|k| SheetRef::new(&k.document_id, &k.scope));
        Self {
            callback,
            target,
            resumed: key.is_some() && callback.is_resumable(),
            interactive: false,
            year: None,
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    fn require_target(&self) -> Result<&SheetRef> {
        self.target
            .as_ref()
            .ok_or_else(|| Error::Validation(format!("{} needs a target sheet", self.callback)))
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything an entry point touches.
pub struct JobContext<'a> {
    pub tabular: &'a dyn TabularStore,
    pub drive: &'a dyn DriveStore,
    pub runner: &'a ResumableJobRunner<'a>,
    pub clock: &'a dyn Clock,
    pub calendar: Calendar,
    pub folders: &'a FolderNames,
    pub notifier: &'a dyn Notifier,
}

impl JobContext<'_> {
    /// The main folder. Its absence is structural.
    pub fn main_folder(&self) -> Result<FolderRef> {
        find_folder(self.drive, &self.folders.main, None)?
            .ok_or_else(|| Error::FolderNotFound(self.folders.main.clone()))
    }

    /// `<main>/<name>`, searched depth first.
    pub fn folder_under_main(&self, name: &str) -> Result<FolderRef> {
        let main = self.main_folder()?;
        find_folder(self.drive, name, Some(&main))?
            .ok_or_else(|| Error::FolderNotFound(format!("{}/{name}", main.name)))
    }

    /// `<main>/ESS {year}`.
    pub fn year_folder(&self, year: i32) -> Result<FolderRef> {
        self.folder_under_main(&self.folders.year_folder(year))
    }

    /// `<main>/ESS {year}/<name>`.
    pub fn folder_in_year(&self, year: i32, name: &str) -> Result<FolderRef> {
        let year_folder = self.year_folder(year)?;
        find_folder(self.drive, name, Some(&year_folder))?
            .ok_or_else(|| Error::FolderNotFound(format!("{}/{name}", year_folder.name)))
    }

    /// The yearly availability or roster spreadsheet id.
    pub fn yearly_spreadsheet(&self, year: i32, kind: TemplateKind) -> Result<String> {
        let (folder, file) = match kind {
            TemplateKind::Availability => {
                (&self.folders.availability, &self.folders.yearly_availability)
            }
            TemplateKind::Roster => (&self.folders.rostering, &self.folders.yearly_roster),
            TemplateKind::Timesheet | TemplateKind::Individual => {
                return Err(Error::Validation(format!("no yearly spreadsheet for {kind:?}")));
            }
        };
        let folder = self.folder_in_year(year, folder)?;
        find_file(self.drive, file, Some(&folder))?
            .map(|f| f.id)
            .ok_or_else(|| Error::FileNotFound(format!("{}/{file}", folder.name)))
    }

    /// The personnel master sheet.
    pub fn master_sheet(&self) -> Result<SheetRef> {
        let file = find_file(self.drive, &self.folders.master_file, None)?
            .ok_or_else(|| Error::FileNotFound(self.folders.master_file.clone()))?;
        Ok(SheetRef::new(file.id, &self.folders.master_sheet))
    }
}

// ---------------------------------------------------------------------------
// Invoke
// ---------------------------------------------------------------------------

/// Run one invocation and report its failure, if any.
pub fn invoke(ctx: &JobContext<'_>, inv: &Invocation) -> Result<RunOutcome> {
    let started = ctx.clock.now();
    let result = dispatch(ctx, inv);
    let elapsed = (ctx.clock.now() - started).num_milliseconds().max(0);
    metrics::invocation_duration_ms().record(
        elapsed as f64,
        &[KeyValue::new("callback", inv.callback.name())],
    );

    match &result {
        Ok(outcome) => {
            info!(
                callback = %inv.callback,
                processed = outcome.processed(),
                suspended = outcome.is_suspended(),
                elapsed_ms = elapsed,
                "invocation finished"
            );
            if outcome.is_suspended() && inv.interactive {
                ctx.notifier.notice(BACKGROUND_NOTICE);
            }
        }
        Err(e) => report_failure(ctx, inv, e),
    }
    result
}

fn dispatch(ctx: &JobContext<'_>, inv: &Invocation) -> Result<RunOutcome> {
    match inv.callback {
        Callback::UpdateRosterSpreadsheet => {
            roster::update_roster_spreadsheet(ctx, inv.require_target()?)
        }
        Callback::RefreshAvailabilityData => {
            availability::refresh_availability_data(ctx, inv.require_target()?, inv.resumed)
        }
        Callback::GenerateTimesheet => {
            timesheet::generate_timesheet(ctx, inv.require_target()?, inv.resumed)
        }
        Callback::CreateNewIndividualTemplate => {
            individual::create_new_individual_template(ctx, inv.resumed)
        }
        Callback::GenerateIndividualSpreadsheet => {
            individual::generate_individual_spreadsheet(ctx, inv.target.as_ref(), inv.resumed)
        }
        Callback::CreateYearlyHierarchy => {
            let year = inv.year.unwrap_or_else(|| ctx.calendar.next_year());
            yearly::create_yearly_hierarchy(ctx, year)?;
            Ok(RunOutcome::Completed { processed: 1 })
        }
        Callback::CreateYearlySpreadsheets => {
            let year = inv.year.unwrap_or_else(|| ctx.calendar.next_year());
            yearly::create_yearly_spreadsheets(ctx, year)?;
            Ok(RunOutcome::Completed { processed: 2 })
        }
        Callback::CreateMonthlyAvailSpreadsheet => {
            monthly(ctx, inv, TemplateKind::Availability)
        }
        Callback::CreateMonthlyRosterSpreadsheet => monthly(ctx, inv, TemplateKind::Roster),
    }
}

fn monthly(ctx: &JobContext<'_>, inv: &Invocation, kind: TemplateKind) -> Result<RunOutcome> {
    let spreadsheet_id = match &inv.target {
        Some(target) => target.spreadsheet_id.clone(),
        None => ctx.yearly_spreadsheet(ctx.calendar.year(), kind)?,
    };
    let created = yearly::create_monthly_sheet(ctx, &spreadsheet_id, kind)?;
    Ok(RunOutcome::Completed {
        processed: usize::from(created.is_some()),
    })
}

fn report_failure(ctx: &JobContext<'_>, inv: &Invocation, e: &Error) {
    let kind = e.kind();
    metrics::job_failures().add(
        1,
        &[
            KeyValue::new("callback", inv.callback.name()),
            KeyValue::new("kind", kind.to_string()),
        ],
    );
    error!(callback = %inv.callback, %kind, interactive = inv.interactive, "invocation failed: {e}");

    let log = ErrorLog::new(ctx.tabular, ctx.drive, &ctx.folders.main);
    if let Err(log_err) = log.append(ctx.clock.now(), ctx.calendar.year(), inv.callback.name(), e) {
        warn!("could not append to error log: {log_err}");
    }

    if inv.interactive {
        ctx.notifier.alert("Error", alert_message(kind));
    }
}
