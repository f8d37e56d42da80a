//! Shared fixtures: a seeded in-memory session and a clock that moves on
//! every read.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crewsheet::clock::Clock;
use crewsheet::config::Settings;
use crewsheet::dispatch::fire_due;
use crewsheet::jobs::layout::{ROSTER_BLOCK, ROSTER_FIXED_COLS};
use crewsheet::jobs::report::RecordingNotifier;
use crewsheet::jobs::{Callback, Invocation};
use crewsheet::session::Session;
use crewsheet::store::drive::{DriveStore, FolderRef, find_folder};
use crewsheet::store::{SheetRef, TabularStore};

pub const YEAR: i32 = 2026;

/// 10:00 on 15 June 2026 in the roster's +08:00 time zone.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 2, 0, 0).unwrap()
}

/// Advances by `step` after every read, so a job's time budget runs out
/// after a predictable amount of work.
pub struct SteppingClock {
    now: Mutex<DateTime<Utc>>,
    step: TimeDelta,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step_ms: i64) -> Self {
        Self {
            now: Mutex::new(start),
            step: TimeDelta::milliseconds(step_ms),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        let at = *now;
        *now += self.step;
        at
    }
}

/// Settings with a one second budget.
pub fn tight_budget() -> Settings {
    let mut settings = Settings::default();
    settings.runner.budget_ms = 1_000;
    settings
}

pub struct Fixture {
    pub session: Session,
    pub clock: Arc<SteppingClock>,
    pub notifier: RecordingNotifier,
}

impl Fixture {
    /// A session at [`start`] holding the main folder, this year's folder
    /// tree and yearly spreadsheets, the Individuals folder and an empty
    /// personnel master.
    pub fn new(settings: Settings, step_ms: i64) -> Self {
        let clock = Arc::new(SteppingClock::new(start(), step_ms));
        let session = Session::in_memory(settings, clock.clone()).unwrap();
        let fixture = Self {
            session,
            clock,
            notifier: RecordingNotifier::default(),
        };

        let outcome = fixture
            .run(Invocation::interactive(Callback::CreateYearlySpreadsheets, None).with_year(YEAR))
            .unwrap();
        assert!(!outcome.is_suspended());

        let ws = fixture.session.workspace();
        let main = fixture.main_folder();
        ws.create_folder(&fixture.folders().individuals, Some(&main))
            .unwrap();
        let master = ws.create_spreadsheet(&fixture.folders().master_file, None).unwrap();
        ws.put_grid(
            &SheetRef::new(master.id, &fixture.folders().master_sheet),
            vec![row(&["ESS ID", "Name", "Mobile", "Area"])],
        )
        .unwrap();
        fixture
    }

    pub fn run(&self, inv: Invocation) -> crewsheet::error::Result<crewsheet::runner::RunOutcome> {
        self.session.run(&inv, &self.notifier)
    }

    /// Advance past the continuation delay and fire due tasks until none
    /// are left. Returns how many rounds fired something.
    pub fn drain(&self) -> usize {
        let mut rounds = 0;
        loop {
            self.clock.advance(TimeDelta::minutes(3));
            let report = fire_due(&self.session).unwrap();
            if report.fired == 0 {
                return rounds;
            }
            assert_eq!(report.failed, 0, "a continuation failed");
            rounds += 1;
            assert!(rounds < 50, "continuations never settled");
        }
    }

    pub fn folders(&self) -> &crewsheet::config::FolderNames {
        &self.session.settings().folders
    }

    pub fn main_folder(&self) -> FolderRef {
        find_folder(self.session.workspace(), &self.folders().main, None)
            .unwrap()
            .unwrap()
    }

    pub fn individuals(&self) -> FolderRef {
        find_folder(
            self.session.workspace(),
            &self.folders().individuals,
            Some(&self.main_folder()),
        )
        .unwrap()
        .unwrap()
    }

    /// Yearly spreadsheet sheet by file name.
    pub fn yearly(&self, file: &str, sheet: &str) -> SheetRef {
        let ws = self.session.workspace();
        let found = ws.files_named(file).unwrap();
        SheetRef::new(&found[0].id, sheet)
    }

    pub fn roster(&self) -> SheetRef {
        self.yearly(&self.folders().yearly_roster.clone(), "Jun")
    }

    pub fn availability(&self) -> SheetRef {
        self.yearly(&self.folders().yearly_availability.clone(), "Jun")
    }

    pub fn master(&self) -> SheetRef {
        self.yearly(&self.folders().master_file.clone(), &self.folders().master_sheet)
    }

    pub fn grid(&self, sheet: &SheetRef) -> Vec<Vec<String>> {
        self.session.workspace().read_grid(sheet).unwrap()
    }

    /// Grid of the only file with this name.
    pub fn file_grid(&self, file: &str, sheet: &str) -> Vec<Vec<String>> {
        let files = self.session.workspace().files_named(file).unwrap();
        assert_eq!(files.len(), 1, "expected exactly one {file}");
        self.grid(&SheetRef::new(&files[0].id, sheet))
    }

    /// Append data rows below the roster's header rows.
    pub fn fill_roster(&self, rows: Vec<Vec<String>>) {
        let roster = self.roster();
        self.session
            .workspace()
            .write_range(&roster, 2, 0, &rows)
            .unwrap();
    }
}

pub fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

/// One roster data row. `days` holds (0-based day, availability, role,
/// event id).
pub fn roster_row(id: &str, name: &str, days: &[(usize, &str, &str, &str)]) -> Vec<String> {
    let last = days.iter().map(|d| d.0).max().unwrap_or(0);
    let mut cells = vec![String::new(); ROSTER_FIXED_COLS + (last + 1) * ROSTER_BLOCK.len()];
    cells[0] = id.to_string();
    cells[1] = name.to_string();
    for &(day, avail, role, event) in days {
        let block = ROSTER_FIXED_COLS + day * ROSTER_BLOCK.len();
        cells[block] = avail.to_string();
        cells[block + 2] = role.to_string();
        cells[block + 4] = event.to_string();
    }
    cells
}
