//! User-facing alerts and the durable error log.

use std::cell::RefCell;

use chrono::{DateTime, Utc};

use crate::error::{Error, ErrorKind, Result};
use crate::store::drive::{DriveStore, find_or_create_folder, find_or_create_spreadsheet};
use crate::store::tabular::{SheetRef, TabularStore, row};

pub const HEADER_ALERT: &str = "Please ensure that the HEADER NAMING CONVENTION HAS NOT CHANGED";
pub const INTERNAL_ALERT: &str = "Internal Error. Please wait for awhile and try again later!";
pub const BACKGROUND_NOTICE: &str =
    "This may take a while. The job will keep running in the background.";

pub const ERROR_LOG: &str = "Error Log";
const ERROR_LOG_HEADER: [&str; 4] = ["Timestamp", "Kind", "Job", "Message"];

/// Alert text for a failed interactive invocation.
pub fn alert_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Structural => HEADER_ALERT,
        ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::Storage | ErrorKind::Internal => {
            INTERNAL_ALERT
        }
    }
}

/// Where interactive invocations show messages.
pub trait Notifier {
    /// Blocking error alert.
    fn alert(&self, title: &str, message: &str);

    /// Informational notice.
    fn notice(&self, message: &str);
}

/// Writes alerts and notices to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn alert(&self, title: &str, message: &str) {
        eprintln!("[{title}] {message}");
    }

    fn notice(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Keeps every message, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: RefCell<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, title: &str, message: &str) {
        self.messages.borrow_mut().push(format!("{title}: {message}"));
    }

    fn notice(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

/// Append-only error log sheet, kept in `<main folder>/ESS {year}/Error Log`.
pub struct ErrorLog<'a> {
    tabular: &'a dyn TabularStore,
    drive: &'a dyn DriveStore,
    main_folder: &'a str,
}

impl<'a> ErrorLog<'a> {
    pub fn new(tabular: &'a dyn TabularStore, drive: &'a dyn DriveStore, main_folder: &'a str) -> Self {
        Self {
            tabular,
            drive,
            main_folder,
        }
    }

    /// Find or create the log sheet for `year`.
    pub fn sheet(&self, year: i32) -> Result<SheetRef> {
        let main = find_or_create_folder(self.drive, self.main_folder, None)?;
        let year_folder = find_or_create_folder(self.drive, &format!("ESS {year}"), Some(&main))?;
        let (file, _) = find_or_create_spreadsheet(self.drive, ERROR_LOG, Some(&year_folder))?;
        let sheet = self.tabular.insert_sheet(&file.id, ERROR_LOG)?;
        if self.tabular.read_grid(&sheet)?.is_empty() {
            self.tabular.write_range(&sheet, 0, 0, &[row(&ERROR_LOG_HEADER)])?;
        }
        Ok(sheet)
    }

    pub fn append(&self, at: DateTime<Utc>, year: i32, job: &str, error: &Error) -> Result<()> {
        let sheet = self.sheet(year)?;
        let entry = vec![
            at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            error.kind().to_string(),
            job.to_string(),
            error.to_string(),
        ];
        self.tabular.append_rows(&sheet, &[entry])
    }
}
