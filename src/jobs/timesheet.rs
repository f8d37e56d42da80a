//! Per-event timesheets generated from the roster sheet.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::extract::{DATE_AXIS_ROW, NAME, extract};
use crate::model::{CrewAssignment, Event, JobKey};
use crate::runner::RunOutcome;
use crate::store::drive::{FolderRef, FolderPlan, ensure_hierarchy, find_or_create_folder, find_or_create_spreadsheet};
use crate::store::tabular::{SheetRef, TabularStore, cell, find_header_in};

use super::layout::{
    DATE, NO, ROLE, SERIAL_NO, TIMESHEET_CAPACITY, TIMESHEET_SHEET, TIMESHEET_TOTAL,
    TemplateKind, generate_template,
};
use super::{Callback, JobContext};

/// Blob holding the extracted events while the job is suspended.
pub const EVENTS_BLOB: &str = "events";
pub const TIMESHEET_FOLDER: &str = "Timesheet";

/// Write a timesheet for every event on the roster sheet.
///
/// The events are extracted once per run and cached, so a resumed run works
/// from the same list even if the roster changed in between.
pub fn generate_timesheet(ctx: &JobContext<'_>, roster: &SheetRef, resumed: bool) -> Result<RunOutcome> {
    let key = JobKey::new(&roster.spreadsheet_id, &roster.sheet);
    let mut job = ctx
        .runner
        .begin(&key, Callback::GenerateTimesheet.name(), resumed)?;
    let checkpoints = ctx.runner.checkpoints();

    let resume = job.resume_point::<String>()?;
    let cached = if resume.is_some() {
        checkpoints.load_blob::<Vec<Event>>(&key, EVENTS_BLOB)?
    } else {
        None
    };
    let (events, pending) = match (resume, cached) {
        (Some(checkpoint), Some(events)) => (events, checkpoint.remaining),
        _ => {
            let grid = ctx.tabular.read_grid(roster)?;
            let events = extract(&grid, DATE_AXIS_ROW)?;
            checkpoints.cache_blob(
                &key,
                EVENTS_BLOB,
                &events,
                ctx.runner.config().checkpoint_ttl(),
            )?;
            let ids = events.iter().map(|e| e.id.clone()).collect();
            (events, ids)
        }
    };
    debug!(events = events.len(), pending = pending.len(), "timesheet work list ready");

    let by_id: HashMap<&str, &Event> = events.iter().map(|e| (e.id.as_str(), e)).collect();
    let year = ctx.calendar.year();
    let events_folder = ctx.folder_in_year(year, &ctx.folders.events)?;

    let outcome = ctx.runner.run(&job, pending, |id: &String| {
        let event = by_id
            .get(id.as_str())
            .ok_or_else(|| Error::Other(format!("event {id} missing from cached events")))?;
        write_event_timesheet(ctx, &events_folder, event)
    })?;

    if !outcome.is_suspended() {
        checkpoints.drop_blob(&key, EVENTS_BLOB)?;
    }
    Ok(outcome)
}

fn write_event_timesheet(ctx: &JobContext<'_>, events_folder: &FolderRef, event: &Event) -> Result<()> {
    let event_folder = ensure_hierarchy(
        ctx.drive,
        &FolderPlan::new(&event.id, [TIMESHEET_FOLDER]),
        Some(events_folder),
    )?;
    let folder = find_or_create_folder(ctx.drive, TIMESHEET_FOLDER, Some(&event_folder))?;
    let (file, created) =
        find_or_create_spreadsheet(ctx.drive, &format!("{}_Timesheet", event.id), Some(&folder))?;
    let (sheet, _) = generate_template(
        ctx.tabular,
        &file.id,
        TIMESHEET_SHEET,
        TemplateKind::Timesheet,
        ctx.calendar.year(),
        ctx.calendar.month(),
    )?;
    let merged = merge_timesheet(ctx.tabular, &sheet, &event.crew_for_display())?;
    info!(
        event = %event.id,
        created,
        filled = merged.filled,
        appended = merged.appended,
        "timesheet updated"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Existing rows that had blank cells filled in.
    pub filled: usize,
    pub appended: usize,
}

/// Column positions on the timesheet subheader row.
struct Columns {
    no: usize,
    serial: usize,
    name: usize,
    role: usize,
    date: usize,
}

/// Merge crew rows into a timesheet.
///
/// Crew already listed by serial number get their blank name, role and date
/// cells filled; cells holding anything are left alone. Other crew are written
/// to the first rows without a number, numbered by their position.
pub fn merge_timesheet(
    tabular: &dyn TabularStore,
    sheet: &SheetRef,
    crew: &[CrewAssignment],
) -> Result<MergeSummary> {
    let grid = tabular.read_grid(sheet)?;
    let header_row = find_header_in(&grid, NO)
        .first()
        .map(|hit| hit.row)
        .ok_or_else(|| Error::MissingHeader(NO.to_string()))?;
    let subheader = &grid[header_row];
    let column = |label: &str| {
        subheader
            .iter()
            .position(|c| c.trim() == label)
            .ok_or_else(|| Error::MissingHeader(label.to_string()))
    };
    let cols = Columns {
        no: column(NO)?,
        serial: column(SERIAL_NO)?,
        name: column(NAME)?,
        role: column(ROLE)?,
        date: column(DATE)?,
    };

    let first = header_row + 1;
    let footer = (first..grid.len())
        .find(|&r| grid[r].iter().any(|c| c.trim() == TIMESHEET_TOTAL))
        .unwrap_or(grid.len());
    let end = footer.min(first + TIMESHEET_CAPACITY);
    let row_at = |r: usize| grid.get(r).map(Vec::as_slice).unwrap_or(&[]);

    let mut listed: HashMap<String, usize> = HashMap::new();
    for r in first..end {
        let serial = cell(row_at(r), cols.serial);
        if !serial.is_empty() {
            listed.entry(serial.to_string()).or_insert(r);
        }
    }
    let mut free = (first..end).filter(|&r| {
        cell(row_at(r), cols.no).is_empty() && cell(row_at(r), cols.serial).is_empty()
    });

    let mut summary = MergeSummary::default();
    for member in crew {
        let values = [
            (cols.name, member.name.clone()),
            (cols.role, member.roles_label()),
            (cols.date, member.dates_label()),
        ];
        match listed.get(&member.id) {
            Some(&r) => {
                let mut touched = false;
                for (col, value) in values {
                    if cell(row_at(r), col).is_empty() && !value.is_empty() {
                        tabular.write_range(sheet, r, col, &[vec![value]])?;
                        touched = true;
                    }
                }
                summary.filled += usize::from(touched);
            }
            None => {
                let r = free.next().ok_or_else(|| {
                    Error::Validation(format!("timesheet {sheet} has no free rows left"))
                })?;
                let number = (r - first + 1).to_string();
                tabular.write_range(sheet, r, cols.no, &[vec![number]])?;
                tabular.write_range(sheet, r, cols.serial, &[vec![member.id.clone()]])?;
                for (col, value) in values {
                    tabular.write_range(sheet, r, col, &[vec![value]])?;
                }
                summary.appended += 1;
            }
        }
    }
    Ok(summary)
}
