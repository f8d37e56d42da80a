//! Pull individual availability into the yearly availability sheet.

use tracing::{debug, info};

use crate::calendar::{days_in_month, month_index, month_sheet_name};
use crate::error::Result;
use crate::model::JobKey;
use crate::runner::RunOutcome;
use crate::store::drive::FileRef;
use crate::store::tabular::{SheetRef, TabularStore, cell, last_filled_row};

use super::layout::{AVAILABILITY_FIXED_COLS, FIRST_DATA_ROW};
use super::{Callback, JobContext};

/// Crew id and name encoded in an individual spreadsheet's `{id}_{name}`
/// file name.
pub fn parse_member_file(name: &str) -> Option<(&str, &str)> {
    let (id, member) = name.split_once('_')?;
    let (id, member) = (id.trim(), member.trim());
    (!id.is_empty() && !member.is_empty()).then_some((id, member))
}

/// Refresh the month sheet of the yearly availability spreadsheet from every
/// individual spreadsheet, one file per work item.
pub fn refresh_availability_data(
    ctx: &JobContext<'_>,
    target: &SheetRef,
    resumed: bool,
) -> Result<RunOutcome> {
    let key = JobKey::new(&target.spreadsheet_id, &target.sheet);
    let mut job = ctx
        .runner
        .begin(&key, Callback::RefreshAvailabilityData.name(), resumed)?;

    let month = month_index(&target.sheet)?;
    let year = ctx.calendar.year();
    let days = days_in_month(year, month)? as usize;
    let source_sheet = month_sheet_name(year, month);

    let files = match job.resume_point::<FileRef>()? {
        Some(checkpoint) => checkpoint.remaining,
        None => {
            let folder = ctx.folder_under_main(&ctx.folders.individuals)?;
            ctx.drive.list_spreadsheets(&folder)?
        }
    };
    debug!(files = files.len(), sheet = %source_sheet, "availability work list ready");

    ctx.runner.run(&job, files, |file: &FileRef| {
        let Some((id, name)) = parse_member_file(&file.name) else {
            debug!(file = %file.name, "skipping file without an id");
            return Ok(());
        };
        if !ctx.tabular.has_sheet(&file.id, &source_sheet)? {
            debug!(file = %file.name, sheet = %source_sheet, "no sheet for this month");
            return Ok(());
        }
        let individual = ctx.tabular.read_grid(&SheetRef::new(&file.id, &source_sheet))?;
        let mut values = vec![id.to_string(), name.to_string()];
        values.extend((1..=days).map(|day| {
            individual
                .get(day)
                .map(|r| cell(r, 1).to_string())
                .unwrap_or_default()
        }));
        let updated = upsert_row(ctx.tabular, target, values)?;
        info!(member = id, updated, "availability refreshed");
        Ok(())
    })
}

/// Replace the row whose id matches `values[0]`, or append a new one.
/// Returns whether an existing row was replaced.
pub fn upsert_row(tabular: &dyn TabularStore, sheet: &SheetRef, values: Vec<String>) -> Result<bool> {
    let grid = tabular.read_grid(sheet)?;
    let id = values.first().map(|v| v.trim()).unwrap_or_default();
    let existing = grid
        .iter()
        .enumerate()
        .skip(FIRST_DATA_ROW)
        .find(|(_, r)| cell(r, 0) == id)
        .map(|(i, _)| i);

    match existing {
        Some(r) => {
            let width = grid[r].len().max(values.len());
            let mut replacement = values;
            replacement.resize(width.max(AVAILABILITY_FIXED_COLS), String::new());
            tabular.write_range(sheet, r, 0, &[replacement])?;
            Ok(true)
        }
        None => {
            let at = last_filled_row(&grid)
                .map_or(FIRST_DATA_ROW, |last| (last + 1).max(FIRST_DATA_ROW));
            tabular.write_range(sheet, at, 0, &[values])?;
            Ok(false)
        }
    }
}
