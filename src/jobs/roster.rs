//! Roster sheet refresh from yearly availability and the personnel master.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::calendar::month_index;
use crate::error::{Error, Result};
use crate::model::{JobKey, display_order};
use crate::runner::RunOutcome;
use crate::store::tabular::{Grid, SheetRef, TabularStore, cell, last_filled_row};

use super::layout::{
    AVAILABILITY_FIXED_COLS, FIRST_DATA_ROW, OTHERS, PARTIAL_VALUES, ROSTER_BLOCK,
    ROSTER_FIXED_COLS, TemplateKind,
};
use super::{Callback, JobContext};

/// Contact details from the personnel master, keyed by crew id.
pub type Contacts = HashMap<String, (String, String)>;

/// Bring the roster month sheet up to date. Runs in a single pass.
pub fn update_roster_spreadsheet(ctx: &JobContext<'_>, roster: &SheetRef) -> Result<RunOutcome> {
    let key = JobKey::new(&roster.spreadsheet_id, &roster.sheet);
    let job = ctx
        .runner
        .begin(&key, Callback::UpdateRosterSpreadsheet.name(), false)?;

    let month = month_index(&roster.sheet)?;
    let year = ctx.calendar.year();
    let availability = SheetRef::new(
        ctx.yearly_spreadsheet(year, TemplateKind::Availability)?,
        &roster.sheet,
    );
    if !ctx.tabular.has_sheet(&availability.spreadsheet_id, &availability.sheet)? {
        return Err(Error::SheetNotFound(availability.to_string()));
    }
    let avail_grid = ctx.tabular.read_grid(&availability)?;
    if avail_grid.is_empty() {
        return Err(Error::EmptySheet(availability.to_string()));
    }

    let contacts = read_contacts(ctx.tabular, &ctx.master_sheet()?)?;
    let current = ctx.tabular.read_grid(roster)?;
    let days = date_count(&current);
    debug!(month, days, members = contacts.len(), "roster sources loaded");

    let rows = roster_rows(&avail_grid, &contacts, days);
    let merged = merge_roster(ctx.tabular, roster, &current, rows)?;
    info!(
        sheet = %roster,
        updated = merged.updated,
        appended = merged.appended,
        "roster refreshed"
    );
    ctx.runner.finish(&job, merged.updated + merged.appended)
}

fn read_contacts(tabular: &dyn TabularStore, master: &SheetRef) -> Result<Contacts> {
    let grid = tabular.read_grid(master)?;
    Ok(grid
        .iter()
        .skip(1)
        .filter(|r| !cell(r, 0).is_empty())
        .map(|r| {
            (
                cell(r, 0).to_string(),
                (cell(r, 2).to_string(), cell(r, 3).to_string()),
            )
        })
        .collect())
}

/// Dates on the roster's title row.
fn date_count(roster: &Grid) -> usize {
    roster
        .first()
        .map(|title| {
            title
                .iter()
                .skip(ROSTER_FIXED_COLS)
                .filter(|c| !c.trim().is_empty())
                .count()
        })
        .unwrap_or(0)
}

/// One roster row per availability row. Each day becomes a five column
/// block; partial availability is recorded as `Others` plus the partial
/// value.
pub fn roster_rows(availability: &Grid, contacts: &Contacts, days: usize) -> Vec<Vec<String>> {
    availability
        .iter()
        .skip(FIRST_DATA_ROW)
        .filter(|r| !cell(r, 0).is_empty())
        .map(|r| {
            let id = cell(r, 0);
            let (mobile, area) = contacts.get(id).cloned().unwrap_or_default();
            let mut out = vec![id.to_string(), cell(r, 1).to_string(), mobile, area];
            for day in 0..days {
                let mut block = vec![String::new(); ROSTER_BLOCK.len()];
                let avail = cell(r, AVAILABILITY_FIXED_COLS + day);
                if PARTIAL_VALUES.contains(&avail) {
                    block[0] = OTHERS.to_string();
                    block[1] = avail.to_string();
                } else {
                    block[0] = avail.to_string();
                }
                out.extend(block);
            }
            out
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterMerge {
    pub updated: usize,
    pub appended: usize,
}

/// Merge rows into the roster by crew id. Cells already holding a value are
/// never overwritten. Unknown crew are appended in display order.
pub fn merge_roster(
    tabular: &dyn TabularStore,
    roster: &SheetRef,
    current: &Grid,
    rows: Vec<Vec<String>>,
) -> Result<RosterMerge> {
    let listed: HashMap<&str, usize> = current
        .iter()
        .enumerate()
        .skip(FIRST_DATA_ROW)
        .filter(|(_, r)| !cell(r, 0).is_empty())
        .map(|(i, r)| (cell(r, 0), i))
        .collect();

    let mut summary = RosterMerge::default();
    let mut fresh = Vec::new();
    for new_row in rows {
        let Some(&r) = listed.get(new_row[0].as_str()) else {
            fresh.push(new_row);
            continue;
        };
        let existing = &current[r];
        let width = existing.len().max(new_row.len());
        let merged: Vec<String> = (0..width)
            .map(|c| {
                let old = existing.get(c).map(String::as_str).unwrap_or("");
                if old.trim().is_empty() {
                    new_row.get(c).cloned().unwrap_or_default()
                } else {
                    old.to_string()
                }
            })
            .collect();
        if merged.as_slice() != existing.as_slice() {
            tabular.write_range(roster, r, 0, &[merged])?;
            summary.updated += 1;
        }
    }

    if !fresh.is_empty() {
        fresh.sort_by(|a, b| display_order(&a[0], &b[0]));
        summary.appended = fresh.len();
        let at = last_filled_row(current)
            .map_or(FIRST_DATA_ROW, |last| (last + 1).max(FIRST_DATA_ROW));
        tabular.write_range(roster, at, 0, &fresh)?;
    }
    Ok(summary)
}
