//! Yearly and monthly housekeeping: folder trees and yearly spreadsheets.

use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

use crate::calendar::{short_month, year_end};
use crate::config::FolderNames;
use crate::error::{Error, Result};
use crate::store::drive::{
    FolderRef, FolderPlan, ensure_hierarchy, find_or_create_folder, find_or_create_spreadsheet,
};
use crate::store::tabular::SheetRef;

use super::JobContext;
use super::layout::{TemplateKind, generate_template};

/// Month sheets are only added to the yearly spreadsheets after this day.
pub const MONTHLY_AFTER_DAY: u32 = 10;

/// `ESS {year}` with its three working folders and the events archive.
pub fn year_hierarchy(folders: &FolderNames, year: i32) -> FolderPlan {
    let archive = FolderPlan::new(
        &folders.events,
        [
            format!("OTH #{year}-999 Completed Projects {year}"),
            format!("OTH #{year}-998 Cancelled Projects {year}"),
        ],
    );
    FolderPlan::new(
        folders.year_folder(year),
        [
            folders.events.clone(),
            folders.availability.clone(),
            folders.rostering.clone(),
        ],
    )
    .with_nested(archive)
}

/// Create whatever is missing of the year's folder tree.
pub fn create_yearly_hierarchy(ctx: &JobContext<'_>, year: i32) -> Result<FolderRef> {
    let main = find_or_create_folder(ctx.drive, &ctx.folders.main, None)?;
    let top = ensure_hierarchy(ctx.drive, &year_hierarchy(ctx.folders, year), Some(&main))?;
    info!(year, folder = %top.name, "yearly hierarchy ready");
    Ok(top)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearlySheets {
    pub availability: SheetRef,
    pub roster: SheetRef,
}

/// Create the yearly availability and roster spreadsheets with a first month
/// sheet: January for a future year, the current month otherwise.
pub fn create_yearly_spreadsheets(ctx: &JobContext<'_>, year: i32) -> Result<YearlySheets> {
    let top = create_yearly_hierarchy(ctx, year)?;
    let month = if year > ctx.calendar.year() {
        1
    } else {
        ctx.calendar.month()
    };

    let yearly = |folder: &str, file: &str, kind: TemplateKind| -> Result<SheetRef> {
        let folder = find_or_create_folder(ctx.drive, folder, Some(&top))?;
        let (file, created) = find_or_create_spreadsheet(ctx.drive, file, Some(&folder))?;
        let (sheet, written) =
            generate_template(ctx.tabular, &file.id, short_month(month), kind, year, month)?;
        info!(file = %file.name, created, written, sheet = %sheet.sheet, "yearly spreadsheet ready");
        Ok(sheet)
    };

    let folders = ctx.folders;
    Ok(YearlySheets {
        availability: yearly(
            &folders.availability,
            &folders.yearly_availability,
            TemplateKind::Availability,
        )?,
        roster: yearly(&folders.rostering, &folders.yearly_roster, TemplateKind::Roster)?,
    })
}

/// Add next month's sheet to a yearly spreadsheet once the day of month
/// passes [`MONTHLY_AFTER_DAY`]. Nothing happens in December; the next year
/// gets its own spreadsheets.
pub fn create_monthly_sheet(
    ctx: &JobContext<'_>,
    spreadsheet_id: &str,
    kind: TemplateKind,
) -> Result<Option<SheetRef>> {
    if !matches!(kind, TemplateKind::Availability | TemplateKind::Roster) {
        return Err(Error::Validation(format!("no monthly sheet for {kind:?}")));
    }
    let cal = &ctx.calendar;
    if cal.month() == 12 || cal.day() <= MONTHLY_AFTER_DAY {
        return Ok(None);
    }
    let (year, month) = cal.next_month();
    let name = short_month(month);
    if ctx.tabular.has_sheet(spreadsheet_id, name)? {
        return Ok(None);
    }
    let (sheet, _) = generate_template(ctx.tabular, spreadsheet_id, name, kind, year, month)?;
    info!(sheet = %sheet, ?kind, "monthly sheet added");
    Ok(Some(sheet))
}

/// When the yearly housekeeping for `year` should run: midnight local time
/// on the year-end trigger day.
pub fn yearly_fire_at(year: i32, offset: chrono::FixedOffset) -> Result<DateTime<Utc>> {
    year_end(year)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|t| offset.from_local_datetime(&t).single())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| Error::Validation(format!("no year-end date for {year}")))
}
