//! Per-member availability spreadsheets in the Individuals folder.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calendar::month_sheet_name;
use crate::error::Result;
use crate::model::JobKey;
use crate::runner::RunOutcome;
use crate::store::drive::{FileRef, FolderRef, find_or_create_spreadsheet};
use crate::store::tabular::{SheetRef, cell};

use super::layout::{TemplateKind, generate_template};
use super::{Callback, JobContext};

/// The next month's sheet appears once the day of month passes this.
pub const NEXT_MONTH_AFTER_DAY: u32 = 10;

/// A row of the personnel master sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
}

impl Member {
    /// `{id}_{name}`, the individual spreadsheet's file name.
    pub fn file_name(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }
}

/// Make sure every individual spreadsheet has this month's sheet, and next
/// month's once it is late enough in the month.
///
/// Walks the Individuals folder listing with a cursor, so a resumed run
/// picks up at the same position in the same listing.
pub fn create_new_individual_template(ctx: &JobContext<'_>, resumed: bool) -> Result<RunOutcome> {
    let folder = ctx.folder_under_main(&ctx.folders.individuals)?;
    let key = JobKey::new(&folder.id, Callback::CreateNewIndividualTemplate.name());
    let mut job = ctx
        .runner
        .begin(&key, Callback::CreateNewIndividualTemplate.name(), resumed)?;

    let from = job
        .resume_point::<serde_json::Value>()?
        .and_then(|c| c.cursor)
        .unwrap_or(0);
    let files = ctx.drive.list_spreadsheets(&folder)?;
    debug!(files = files.len(), from, "individual template work list ready");

    ctx.runner.run_cursor(&job, &files, from, |_, file: &FileRef| {
        let created = ensure_month_sheets(ctx, &file.id)?;
        if created > 0 {
            info!(file = %file.name, created, "month sheets added");
        }
        Ok(())
    })
}

/// Create an individual spreadsheet for every member on the master sheet
/// that lacks one, and top up month sheets in the ones that exist.
pub fn generate_individual_spreadsheet(
    ctx: &JobContext<'_>,
    master: Option<&SheetRef>,
    resumed: bool,
) -> Result<RunOutcome> {
    let master = match master {
        Some(sheet) => sheet.clone(),
        None => ctx.master_sheet()?,
    };
    let key = JobKey::new(&master.spreadsheet_id, &master.sheet);
    let mut job = ctx
        .runner
        .begin(&key, Callback::GenerateIndividualSpreadsheet.name(), resumed)?;

    let members = match job.resume_point::<Member>()? {
        Some(checkpoint) => checkpoint.remaining,
        None => read_members(ctx, &master)?,
    };
    let folder = ctx.folder_under_main(&ctx.folders.individuals)?;
    debug!(members = members.len(), "member work list ready");

    ctx.runner.run(&job, members, |member: &Member| {
        ensure_member_file(ctx, &folder, member)
    })
}

fn read_members(ctx: &JobContext<'_>, master: &SheetRef) -> Result<Vec<Member>> {
    let grid = ctx.tabular.read_grid(master)?;
    Ok(grid
        .iter()
        .skip(1)
        .filter(|r| !cell(r, 0).is_empty() && !cell(r, 1).is_empty())
        .map(|r| Member {
            id: cell(r, 0).to_string(),
            name: cell(r, 1).to_string(),
        })
        .collect())
}

fn ensure_member_file(ctx: &JobContext<'_>, folder: &FolderRef, member: &Member) -> Result<()> {
    let (file, created) = find_or_create_spreadsheet(ctx.drive, &member.file_name(), Some(folder))?;
    let sheets = ensure_month_sheets(ctx, &file.id)?;
    info!(member = %member.id, created, sheets, "individual spreadsheet ready");
    Ok(())
}

/// Returns how many sheets were written.
pub fn ensure_month_sheets(ctx: &JobContext<'_>, spreadsheet_id: &str) -> Result<usize> {
    let cal = &ctx.calendar;
    let mut months = vec![(cal.year(), cal.month())];
    if cal.day() > NEXT_MONTH_AFTER_DAY {
        months.push(cal.next_month());
    }

    let mut written = 0;
    for (year, month) in months {
        let (_, fresh) = generate_template(
            ctx.tabular,
            spreadsheet_id,
            &month_sheet_name(year, month),
            TemplateKind::Individual,
            year,
            month,
        )?;
        written += usize::from(fresh);
    }
    Ok(written)
}
