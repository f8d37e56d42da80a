//! Value layout of the generated sheets.
//!
//! Only cell values are produced here. The labels are load-bearing: the
//! extractor and the merge jobs find their columns by these strings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::{date_label, days_in_month, short_month};
use crate::error::{Error, Result};
use crate::extract::{AVAILABILITY, ESS_ID, EVENT_ID, NAME, ROSTERED_ROLE};
use crate::store::tabular::{Grid, SheetRef, TabularStore, row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Availability,
    Roster,
    Timesheet,
    Individual,
}

pub const ROSTER_TITLE: &str = "ESS Roster Sheet";
pub const PARTIALLY_AVAILABLE: &str = "Partially Available (e.g. Free Till 3pm OR Free AFTER 3pm.)";
pub const ROSTERED_FOR: &str = "Rostered For (Event Name)";
pub const MOBILE: &str = "Mobile";
pub const AREA: &str =
    "Indicate the area that you are living in. (e.g. Jurong, Sengkang, Woodlands, Tampines, etc)";

/// Columns before the first date block on the roster sheet.
pub const ROSTER_FIXED_COLS: usize = 4;
/// Subcolumns per date on the roster sheet.
pub const ROSTER_BLOCK: [&str; 5] = [
    AVAILABILITY,
    PARTIALLY_AVAILABLE,
    ROSTERED_ROLE,
    ROSTERED_FOR,
    EVENT_ID,
];

/// Columns before the first date on the availability sheet.
pub const AVAILABILITY_FIXED_COLS: usize = 2;
/// First data row on both the roster and the availability sheet.
pub const FIRST_DATA_ROW: usize = 2;

pub const TIMESHEET_SHEET: &str = "Sheet1";
pub const NO: &str = "No.";
pub const SERIAL_NO: &str = "ESS Serial No.";
pub const ROLE: &str = "Role";
pub const DATE: &str = "Date";
/// Crew rows available between the subheader and the totals footer.
pub const TIMESHEET_CAPACITY: usize = 100;
pub const TIMESHEET_TOTAL: &str = "Total";

const TIMESHEET_SUBHEADER: [&str; 16] = [
    "",
    NO,
    SERIAL_NO,
    NAME,
    ROLE,
    DATE,
    "Start Time",
    "End Time",
    "Duration",
    "Rate",
    "Amount",
    "Transport Claims",
    "Meals Claims",
    "ART Claims",
    "Amount",
    "Remarks",
];

pub const INDIVIDUAL_AVAILABILITY: &str = "Availability";

/// Partial-day values an individual may enter.
pub const PARTIAL_VALUES: [&str; 2] = ["till 3pm", "after 3pm"];
/// Roster availability value standing in for a partial day.
pub const OTHERS: &str = "Others";

/// Build the value grid for a template. `year`/`month` pick the dates;
/// the timesheet ignores them.
pub fn template(kind: TemplateKind, year: i32, month: u32) -> Result<Grid> {
    match kind {
        TemplateKind::Availability => {
            let dates = month_dates(year, month)?;
            let mut title = vec![String::new(); AVAILABILITY_FIXED_COLS];
            title.push("Date".to_string());
            let mut header = row(&[ESS_ID, NAME]);
            header.extend(dates.iter().map(|d| date_label(*d)));
            Ok(vec![title, header])
        }
        TemplateKind::Roster => {
            let dates = month_dates(year, month)?;
            let mut title = row(&[ROSTER_TITLE, "", "", ""]);
            let mut header = row(&[ESS_ID, NAME, MOBILE, AREA]);
            for d in &dates {
                title.push(date_label(*d));
                title.extend(std::iter::repeat_n(String::new(), ROSTER_BLOCK.len() - 1));
                header.extend(ROSTER_BLOCK.iter().map(|s| s.to_string()));
            }
            Ok(vec![title, header])
        }
        TemplateKind::Timesheet => {
            let mut grid = vec![
                row(&["Input Event Code (Refer to Master Account Sheet)"]),
                row(&["Valuation Data (Refer to Bank Statement)"]),
                row(&["Done By (Input your Name)", "", "", "", "", "(Input your Name)"]),
                row(&TIMESHEET_SUBHEADER),
                row(&["Enter Event Title (Refer to Master Account Sheet)"]),
            ];
            grid.resize(4 + TIMESHEET_CAPACITY, Vec::new());
            let mut footer = vec![String::new(); 14];
            footer[9] = TIMESHEET_TOTAL.to_string();
            footer[13] = "Total Claims".to_string();
            grid.push(Vec::new());
            grid.push(footer);
            Ok(grid)
        }
        TemplateKind::Individual => {
            let dates = month_dates(year, month)?;
            let mut grid = vec![row(&[DATE, INDIVIDUAL_AVAILABILITY])];
            grid.extend(
                dates
                    .iter()
                    .map(|d| vec![individual_date_label(*d), String::new()]),
            );
            Ok(grid)
        }
    }
}

/// "1 Jun 26" style label used in individual spreadsheets.
pub fn individual_date_label(date: NaiveDate) -> String {
    use chrono::Datelike;
    format!(
        "{} {} {:02}",
        date.day(),
        short_month(date.month()),
        date.year().rem_euclid(100)
    )
}

fn month_dates(year: i32, month: u32) -> Result<Vec<NaiveDate>> {
    let days = days_in_month(year, month)?;
    (1..=days)
        .map(|day| {
            NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| Error::Validation(format!("no such date {year}-{month}-{day}")))
        })
        .collect()
}

/// Make sure `sheet_name` exists in the spreadsheet and carries the
/// template. A sheet that already holds data is left alone. Returns the
/// sheet and whether the template was written.
pub fn generate_template(
    tabular: &dyn TabularStore,
    spreadsheet_id: &str,
    sheet_name: &str,
    kind: TemplateKind,
    year: i32,
    month: u32,
) -> Result<(SheetRef, bool)> {
    if tabular.has_sheet(spreadsheet_id, sheet_name)? {
        let sheet = SheetRef::new(spreadsheet_id, sheet_name);
        let populated = tabular
            .read_grid(&sheet)?
            .iter()
            .any(|r| r.iter().any(|v| !v.trim().is_empty()));
        if populated {
            return Ok((sheet, false));
        }
    }
    let sheet = tabular.insert_sheet(spreadsheet_id, sheet_name)?;
    let grid = template(kind, year, month)?;
    tabular.write_range(&sheet, 0, 0, &grid)?;
    debug!(sheet = %sheet, ?kind, "template written");
    Ok((sheet, true))
}
