//! Roster grid → event/crew model.
//!
//! The roster sheet repeats a block of subheaders once per calendar date.
//! Extraction walks the date blocks left to right and, inside each block,
//! the data rows top to bottom, grouping occurrences by event id and then by
//! crew id. Output keeps first-seen order at both levels.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Event;
use crate::store::tabular::{HeaderHit, cell, find_header_in};

pub const EVENT_ID: &str = "Event ID";
pub const ROSTERED_ROLE: &str = "Rostered Role";
pub const AVAILABILITY: &str = "Availability";
pub const ESS_ID: &str = "ESS ID";
pub const NAME: &str = "Name";

pub const NOT_AVAILABLE: &str = "Not Available";

/// Row holding the sheet title followed by the date labels.
pub const DATE_AXIS_ROW: usize = 0;

/// Fold a roster grid into events.
///
/// `date_axis_row` holds the title cell followed by one label per date block.
/// The subheader row is the first row containing "Event ID"; everything below
/// it is data.
pub fn extract(grid: &[Vec<String>], date_axis_row: usize) -> Result<Vec<Event>> {
    let axis = grid
        .get(date_axis_row)
        .ok_or_else(|| Error::EmptySheet(format!("no date axis at row {date_axis_row}")))?;
    let dates: Vec<&str> = axis
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .skip(1)
        .collect();

    let event_ids = header(grid, EVENT_ID, dates.len())?;
    let roles = header(grid, ROSTERED_ROLE, dates.len())?;
    let availability = header(grid, AVAILABILITY, dates.len())?;
    let crew_col = header(grid, ESS_ID, 1)?.cols[0];
    let name_col = header(grid, NAME, 1)?.cols[0];

    let rows = grid.get(event_ids.row + 1..).unwrap_or_default();

    let mut events: Vec<Event> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (block, date) in dates.iter().enumerate() {
        for row in rows {
            let avail = cell(row, availability.cols[block]);
            if avail.is_empty() || avail == NOT_AVAILABLE {
                continue;
            }
            let event_id = cell(row, event_ids.cols[block]);
            if event_id.is_empty() {
                continue;
            }

            let slot = *index.entry(event_id.to_string()).or_insert_with(|| {
                events.push(Event::new(event_id));
                events.len() - 1
            });
            events[slot].record(
                cell(row, crew_col),
                cell(row, name_col),
                cell(row, roles.cols[block]),
                date,
            );
        }
    }

    debug!(
        dates = dates.len(),
        rows = rows.len(),
        events = events.len(),
        "extracted events"
    );
    Ok(events)
}

/// First row holding `label`, which must span at least `min_cols` columns.
fn header(grid: &[Vec<String>], label: &str, min_cols: usize) -> Result<HeaderHit> {
    let hit = find_header_in(grid, label)
        .into_iter()
        .next()
        .ok_or_else(|| Error::MissingHeader(label.to_string()))?;
    if hit.cols.len() < min_cols.max(1) {
        return Err(Error::MissingHeader(format!(
            "{label} (found {} columns, need {min_cols})",
            hit.cols.len()
        )));
    }
    Ok(hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::tabular::row;

    /// Two date blocks, each with Availability / Rostered Role / Event ID.
    fn roster(data: &[&[&str]]) -> Vec<Vec<String>> {
        let mut grid = vec![
            row(&["ESS Roster Sheet", "", "1 June", "", "", "2 June", "", ""]),
            row(&[
                ESS_ID,
                NAME,
                AVAILABILITY,
                ROSTERED_ROLE,
                EVENT_ID,
                AVAILABILITY,
                ROSTERED_ROLE,
                EVENT_ID,
            ]),
        ];
        grid.extend(data.iter().map(|r| row(*r)));
        grid
    }

    #[test]
    fn merges_one_crew_member_across_dates() {
        let grid = roster(&[&["1", "David", "Available", "IC", "OTH#1", "Available", "Usher", "OTH#1"]]);
        let events = extract(&grid, DATE_AXIS_ROW).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "OTH#1");
        let crew = events[0].crew();
        assert_eq!(crew.len(), 1);
        assert_eq!(crew[0].id, "1");
        assert_eq!(crew[0].name, "David");
        assert_eq!(crew[0].roles(), ["IC", "Usher"]);
        assert_eq!(crew[0].dates(), ["1 June", "2 June"]);
    }

    #[test]
    fn skips_unavailable_and_blank_cells() {
        let grid = roster(&[
            &["1", "David", "Not Available", "IC", "OTH#1", "", "IC", "OTH#1"],
            &["2", "Yi Xin", "Available", "IC", "", "till 3pm", "Usher", "OTH#2"],
        ]);
        let events = extract(&grid, DATE_AXIS_ROW).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "OTH#2");
        let crew = &events[0].crew()[0];
        assert_eq!(crew.id, "2");
        assert_eq!(crew.dates(), ["2 June"]);
    }

    #[test]
    fn preserves_first_seen_order() {
        let grid = roster(&[
            &["3", "Aaron", "Available", "IC", "OTH#9", "Available", "IC", "OTH#1"],
            &["1", "David", "Available", "Usher", "OTH#1", "", "", ""],
        ]);
        let events = extract(&grid, DATE_AXIS_ROW).unwrap();

        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["OTH#9", "OTH#1"]);
        let crew: Vec<_> = events[1].crew().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(crew, ["1", "3"]);
    }

    #[test]
    fn repeated_extraction_is_identical() {
        let grid = roster(&[
            &["1", "David", "Available", "IC", "OTH#1", "Available", "Usher", "OTH#1"],
            &["3", "Aaron", "Available", "IC", "OTH#1", "Not Available", "", ""],
        ]);
        let first = extract(&grid, DATE_AXIS_ROW).unwrap();
        let second = extract(&grid, DATE_AXIS_ROW).unwrap();
        assert_eq!(first, second);
        for event in &first {
            for crew in event.crew() {
                assert_eq!(crew.roles().len(), crew.dates().len());
            }
        }
    }

    #[test]
    fn missing_header_is_structural() {
        let mut grid = roster(&[]);
        grid[1][3] = "Role".to_string();
        let err = extract(&grid, DATE_AXIS_ROW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert!(err.to_string().contains(ROSTERED_ROLE));
    }

    #[test]
    fn too_few_subheaders_for_dates_is_structural() {
        let mut grid = roster(&[]);
        grid[0].push("3 June".to_string());
        let err = extract(&grid, DATE_AXIS_ROW).unwrap_err();
        assert!(matches!(err, Error::MissingHeader(_)));
    }

    #[test]
    fn header_only_grid_yields_nothing() {
        assert!(extract(&roster(&[]), DATE_AXIS_ROW).unwrap().is_empty());
        assert!(matches!(
            extract(&[], DATE_AXIS_ROW).unwrap_err(),
            Error::EmptySheet(_)
        ));
    }
}
