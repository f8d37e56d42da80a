//! Tabular store accessor.
//!
//! Sheets are addressed by plain [`SheetRef`] values; all I/O goes through a
//! [`TabularStore`]. Row and column indexes are 0-based.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A full sheet of cell values. Rows may be ragged.
pub type Grid = Vec<Vec<String>>;

/// Identity of one sheet inside one spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetRef {
    pub spreadsheet_id: String,
    pub sheet: String,
}

impl SheetRef {
    pub fn new(spreadsheet_id: impl Into<String>, sheet: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet: sheet.into(),
        }
    }
}

impl std::fmt::Display for SheetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.spreadsheet_id, self.sheet)
    }
}

/// Every column of one row holding a header label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderHit {
    pub row: usize,
    pub cols: Vec<usize>,
}

pub trait TabularStore {
    fn read_grid(&self, sheet: &SheetRef) -> Result<Grid>;

    /// Overwrite a rectangle starting at (row, col), growing the sheet as
    /// needed.
    fn write_range(&self, sheet: &SheetRef, row: usize, col: usize, values: &[Vec<String>])
    -> Result<()>;

    /// Append rows after the last non-empty row.
    fn append_rows(&self, sheet: &SheetRef, rows: &[Vec<String>]) -> Result<()>;

    fn sheet_names(&self, spreadsheet_id: &str) -> Result<Vec<String>>;

    /// Return the named sheet, creating it if needed. A spreadsheet whose only
    /// sheet is the untouched default "Sheet1" gets that sheet renamed instead.
    fn insert_sheet(&self, spreadsheet_id: &str, name: &str) -> Result<SheetRef>;

    fn has_sheet(&self, spreadsheet_id: &str, name: &str) -> Result<bool> {
        Ok(self
            .sheet_names(spreadsheet_id)?
            .iter()
            .any(|s| s == name))
    }

    fn find_header(&self, sheet: &SheetRef, label: &str) -> Result<Vec<HeaderHit>> {
        Ok(find_header_in(&self.read_grid(sheet)?, label))
    }
}

/// Locate every cell equal to `label`, grouped by row, top to bottom.
pub fn find_header_in(grid: &[Vec<String>], label: &str) -> Vec<HeaderHit> {
    grid.iter()
        .enumerate()
        .filter_map(|(row, cells)| {
            let cols: Vec<usize> = cells
                .iter()
                .enumerate()
                .filter(|(_, v)| v.trim() == label)
                .map(|(c, _)| c)
                .collect();
            (!cols.is_empty()).then_some(HeaderHit { row, cols })
        })
        .collect()
}

/// Trimmed cell value, or "" past the end of a ragged row.
pub fn cell(row: &[String], col: usize) -> &str {
    row.get(col).map(|v| v.trim()).unwrap_or("")
}

/// Index of the last row holding any non-empty cell.
pub fn last_filled_row(grid: &[Vec<String>]) -> Option<usize> {
    grid.iter()
        .rposition(|row| row.iter().any(|v| !v.trim().is_empty()))
}

/// Build a row of owned cells from string slices.
pub fn row<S: AsRef<str>>(cells: &[S]) -> Vec<String> {
    cells.iter().map(|c| c.as_ref().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_header_returns_all_columns_per_row() {
        let grid = vec![
            row(&["", "1 June", "", "2 June", ""]),
            row(&["ESS ID", "Event ID", "Availability", "Event ID", "Availability"]),
            row(&["1", "OTH#1", "Available", "", ""]),
        ];
        let hits = find_header_in(&grid, "Event ID");
        assert_eq!(hits, vec![HeaderHit { row: 1, cols: vec![1, 3] }]);
        assert!(find_header_in(&grid, "Rostered Role").is_empty());
    }

    #[test]
    fn cell_tolerates_ragged_rows() {
        let r = row(&["a", " b "]);
        assert_eq!(cell(&r, 1), "b");
        assert_eq!(cell(&r, 5), "");
    }

    #[test]
    fn last_filled_row_skips_trailing_blanks() {
        let grid = vec![row(&["x"]), row(&["", "y"]), row(&["", ""])];
        assert_eq!(last_filled_row(&grid), Some(1));
        assert_eq!(last_filled_row(&[]), None);
    }
}
