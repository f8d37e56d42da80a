//! In-process workspace implementing both [`TabularStore`] and [`DriveStore`].
//!
//! Used by the tests and by the CLI, which persists it to a JSON file between
//! invocations. Interior mutability keeps the accessor traits `&self`; a
//! workspace is owned by one invocation at a time.

use std::cell::RefCell;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::drive::{DriveStore, FileRef, FolderRef};
use super::tabular::{Grid, SheetRef, TabularStore, last_filled_row};
use crate::error::{Error, Result};

const DEFAULT_SHEET: &str = "Sheet1";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct State {
    next_id: u64,
    folders: Vec<FolderEntry>,
    files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FolderEntry {
    id: String,
    name: String,
    parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    id: String,
    name: String,
    parent: Option<String>,
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SheetEntry {
    name: String,
    rows: Grid,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:06}", self.next_id)
    }

    fn file(&self, id: &str) -> Result<&FileEntry> {
        self.files
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::FileNotFound(id.to_string()))
    }

    fn file_mut(&mut self, id: &str) -> Result<&mut FileEntry> {
        self.files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::FileNotFound(id.to_string()))
    }

    fn sheet(&self, sheet: &SheetRef) -> Result<&SheetEntry> {
        self.file(&sheet.spreadsheet_id)?
            .sheets
            .iter()
            .find(|s| s.name == sheet.sheet)
            .ok_or_else(|| Error::SheetNotFound(sheet.to_string()))
    }

    fn sheet_mut(&mut self, sheet: &SheetRef) -> Result<&mut SheetEntry> {
        self.file_mut(&sheet.spreadsheet_id)?
            .sheets
            .iter_mut()
            .find(|s| s.name == sheet.sheet)
            .ok_or_else(|| Error::SheetNotFound(sheet.to_string()))
    }

    fn folder_exists(&self, id: &str) -> bool {
        self.folders.iter().any(|f| f.id == id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    state: RefCell<State>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a workspace file, or start empty if it does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let state: State = serde_json::from_str(&content)?;
        Ok(Self {
            state: RefCell::new(state),
        })
    }

    /// Write the workspace to `path` via a sibling temp file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&*self.state.borrow())?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Replace a sheet's contents wholesale, creating the sheet if needed.
    pub fn put_grid(&self, sheet: &SheetRef, grid: Grid) -> Result<()> {
        self.insert_sheet(&sheet.spreadsheet_id, &sheet.sheet)?;
        self.state.borrow_mut().sheet_mut(sheet)?.rows = grid;
        Ok(())
    }
}

fn check_parent(state: &State, parent: Option<&FolderRef>) -> Result<Option<String>> {
    match parent {
        Some(p) if !state.folder_exists(&p.id) => Err(Error::FolderNotFound(p.name.clone())),
        Some(p) => Ok(Some(p.id.clone())),
        None => Ok(None),
    }
}

impl DriveStore for MemoryWorkspace {
    fn folders_named(&self, name: &str) -> Result<Vec<FolderRef>> {
        Ok(self
            .state
            .borrow()
            .folders
            .iter()
            .filter(|f| f.name == name)
            .map(|f| FolderRef {
                id: f.id.clone(),
                name: f.name.clone(),
            })
            .collect())
    }

    fn files_named(&self, name: &str) -> Result<Vec<FileRef>> {
        Ok(self
            .state
            .borrow()
            .files
            .iter()
            .filter(|f| f.name == name)
            .map(|f| FileRef {
                id: f.id.clone(),
                name: f.name.clone(),
            })
            .collect())
    }

    fn subfolders(&self, folder: &FolderRef) -> Result<Vec<FolderRef>> {
        Ok(self
            .state
            .borrow()
            .folders
            .iter()
            .filter(|f| f.parent.as_deref() == Some(folder.id.as_str()))
            .map(|f| FolderRef {
                id: f.id.clone(),
                name: f.name.clone(),
            })
            .collect())
    }

    fn list_spreadsheets(&self, folder: &FolderRef) -> Result<Vec<FileRef>> {
        Ok(self
            .state
            .borrow()
            .files
            .iter()
            .filter(|f| f.parent.as_deref() == Some(folder.id.as_str()))
            .map(|f| FileRef {
                id: f.id.clone(),
                name: f.name.clone(),
            })
            .collect())
    }

    fn create_folder(&self, name: &str, parent: Option<&FolderRef>) -> Result<FolderRef> {
        let mut state = self.state.borrow_mut();
        let parent = check_parent(&state, parent)?;
        let id = state.next_id("fld");
        state.folders.push(FolderEntry {
            id: id.clone(),
            name: name.to_string(),
            parent,
        });
        Ok(FolderRef {
            id,
            name: name.to_string(),
        })
    }

    fn create_spreadsheet(&self, name: &str, parent: Option<&FolderRef>) -> Result<FileRef> {
        let mut state = self.state.borrow_mut();
        let parent = check_parent(&state, parent)?;
        let id = state.next_id("ss");
        state.files.push(FileEntry {
            id: id.clone(),
            name: name.to_string(),
            parent,
            sheets: vec![SheetEntry {
                name: DEFAULT_SHEET.to_string(),
                rows: Vec::new(),
            }],
        });
        Ok(FileRef {
            id,
            name: name.to_string(),
        })
    }
}

impl TabularStore for MemoryWorkspace {
    fn read_grid(&self, sheet: &SheetRef) -> Result<Grid> {
        Ok(self.state.borrow().sheet(sheet)?.rows.clone())
    }

    fn write_range(
        &self,
        sheet: &SheetRef,
        row: usize,
        col: usize,
        values: &[Vec<String>],
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let rows = &mut state.sheet_mut(sheet)?.rows;
        if rows.len() < row + values.len() {
            rows.resize(row + values.len(), Vec::new());
        }
        for (offset, value_row) in values.iter().enumerate() {
            let target = &mut rows[row + offset];
            if target.len() < col + value_row.len() {
                target.resize(col + value_row.len(), String::new());
            }
            for (c, value) in value_row.iter().enumerate() {
                target[col + c] = value.clone();
            }
        }
        Ok(())
    }

    fn append_rows(&self, sheet: &SheetRef, rows: &[Vec<String>]) -> Result<()> {
        let start = {
            let state = self.state.borrow();
            last_filled_row(&state.sheet(sheet)?.rows).map_or(0, |r| r + 1)
        };
        self.write_range(sheet, start, 0, rows)
    }

    fn sheet_names(&self, spreadsheet_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .borrow()
            .file(spreadsheet_id)?
            .sheets
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }

    fn insert_sheet(&self, spreadsheet_id: &str, name: &str) -> Result<SheetRef> {
        let mut state = self.state.borrow_mut();
        let file = state.file_mut(spreadsheet_id)?;
        let exists = file.sheets.iter().any(|s| s.name == name);
        if !exists {
            let untouched_default = file.sheets.len() == 1
                && file.sheets[0].name == DEFAULT_SHEET
                && file.sheets[0].rows.is_empty();
            if untouched_default {
                file.sheets[0].name = name.to_string();
            } else {
                file.sheets.push(SheetEntry {
                    name: name.to_string(),
                    rows: Vec::new(),
                });
            }
        }
        Ok(SheetRef::new(spreadsheet_id, name))
    }
}
