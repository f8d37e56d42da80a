//! Folder / file store accessor.
//!
//! [`DriveStore`] exposes only single-level operations. Searches over the
//! folder tree are implemented here with an explicit stack: depth-first,
//! children in store order, first match wins.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: String,
    pub name: String,
}

/// A spreadsheet file. Its id doubles as the spreadsheet id for
/// [`crate::store::TabularStore`] calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
}

pub trait DriveStore {
    /// Folders with this name anywhere in the drive, oldest first.
    fn folders_named(&self, name: &str) -> Result<Vec<FolderRef>>;

    /// Spreadsheets with this name anywhere in the drive, oldest first.
    fn files_named(&self, name: &str) -> Result<Vec<FileRef>>;

    fn subfolders(&self, folder: &FolderRef) -> Result<Vec<FolderRef>>;

    /// Spreadsheets directly inside a folder.
    fn list_spreadsheets(&self, folder: &FolderRef) -> Result<Vec<FileRef>>;

    fn create_folder(&self, name: &str, parent: Option<&FolderRef>) -> Result<FolderRef>;

    /// Create an empty spreadsheet holding a single "Sheet1".
    fn create_spreadsheet(&self, name: &str, parent: Option<&FolderRef>) -> Result<FileRef>;
}

/// Find a folder by name. Without a parent the whole drive is searched;
/// with one, the search covers the parent itself and everything below it.
pub fn find_folder(
    drive: &dyn DriveStore,
    name: &str,
    parent: Option<&FolderRef>,
) -> Result<Option<FolderRef>> {
    let Some(parent) = parent else {
        return Ok(drive.folders_named(name)?.into_iter().next());
    };

    let mut stack = vec![parent.clone()];
    while let Some(folder) = stack.pop() {
        if folder.name == name {
            return Ok(Some(folder));
        }
        let mut children = drive.subfolders(&folder)?;
        children.reverse();
        stack.extend(children);
    }
    Ok(None)
}

/// Find a spreadsheet by name. A folder's own files are checked before any
/// of its subfolders.
pub fn find_file(
    drive: &dyn DriveStore,
    name: &str,
    parent: Option<&FolderRef>,
) -> Result<Option<FileRef>> {
    let Some(parent) = parent else {
        return Ok(drive.files_named(name)?.into_iter().next());
    };

    let mut stack = vec![parent.clone()];
    while let Some(folder) = stack.pop() {
        if let Some(file) = drive
            .list_spreadsheets(&folder)?
            .into_iter()
            .find(|f| f.name == name)
        {
            return Ok(Some(file));
        }
        let mut children = drive.subfolders(&folder)?;
        children.reverse();
        stack.extend(children);
    }
    Ok(None)
}

pub fn find_or_create_folder(
    drive: &dyn DriveStore,
    name: &str,
    parent: Option<&FolderRef>,
) -> Result<FolderRef> {
    match find_folder(drive, name, parent)? {
        Some(folder) => Ok(folder),
        None => {
            debug!(name, parent = parent.map(|p| p.name.as_str()), "creating folder");
            drive.create_folder(name, parent)
        }
    }
}

/// Returns the file and whether it was created by this call.
pub fn find_or_create_spreadsheet(
    drive: &dyn DriveStore,
    name: &str,
    parent: Option<&FolderRef>,
) -> Result<(FileRef, bool)> {
    match find_file(drive, name, parent)? {
        Some(file) => Ok((file, false)),
        None => {
            debug!(name, parent = parent.map(|p| p.name.as_str()), "creating spreadsheet");
            Ok((drive.create_spreadsheet(name, parent)?, true))
        }
    }
}

// ---------------------------------------------------------------------------
// Hierarchies
// ---------------------------------------------------------------------------

/// A folder, the folders directly under it, and plans for any of those
/// children that need folders of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderPlan {
    pub name: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub nested: Vec<FolderPlan>,
}

impl FolderPlan {
    pub fn new<S: Into<String>>(name: impl Into<String>, children: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            children: children.into_iter().map(Into::into).collect(),
            nested: Vec::new(),
        }
    }

    pub fn with_nested(mut self, nested: FolderPlan) -> Self {
        self.nested.push(nested);
        self
    }
}

/// Create whatever part of `plan` is missing under `root`. Existing folders
/// are reused, so running it twice is a no-op. Nested plans whose name is not
/// one of their parent's children are ignored.
pub fn ensure_hierarchy(
    drive: &dyn DriveStore,
    plan: &FolderPlan,
    root: Option<&FolderRef>,
) -> Result<FolderRef> {
    let top = find_or_create_folder(drive, &plan.name, root)?;

    let mut work = vec![(plan, top.clone())];
    while let Some((plan, parent)) = work.pop() {
        let mut children = Vec::with_capacity(plan.children.len());
        for name in &plan.children {
            children.push(find_or_create_folder(drive, name, Some(&parent))?);
        }
        for nested in plan.nested.iter().rev() {
            if let Some(folder) = children.iter().find(|c| c.name == nested.name) {
                work.push((nested, folder.clone()));
            }
        }
    }

    Ok(top)
}

/// Snapshot of a folder and everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderTree {
    pub id: String,
    pub name: String,
    pub children: Vec<FolderTree>,
}

pub fn folder_tree(drive: &dyn DriveStore, root: &FolderRef) -> Result<FolderTree> {
    // Flatten in pre-order, remembering each node's parent slot.
    let mut nodes: Vec<FolderRef> = Vec::new();
    let mut kids: Vec<Vec<usize>> = Vec::new();
    let mut stack: Vec<(FolderRef, Option<usize>)> = vec![(root.clone(), None)];

    while let Some((folder, parent)) = stack.pop() {
        let idx = nodes.len();
        if let Some(p) = parent {
            kids[p].push(idx);
        }
        let mut children = drive.subfolders(&folder)?;
        children.reverse();
        stack.extend(children.into_iter().map(|c| (c, Some(idx))));
        nodes.push(folder);
        kids.push(Vec::new());
    }

    // Children always sit after their parent, so build back to front.
    let mut built: Vec<Option<FolderTree>> = (0..nodes.len()).map(|_| None).collect();
    for idx in (0..nodes.len()).rev() {
        let children = kids[idx].iter().filter_map(|&k| built[k].take()).collect();
        built[idx] = Some(FolderTree {
            id: nodes[idx].id.clone(),
            name: nodes[idx].name.clone(),
            children,
        });
    }

    Ok(built
        .first_mut()
        .and_then(Option::take)
        .unwrap_or_else(|| FolderTree {
            id: root.id.clone(),
            name: root.name.clone(),
            children: Vec::new(),
        }))
}
