//! Stores the jobs read from and write to.
//!
//! The spreadsheet and folder stores are traits over the hosted workspace;
//! [`memory::MemoryWorkspace`] implements both in process. The key-value
//! store backs checkpoints, leases and cached blobs.

pub mod drive;
pub mod kv;
pub mod memory;
pub mod tabular;

pub use drive::{DriveStore, FileRef, FolderRef};
pub use kv::{KvStore, SqliteKvStore};
pub use memory::MemoryWorkspace;
pub use tabular::{Grid, HeaderHit, SheetRef, TabularStore};
