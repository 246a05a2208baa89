//! # Store Module
//!
//! Persists the record table between runs so incremental scans can skip
//! unchanged files.
//!
//! ## Backends
//! - `SqliteRecordStore` - versioned SQLite file, replaced atomically on save
//! - `InMemoryRecordStore` - for testing

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryRecordStore;
pub use sqlite::{SqliteRecordStore, SCHEMA_VERSION};
pub use traits::{RecordStore, Snapshot};
