//! # Photo Sorter
//!
//! Finds near-duplicate photos, groups them, and plans where every file
//! should go.
//!
//! ## Core Philosophy
//! - **Never delete as part of a plan** - duplicates go to a quarantine folder
//! - **Deterministic** - the same files and settings always give the same plan
//! - **Incremental** - unchanged files are never decoded twice
//!
//! ## Architecture
//! The library is split into a core engine (GUI-agnostic) and presentation layers:
//! - `core` - Extraction, indexing, clustering, planning and execution
//! - `events` - Event-driven progress reporting (GUI-ready)
//! - `error` - Error taxonomy
//! - `cli` - Command-line interface

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{Result, SorterError};

/// Initialize tracing for the library
///
/// This should be called by the application entry point (CLI or GUI).
/// A subscriber that is already installed is left in place.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
