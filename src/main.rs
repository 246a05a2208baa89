//! # photo-sort CLI
//!
//! Command-line interface for the photo sorter.
//!
//! ## Usage
//! ```bash
//! photo-sort scan ~/Inbox --threshold 5
//! photo-sort plan ~/Inbox --library ~/Photos --quarantine ~/Duplicates
//! photo-sort apply ~/Inbox --library ~/Photos --quarantine ~/Duplicates --yes
//! ```

mod cli;

use photo_sorter::Result;

fn main() -> Result<()> {
    photo_sorter::init_tracing();
    cli::run()
}
