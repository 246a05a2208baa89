//! # Events Module
//!
//! Progress reporting for whatever shell drives the engine.
//!
//! ## Design
//! The coordinator emits events through channels, so a CLI, GUI or test
//! can subscribe without the engine knowing which one is listening.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         if let Event::Extract(ExtractEvent::Progress(p)) = event {
//!             println!("{}/{} {}", p.processed, p.total, p.current_path.display());
//!         }
//!     }
//! });
//!
//! let mut coordinator = Coordinator::builder(root, config).events(sender).build()?;
//! coordinator.scan()?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
