//! Keeping the index in step with the directory tree.
//!
//! # Components
//!
//! - [`Reconciler`]: Full pass that adds, refreshes and removes documents
//! - [`EnrichmentScheduler`]: Runs each module over its pending documents
//!   under a per-module time box
//! - [`LiveWatcher`]: Applies file system events between passes
//! - [`DocumentBuilder`]: Turns a file into a [`Document`](fsindex_core::Document)
//! - [`SniffingMimeDetector`]: Default MIME detection
//!
//! # Example
//!
//! ```rust,ignore
//! use fsindex_sync::{EnrichmentScheduler, Reconciler};
//!
//! let report = Reconciler::new(gateway.clone(), builder, filter, 32)
//!     .reconcile()
//!     .await?;
//!
//! let scheduler = EnrichmentScheduler::new(gateway, modules, time_per_module);
//! for cycle in scheduler.run_cycle().await {
//!     println!("{}: {}", cycle.module, cycle.counts);
//! }
//! ```

pub mod document;
pub mod filter;
pub mod live;
pub mod mime;
pub mod reconciler;
pub mod scheduler;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use document::{BuiltDocument, DocumentBuilder};
pub use filter::ScanFilter;
pub use live::{LiveUpdater, LiveWatcher, LiveWatcherConfig};
pub use mime::SniffingMimeDetector;
pub use reconciler::{walk, ReconcileReport, Reconciler};
pub use scheduler::{CycleStatus, EnrichmentScheduler, ModuleCycleReport};
pub use watcher::FileWatcher;
