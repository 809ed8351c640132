//! # fsindex-core
//!
//! Core types and traits for fsindex, which keeps a search index in sync
//! with a directory tree and runs versioned enrichment passes over it.
//!
//! ## Architecture
//!
//! ```text
//! directory tree ──scan──▶ Reconciler ──┐
//!        │                              ├──▶ IndexGateway ──▶ IndexBackend
//!        └──events──▶ LiveUpdater ──────┤
//!                                       │
//!            EnrichmentModule ◀── Scheduler
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Document`] | One indexed file |
//! | [`PathMapper`] | Path, id and URL conversions |
//! | [`PendingJob`] | A file waiting for a module |
//! | [`OutcomeCounts`] | Results of one module cycle |
//!
//! ## Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`IndexBackend`] | Asynchronous search index |
//! | [`EnrichmentModule`] | Versioned enrichment pass |
//! | [`MimeDetector`] | MIME type detection |
//!
//! ## Related Crates
//!
//! - `fsindex-store`: Index gateway and backends
//! - `fsindex-modules`: Enrichment module implementations
//! - `fsindex-sync`: Reconciler, scheduler and live watcher

pub mod error;
pub mod identity;
pub mod traits;
pub mod types;

pub use error::{DocumentError, Error, IndexError, ModuleError, Result};
pub use identity::{id_from_relative_path, PathMapper};
pub use traits::*;
pub use types::*;
