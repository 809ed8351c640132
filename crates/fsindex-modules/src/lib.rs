//! # fsindex-modules
//!
//! Enrichment modules for fsindex.
//!
//! Each module implements [`EnrichmentModule`](fsindex_core::EnrichmentModule):
//! it declares which MIME types it accepts, the version field it owns and
//! the data fields it writes, and turns one file into a stream of partial
//! field maps.
//!
//! ## Modules
//!
//! | Module | Version field | Data fields | Accepts |
//! |--------|---------------|-------------|---------|
//! | [`TikaModule`] | `tika_version` | `text` | text, PDF, office documents, EPUB |
//! | [`WhisperModule`] | `whisper_version` | `transcript`, `language` | audio, video |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fsindex_modules::{ModuleKind, ModuleRegistry};
//!
//! let mut registry = ModuleRegistry::new();
//! registry.register_kind(ModuleKind::Tika, &tika_settings)?;
//! registry.register_kind(ModuleKind::Whisper, &whisper_settings)?;
//!
//! for module in registry.qualifying("application/pdf") {
//!     println!("{} handles PDFs", module.name());
//! }
//! ```

pub mod registry;
pub mod tika;
pub mod whisper;

pub use registry::{ModuleKind, ModuleRegistry, ModuleSettings};
pub use tika::TikaModule;
pub use whisper::WhisperModule;
