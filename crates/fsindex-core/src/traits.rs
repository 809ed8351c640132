//! Core traits for fsindex components.
//!
//! - [`IndexBackend`]: The external search index (Meilisearch in production)
//! - [`EnrichmentModule`]: A versioned enrichment pass over indexed files
//! - [`MimeDetector`]: MIME type detection for files on disk
//!
//! Components receive these as trait objects so that tests can swap in
//! in-memory backends and scripted modules.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;

use crate::error::{IndexError, ModuleError};
use crate::types::{DocumentsPage, DocumentsQuery, Fields, IndexStats, TaskDetails, TaskInfo};

// ============================================================================
// Index Backend
// ============================================================================

/// Asynchronous search index backend.
///
/// Writes return a [`TaskInfo`] immediately; completion is observed by
/// polling [`IndexBackend::get_task`].
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Name of the index this backend talks to.
    fn index_name(&self) -> &str;

    /// Whether the index exists.
    async fn index_exists(&self) -> Result<bool, IndexError>;

    /// Create the index with the given primary key.
    async fn create_index(&self, primary_key: &str) -> Result<TaskInfo, IndexError>;

    /// Replace the filterable attributes setting.
    async fn set_filterable_attributes(&self, attributes: &[String])
        -> Result<TaskInfo, IndexError>;

    /// Replace the sortable attributes setting.
    async fn set_sortable_attributes(&self, attributes: &[String]) -> Result<TaskInfo, IndexError>;

    /// Fetch one page of documents.
    async fn get_documents(&self, query: &DocumentsQuery) -> Result<DocumentsPage, IndexError>;

    /// Add documents or merge fields into existing ones, keyed by `id`.
    async fn update_documents(&self, documents: &[Fields]) -> Result<TaskInfo, IndexError>;

    /// Delete documents by id. Unknown ids are ignored.
    async fn delete_documents(&self, ids: &[String]) -> Result<TaskInfo, IndexError>;

    /// Poll an asynchronous task.
    async fn get_task(&self, task_uid: u64) -> Result<TaskDetails, IndexError>;

    /// Index statistics.
    async fn stats(&self) -> Result<IndexStats, IndexError>;
}

// ============================================================================
// Enrichment Modules
// ============================================================================

/// Stream of partial field maps produced by a module for one file.
pub type FieldStream<'a> = BoxStream<'a, Result<Fields, ModuleError>>;

/// A versioned enrichment pass.
///
/// The scheduler selects documents whose [`field_name`](Self::field_name)
/// is below [`version`](Self::version), calls [`init`](Self::init) once per
/// cycle, drains [`produce_fields`](Self::produce_fields) for each file and
/// writes the version stamp itself after the stream ends. Bumping the
/// version makes every qualifying file pending again.
#[async_trait]
pub trait EnrichmentModule: Send + Sync {
    /// Module name used in logs.
    fn name(&self) -> &str;

    /// Document field holding this module's version stamp.
    fn field_name(&self) -> &str;

    /// Current logic version.
    fn version(&self) -> u64;

    /// Fields this module writes besides its version stamp.
    fn data_field_names(&self) -> &[&str];

    /// Concurrency ceiling for one cycle.
    fn max_workers(&self) -> usize;

    /// Whether files of this MIME type qualify for the module.
    fn supports(&self, mime_type: &str) -> bool;

    /// Acquire per-cycle resources.
    async fn init(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Release per-cycle resources.
    async fn cleanup(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Produce enrichment fields for one file.
    ///
    /// Every item is written to the index as soon as it is yielded, so long
    /// jobs can checkpoint partial results. The stream ending without an
    /// error means the file is fully processed.
    fn produce_fields<'a>(&'a self, path: &'a Path, current: &'a Fields) -> FieldStream<'a>;
}

// ============================================================================
// MIME Detection
// ============================================================================

/// Blocking MIME type detection.
pub trait MimeDetector: Send + Sync {
    /// Detect the MIME type of a file on disk.
    fn detect(&self, path: &Path) -> std::io::Result<String>;
}
