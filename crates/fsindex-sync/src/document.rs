//! Building index documents from files on disk.

use fsindex_core::{
    Document, DocumentError, DocumentStatus, EnrichmentModule, MimeDetector, PathMapper,
};
use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A document built from a file, with its relation to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltDocument {
    pub path: PathBuf,
    pub document: Document,
    pub status: DocumentStatus,
}

/// Builds [`Document`]s from files.
///
/// Building is blocking (stat plus MIME sniffing) and is meant to run on the
/// blocking pool.
#[derive(Clone)]
pub struct DocumentBuilder {
    mapper: Arc<PathMapper>,
    modules: Arc<[Arc<dyn EnrichmentModule>]>,
    mime: Arc<dyn MimeDetector>,
}

impl DocumentBuilder {
    pub fn new(
        mapper: Arc<PathMapper>,
        modules: Vec<Arc<dyn EnrichmentModule>>,
        mime: Arc<dyn MimeDetector>,
    ) -> Self {
        Self {
            mapper,
            modules: modules.into(),
            mime,
        }
    }

    #[must_use]
    pub fn mapper(&self) -> &Arc<PathMapper> {
        &self.mapper
    }

    /// Build the document for `path`.
    ///
    /// `existing` is the index snapshot keyed by id. A file whose id is
    /// unknown is `New`; one whose stored `mtime` differs is `Modified`.
    /// For both, every module that accepts the file's MIME type gets its
    /// version field set to `0`. For `Same` no version field is set, so a
    /// merge-upsert keeps the module progress already stored.
    pub fn build(
        &self,
        path: &Path,
        existing: &HashMap<String, Document>,
    ) -> Result<BuiltDocument, DocumentError> {
        let relative_path = self.mapper.relative_path(path)?;
        let metadata = std::fs::metadata(path).map_err(|source| DocumentError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(DocumentError::NotAFile(path.to_path_buf()));
        }

        let mime_type = self.mime.detect(path).map_err(|source| DocumentError::Mime {
            path: path.to_path_buf(),
            source,
        })?;

        let id = fsindex_core::id_from_relative_path(&relative_path);
        let mtime = mtime_secs(&metadata);
        let status = match existing.get(&id) {
            None => DocumentStatus::New,
            Some(stored) if stored.mtime != mtime => DocumentStatus::Modified,
            Some(_) => DocumentStatus::Same,
        };

        let mut document = Document {
            id,
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: metadata.len(),
            mtime,
            ctime: ctime_secs(&metadata),
            url: self.mapper.url_from_relative_path(&relative_path),
            mime_type,
            extra: Default::default(),
        };

        if status.resets_versions() {
            let mime_type = document.mime_type.clone();
            for module in self.modules.iter().filter(|m| m.supports(&mime_type)) {
                document.set_version(module.field_name(), 0);
            }
        }

        Ok(BuiltDocument {
            path: path.to_path_buf(),
            document,
            status,
        })
    }
}

fn secs_since_epoch(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn mtime_secs(metadata: &Metadata) -> f64 {
    metadata.modified().map(secs_since_epoch).unwrap_or_default()
}

#[cfg(unix)]
fn ctime_secs(metadata: &Metadata) -> f64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ctime() as f64 + metadata.ctime_nsec() as f64 / 1e9
}

#[cfg(not(unix))]
fn ctime_secs(metadata: &Metadata) -> f64 {
    metadata.created().map(secs_since_epoch).unwrap_or_default()
}
