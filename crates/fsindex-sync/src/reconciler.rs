//! Full reconciliation of the index against the directory tree.

use fsindex_core::{Document, DocumentStatus, Error, Result};
use fsindex_store::IndexGateway;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::document::{BuiltDocument, DocumentBuilder};
use crate::filter::ScanFilter;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Documents in the index before the pass
    pub existing: usize,
    /// Regular files found by the walk
    pub scanned: usize,
    /// Files without a document
    pub added: usize,
    /// Files whose `mtime` changed; old document replaced
    pub refreshed: usize,
    /// Files whose document is current
    pub unchanged: usize,
    /// Documents removed, including refreshed ones
    pub deleted: usize,
    /// Files whose document could not be built
    pub failed: usize,
    /// Documents in the index after the pass
    pub document_count: u64,
    pub elapsed: Duration,
}

/// Brings the index in line with the directory tree.
pub struct Reconciler {
    gateway: Arc<IndexGateway>,
    builder: DocumentBuilder,
    filter: ScanFilter,
    scan_workers: usize,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<IndexGateway>,
        builder: DocumentBuilder,
        filter: ScanFilter,
        scan_workers: usize,
    ) -> Self {
        Self {
            gateway,
            builder,
            filter,
            scan_workers: scan_workers.max(1),
        }
    }

    /// Run one pass.
    ///
    /// New and changed files are upserted. Documents whose id no file in the
    /// walk produced unchanged are deleted first; that covers removed and
    /// changed files as well as documents left behind under another root.
    /// Only index failures abort the pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let started = Instant::now();
        info!("Reconciling index with {:?}", self.gateway.mapper().root());

        let documents = self.gateway.get_all_documents().await?;
        let mut report = ReconcileReport {
            existing: documents.len(),
            ..Default::default()
        };
        info!("{} documents in the index", documents.len());

        let existing: HashMap<String, Document> = documents
            .into_iter()
            .map(|document| (document.id.clone(), document))
            .collect();
        let existing_ids: Vec<String> = existing.keys().cloned().collect();

        let root = self.gateway.mapper().root().to_path_buf();
        let filter = self.filter.clone();
        let files = tokio::task::spawn_blocking(move || walk(&root, &filter))
            .await
            .map_err(|e| Error::Other(format!("directory walk failed: {e}")))?;
        report.scanned = files.len();
        debug!("Found {} files", files.len());

        let built = self.build_all(files, Arc::new(existing)).await;

        let mut confirmed: HashSet<String> = HashSet::with_capacity(built.len());
        let mut updated = Vec::with_capacity(built.len());
        for built in built {
            match built.status {
                DocumentStatus::New => report.added += 1,
                DocumentStatus::Modified => report.refreshed += 1,
                DocumentStatus::Same => report.unchanged += 1,
            }
            if built.status != DocumentStatus::Modified {
                confirmed.insert(built.document.id.clone());
            }
            updated.push(built.document);
        }
        report.failed = report.scanned - updated.len();

        // Compared by id: a document's URL cannot round-trip a file name
        // that is not valid UTF-8.
        let deleted: Vec<String> = existing_ids
            .into_iter()
            .filter(|id| !confirmed.contains(id))
            .collect();
        report.deleted = deleted.len();

        self.gateway.delete_batch(&deleted, true).await?;
        self.gateway.upsert_batch(updated, true).await?;
        report.document_count = self.gateway.get_document_count().await?;
        report.elapsed = started.elapsed();

        info!("{} documents deleted", report.deleted);
        info!(
            "{} documents created/updated ({} new, {} refreshed, {} unchanged, {} failed)",
            report.added + report.refreshed + report.unchanged,
            report.added,
            report.refreshed,
            report.unchanged,
            report.failed
        );
        info!(
            "{} documents now exist, pass took {:?}",
            report.document_count, report.elapsed
        );
        Ok(report)
    }

    /// Build documents on the blocking pool, at most `scan_workers` at a time.
    async fn build_all(
        &self,
        files: Vec<PathBuf>,
        existing: Arc<HashMap<String, Document>>,
    ) -> Vec<BuiltDocument> {
        let results: Vec<_> = futures::stream::iter(files)
            .map(|path| {
                let builder = self.builder.clone();
                let existing = Arc::clone(&existing);
                tokio::task::spawn_blocking(move || {
                    let result = builder.build(&path, &existing);
                    (path, result)
                })
            })
            .buffer_unordered(self.scan_workers)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|joined| match joined {
                Ok((_, Ok(built))) => Some(built),
                Ok((path, Err(e))) => {
                    warn!("Failed to build document for {:?}: {}", path, e);
                    None
                }
                Err(e) => {
                    warn!("Document build task failed: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// Breadth-first walk of `root`, returning regular files.
///
/// Symlinks are not followed. Unreadable directories are logged and skipped.
pub fn walk(root: &Path, filter: &ScanFilter) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = pending.pop_front() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read directory {:?}: {}", dir, e);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            let path = entry.path();
            if filter.is_excluded(&path) {
                continue;
            }

            // DirEntry::file_type does not follow symlinks
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => pending.push_back(path),
                Ok(kind) if kind.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!("Cannot stat {:?}: {}", path, e),
            }
        }
    }

    files
}
