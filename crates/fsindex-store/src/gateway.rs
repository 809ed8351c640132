//! The single point of contact between fsindex and the search index.
//!
//! [`IndexGateway`] is constructed explicitly and shared behind an `Arc`;
//! the live watcher builds its own over a separate backend connection.

use fsindex_core::{
    Document, DocumentsQuery, EnrichmentModule, Fields, Filter, IndexBackend, IndexError,
    PathMapper, PendingJob, TaskInfo, TaskStatus, ID_FIELD,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Paging and task-polling settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Page size for fetches and chunk size for writes
    pub batch_size: usize,
    /// Delay between two task status polls
    pub poll_interval: Duration,
    /// Give up waiting on a task after this long
    pub max_task_wait: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            poll_interval: Duration::from_millis(500),
            max_task_wait: Duration::from_secs(600),
        }
    }
}

/// Index operations used by the reconciler, scheduler and live watcher.
#[derive(Clone)]
pub struct IndexGateway {
    backend: Arc<dyn IndexBackend>,
    mapper: Arc<PathMapper>,
    config: GatewayConfig,
}

impl IndexGateway {
    pub fn new(backend: Arc<dyn IndexBackend>, mapper: Arc<PathMapper>, config: GatewayConfig) -> Self {
        Self {
            backend,
            mapper,
            config: GatewayConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
        }
    }

    #[must_use]
    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Create the index if missing and declare its attributes.
    ///
    /// Filterable attributes are `id` plus every module's version field;
    /// `mtime` is sortable.
    pub async fn init(&self, modules: &[Arc<dyn EnrichmentModule>]) -> Result<(), IndexError> {
        if !self.backend.index_exists().await? {
            info!("Creating index {}", self.backend.index_name());
            let task = self.backend.create_index(ID_FIELD).await?;
            self.wait_for_task(task).await?;
        }

        let mut filterable = vec![ID_FIELD.to_string()];
        filterable.extend(modules.iter().map(|m| m.field_name().to_string()));
        let task = self.backend.set_filterable_attributes(&filterable).await?;
        self.wait_for_task(task).await?;

        let task = self
            .backend
            .set_sortable_attributes(&["mtime".to_string()])
            .await?;
        self.wait_for_task(task).await?;

        info!(
            "Index {} ready, filterable attributes: {:?}",
            self.backend.index_name(),
            filterable
        );
        Ok(())
    }

    /// Fetch every document in the index.
    pub async fn get_all_documents(&self) -> Result<Vec<Document>, IndexError> {
        let raw = self.fetch_all(None, None).await?;
        raw.into_iter()
            .map(|fields| Document::from_fields(fields).map_err(|e| IndexError::Decode(e.to_string())))
            .collect()
    }

    pub async fn get_document_count(&self) -> Result<u64, IndexError> {
        Ok(self.backend.stats().await?.number_of_documents)
    }

    /// Add or merge full documents.
    pub async fn upsert_batch(&self, documents: Vec<Document>, wait: bool) -> Result<(), IndexError> {
        let fields: Vec<Fields> = documents.into_iter().map(Document::into_fields).collect();
        self.write_fields(&fields, wait).await
    }

    /// Merge one partial document into the index.
    pub async fn upsert_fields(&self, fields: Fields, wait: bool) -> Result<(), IndexError> {
        if !fields.get(ID_FIELD).is_some_and(Value::is_string) {
            return Err(IndexError::Decode(
                "partial document is missing its `id` field".to_string(),
            ));
        }
        self.write_fields(&[fields], wait).await
    }

    pub async fn delete_batch(&self, ids: &[String], wait: bool) -> Result<(), IndexError> {
        for chunk in ids.chunks(self.config.batch_size) {
            debug!("Deleting {} documents", chunk.len());
            let task = self.backend.delete_documents(chunk).await?;
            if wait {
                self.wait_for_task(task).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_one(&self, id: &str, wait: bool) -> Result<(), IndexError> {
        self.delete_batch(&[id.to_string()], wait).await
    }

    /// Documents whose version field for `module` is behind its version.
    ///
    /// Documents without the field never qualified and are not returned.
    /// Documents whose URL does not map back into the indexed root are
    /// skipped; the next reconciliation removes them.
    pub async fn get_pending_jobs(
        &self,
        module: &dyn EnrichmentModule,
    ) -> Result<Vec<PendingJob>, IndexError> {
        let filter = Filter::LessThan {
            field: module.field_name().to_string(),
            value: module.version(),
        };
        let mut projection: Vec<String> = [ID_FIELD, "url", "mtime", "type"]
            .iter()
            .map(ToString::to_string)
            .collect();
        projection.extend(module.data_field_names().iter().map(ToString::to_string));

        let raw = self.fetch_all(Some(filter), Some(projection)).await?;
        let mut jobs = Vec::with_capacity(raw.len());
        for fields in raw {
            match self.job_from_fields(fields) {
                Some(job) => jobs.push(job),
                None => continue,
            }
        }

        debug!("{} pending jobs for module {}", jobs.len(), module.name());
        Ok(jobs)
    }

    fn job_from_fields(&self, fields: Fields) -> Option<PendingJob> {
        let id = fields.get(ID_FIELD)?.as_str()?.to_string();
        let url = fields.get("url").and_then(Value::as_str).unwrap_or_default();
        let relative_path = match self.mapper.relative_path_from_url(url) {
            Ok(relative) => relative.to_string(),
            Err(e) => {
                warn!("Skipping pending document {}: {}", id, e);
                return None;
            }
        };
        let path = self.mapper.file_path_from_url(url).ok()?;
        let mtime = fields.get("mtime").and_then(Value::as_f64).unwrap_or_default();
        let mime_type = fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(PendingJob {
            id,
            path,
            relative_path,
            mtime,
            mime_type,
            fields,
        })
    }

    /// Poll `task` until it settles.
    ///
    /// Fails with [`IndexError::TaskFailed`] when the task fails or is
    /// canceled, and with [`IndexError::TaskTimeout`] when it is still
    /// pending after the configured maximum wait.
    pub async fn wait_for_task(&self, task: TaskInfo) -> Result<(), IndexError> {
        let started = Instant::now();
        loop {
            let details = self.backend.get_task(task.task_uid).await?;
            match details.status {
                TaskStatus::Succeeded => return Ok(()),
                TaskStatus::Failed | TaskStatus::Canceled => {
                    return Err(IndexError::TaskFailed {
                        uid: details.uid,
                        reason: details
                            .error
                            .unwrap_or_else(|| format!("{:?}", details.status).to_lowercase()),
                    });
                }
                TaskStatus::Enqueued | TaskStatus::Processing => {}
            }

            let waited = started.elapsed();
            if waited >= self.config.max_task_wait {
                return Err(IndexError::TaskTimeout {
                    uid: task.task_uid,
                    waited,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn write_fields(&self, documents: &[Fields], wait: bool) -> Result<(), IndexError> {
        for chunk in documents.chunks(self.config.batch_size) {
            debug!("Upserting {} documents", chunk.len());
            let task = self.backend.update_documents(chunk).await?;
            if wait {
                self.wait_for_task(task).await?;
            }
        }
        Ok(())
    }

    async fn fetch_all(
        &self,
        filter: Option<Filter>,
        fields: Option<Vec<String>>,
    ) -> Result<Vec<Fields>, IndexError> {
        let mut query = DocumentsQuery {
            offset: 0,
            limit: self.config.batch_size,
            filter,
            fields,
        };
        let mut all = Vec::new();
        loop {
            let page = self.backend.get_documents(&query).await?;
            let received = page.results.len();
            all.extend(page.results);
            query.offset += received;
            if received == 0 || query.offset as u64 >= page.total {
                break;
            }
        }
        Ok(all)
    }
}
