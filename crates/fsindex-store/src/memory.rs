//! In-memory index backend for testing without Meilisearch.
//!
//! [`MemoryBackend`] mimics the parts of Meilisearch fsindex relies on:
//! merge-on-update keyed by `id`, filter evaluation restricted to declared
//! filterable attributes, field projection, and asynchronous tasks that can
//! be made to fail or stall.

use async_trait::async_trait;
use fsindex_core::{
    DocumentsPage, DocumentsQuery, Fields, Filter, IndexBackend, IndexError, IndexStats,
    TaskDetails, TaskInfo, TaskStatus, ID_FIELD,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct State {
    exists: bool,
    primary_key: Option<String>,
    documents: BTreeMap<String, Fields>,
    filterable: Vec<String>,
    sortable: Vec<String>,
    tasks: HashMap<u64, TaskDetails>,
    next_task_uid: u64,
    failing_writes: usize,
    stall_tasks: bool,
    write_calls: usize,
}

impl State {
    fn enqueue(&mut self, status: TaskStatus, error: Option<String>) -> TaskInfo {
        let uid = self.next_task_uid;
        self.next_task_uid += 1;
        let status = if self.stall_tasks {
            TaskStatus::Processing
        } else {
            status
        };
        self.tasks.insert(uid, TaskDetails { uid, status, error });
        TaskInfo { task_uid: uid }
    }

    /// Returns a failed task if a write failure was scheduled.
    fn take_write_failure(&mut self) -> Option<TaskInfo> {
        self.write_calls += 1;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Some(self.enqueue(
                TaskStatus::Failed,
                Some("injected write failure".to_string()),
            ));
        }
        None
    }
}

/// In-memory index backend.
///
/// Writes are applied immediately and their tasks report `succeeded`
/// unless a failure or stall was requested.
///
/// # Example
///
/// ```rust
/// use fsindex_core::IndexBackend;
/// use fsindex_store::MemoryBackend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MemoryBackend::new("files");
/// backend.create_index("id").await?;
/// assert_eq!(backend.stats().await?.number_of_documents, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryBackend {
    name: String,
    state: Arc<RwLock<State>>,
}

impl MemoryBackend {
    /// Create a backend for an index that does not exist yet.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Make the next `count` writes produce failed tasks without applying.
    pub async fn fail_next_writes(&self, count: usize) {
        self.state.write().await.failing_writes = count;
    }

    /// Keep every new task in the `processing` state.
    pub async fn stall_tasks(&self, stall: bool) {
        self.state.write().await.stall_tasks = stall;
    }

    /// Stop stalling and let every stalled task succeed.
    pub async fn release_stalled_tasks(&self) {
        let mut state = self.state.write().await;
        state.stall_tasks = false;
        for task in state.tasks.values_mut() {
            if task.status == TaskStatus::Processing {
                task.status = TaskStatus::Succeeded;
            }
        }
    }

    /// Number of update/delete calls received.
    pub async fn write_calls(&self) -> usize {
        self.state.read().await.write_calls
    }

    /// Snapshot of one stored document.
    pub async fn document(&self, id: &str) -> Option<Fields> {
        self.state.read().await.documents.get(id).cloned()
    }

    /// Snapshot of all stored documents, ordered by id.
    pub async fn documents(&self) -> Vec<Fields> {
        self.state.read().await.documents.values().cloned().collect()
    }

    pub async fn filterable_attributes(&self) -> Vec<String> {
        self.state.read().await.filterable.clone()
    }

    pub async fn sortable_attributes(&self) -> Vec<String> {
        self.state.read().await.sortable.clone()
    }

    fn matches(filter: &Filter, document: &Fields) -> bool {
        match filter {
            Filter::LessThan { field, value } => document
                .get(field)
                .and_then(Value::as_f64)
                .is_some_and(|current| current < *value as f64),
        }
    }

    fn project(document: &Fields, fields: Option<&Vec<String>>) -> Fields {
        match fields {
            Some(names) => document
                .iter()
                .filter(|(key, _)| names.iter().any(|name| name == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            None => document.clone(),
        }
    }

    fn require_index(&self, state: &State) -> Result<(), IndexError> {
        if state.exists {
            Ok(())
        } else {
            Err(IndexError::IndexNotFound(self.name.clone()))
        }
    }
}

#[async_trait]
impl IndexBackend for MemoryBackend {
    fn index_name(&self) -> &str {
        &self.name
    }

    async fn index_exists(&self) -> Result<bool, IndexError> {
        Ok(self.state.read().await.exists)
    }

    async fn create_index(&self, primary_key: &str) -> Result<TaskInfo, IndexError> {
        let mut state = self.state.write().await;
        if state.exists {
            return Ok(state.enqueue(
                TaskStatus::Failed,
                Some(format!("index `{}` already exists", self.name)),
            ));
        }
        state.exists = true;
        state.primary_key = Some(primary_key.to_string());
        debug!("MemoryBackend created index {}", self.name);
        Ok(state.enqueue(TaskStatus::Succeeded, None))
    }

    async fn set_filterable_attributes(
        &self,
        attributes: &[String],
    ) -> Result<TaskInfo, IndexError> {
        let mut state = self.state.write().await;
        self.require_index(&state)?;
        state.filterable = attributes.to_vec();
        Ok(state.enqueue(TaskStatus::Succeeded, None))
    }

    async fn set_sortable_attributes(&self, attributes: &[String]) -> Result<TaskInfo, IndexError> {
        let mut state = self.state.write().await;
        self.require_index(&state)?;
        state.sortable = attributes.to_vec();
        Ok(state.enqueue(TaskStatus::Succeeded, None))
    }

    async fn get_documents(&self, query: &DocumentsQuery) -> Result<DocumentsPage, IndexError> {
        let state = self.state.read().await;
        self.require_index(&state)?;

        if let Some(Filter::LessThan { field, .. }) = &query.filter {
            if !state.filterable.contains(field) {
                return Err(IndexError::Http {
                    status: 400,
                    code: Some("invalid_document_filter".to_string()),
                    message: format!("attribute `{field}` is not filterable"),
                });
            }
        }

        let matching: Vec<&Fields> = state
            .documents
            .values()
            .filter(|doc| query.filter.as_ref().map_or(true, |f| Self::matches(f, doc)))
            .collect();

        let results = matching
            .iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|doc| Self::project(doc, query.fields.as_ref()))
            .collect();

        Ok(DocumentsPage {
            results,
            total: matching.len() as u64,
        })
    }

    async fn update_documents(&self, documents: &[Fields]) -> Result<TaskInfo, IndexError> {
        let mut state = self.state.write().await;
        self.require_index(&state)?;
        if let Some(task) = state.take_write_failure() {
            return Ok(task);
        }

        for document in documents {
            let Some(id) = document.get(ID_FIELD).and_then(Value::as_str) else {
                return Ok(state.enqueue(
                    TaskStatus::Failed,
                    Some("document is missing its `id` field".to_string()),
                ));
            };
            let stored = state.documents.entry(id.to_string()).or_default();
            for (key, value) in document {
                stored.insert(key.clone(), value.clone());
            }
        }
        debug!("MemoryBackend merged {} documents", documents.len());
        Ok(state.enqueue(TaskStatus::Succeeded, None))
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<TaskInfo, IndexError> {
        let mut state = self.state.write().await;
        self.require_index(&state)?;
        if let Some(task) = state.take_write_failure() {
            return Ok(task);
        }

        for id in ids {
            state.documents.remove(id);
        }
        debug!("MemoryBackend deleted {} documents", ids.len());
        Ok(state.enqueue(TaskStatus::Succeeded, None))
    }

    async fn get_task(&self, task_uid: u64) -> Result<TaskDetails, IndexError> {
        self.state
            .read()
            .await
            .tasks
            .get(&task_uid)
            .cloned()
            .ok_or_else(|| IndexError::Http {
                status: 404,
                code: Some("task_not_found".to_string()),
                message: format!("task `{task_uid}` not found"),
            })
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let state = self.state.read().await;
        self.require_index(&state)?;
        Ok(IndexStats {
            number_of_documents: state.documents.len() as u64,
            is_indexing: false,
        })
    }
}
