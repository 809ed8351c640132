//! Core types for fsindex.
//!
//! ## Documents
//! - [`Document`]: One indexed file as stored in the search index
//! - [`Fields`]: A partial document (field name to JSON value)
//! - [`DocumentStatus`]: How a freshly built document relates to the index
//!
//! ## Backend protocol
//! - [`DocumentsQuery`] / [`DocumentsPage`]: Paged document fetches
//! - [`Filter`]: Comparison predicates the backend evaluates
//! - [`TaskInfo`] / [`TaskDetails`] / [`TaskStatus`]: Asynchronous write tasks
//!
//! ## Enrichment
//! - [`PendingJob`]: A document whose module version is behind
//! - [`JobOutcome`] / [`OutcomeCounts`]: Per-file results of a module cycle
//!
//! ## Watching
//! - [`FileEvent`]: File system events for the live watcher

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// A partial document: field name to JSON value.
pub type Fields = serde_json::Map<String, Value>;

/// Primary key attribute of every document.
pub const ID_FIELD: &str = "id";

// ============================================================================
// Documents
// ============================================================================

/// One indexed file.
///
/// Module version fields and module data fields live in `extra`, so a
/// document round-trips through the index without knowing which modules
/// are registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Hash of the path relative to the indexed root
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    #[serde(default)]
    pub mtime: f64,
    /// Status change time, seconds since the Unix epoch
    #[serde(default)]
    pub ctime: f64,
    /// Public URL of the file
    #[serde(default)]
    pub url: String,
    /// Detected MIME type
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Module version fields and module data
    #[serde(flatten)]
    pub extra: Fields,
}

impl Document {
    /// Read a module version field, if present.
    #[must_use]
    pub fn version_of(&self, field_name: &str) -> Option<u64> {
        self.extra.get(field_name).and_then(Value::as_u64)
    }

    /// Set a module version field.
    pub fn set_version(&mut self, field_name: &str, version: u64) {
        self.extra
            .insert(field_name.to_string(), Value::from(version));
    }

    /// Convert into the untyped representation written to the backend.
    pub fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(ID_FIELD.to_string(), Value::String(self.id));
        fields.insert("name".to_string(), Value::String(self.name));
        fields.insert("size".to_string(), Value::from(self.size));
        fields.insert("mtime".to_string(), Value::from(self.mtime));
        fields.insert("ctime".to_string(), Value::from(self.ctime));
        fields.insert("url".to_string(), Value::String(self.url));
        fields.insert("type".to_string(), Value::String(self.mime_type));
        for (key, value) in self.extra {
            fields.entry(key).or_insert(value);
        }
        fields
    }

    /// Parse a document fetched from the backend.
    pub fn from_fields(fields: Fields) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(fields))
    }
}

/// How a freshly built document relates to what the index already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// No document with this id existed
    New,
    /// A document existed with a different `mtime`
    Modified,
    /// A document existed with the same `mtime`
    Same,
}

impl DocumentStatus {
    /// Whether module version fields must be reset for this status.
    #[must_use]
    pub fn resets_versions(self) -> bool {
        matches!(self, Self::New | Self::Modified)
    }
}

// ============================================================================
// Backend protocol
// ============================================================================

/// Comparison predicate evaluated by the index backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field < value`
    LessThan { field: String, value: u64 },
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LessThan { field, value } => write!(f, "{field} < {value}"),
        }
    }
}

/// A paged document fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentsQuery {
    pub offset: usize,
    pub limit: usize,
    pub filter: Option<Filter>,
    /// Attributes to return; `None` returns whole documents
    pub fields: Option<Vec<String>>,
}

/// One page of fetched documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentsPage {
    pub results: Vec<Fields>,
    pub total: u64,
}

/// Handle on an asynchronous backend write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_uid: u64,
}

/// State of an asynchronous backend write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enqueued,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// Whether the task will not change state anymore.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Polled task state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDetails {
    pub uid: u64,
    pub status: TaskStatus,
    /// Backend-provided reason when the task failed
    pub error: Option<String>,
}

/// Index-level statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub number_of_documents: u64,
    pub is_indexing: bool,
}

// ============================================================================
// Enrichment
// ============================================================================

/// A document whose module version field is behind the module's version.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingJob {
    pub id: String,
    /// Absolute filesystem path derived from the document URL
    pub path: PathBuf,
    pub relative_path: String,
    pub mtime: f64,
    pub mime_type: String,
    /// Projected document fields (url, mtime, type and module data)
    pub fields: Fields,
}

/// Result of one file in one module cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOutcome {
    /// Sequence exhausted and version stamp written
    Success,
    /// Module or index write failed; version left unadvanced
    Failure,
    /// File vanished before or during processing
    NotFound,
    /// Abandoned because the module's time box expired
    Postponed,
}

/// Aggregated outcomes of one module cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub success: u64,
    pub failure: u64,
    pub not_found: u64,
    pub postponed: u64,
}

impl OutcomeCounts {
    /// Count one outcome.
    pub fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Success => self.success += 1,
            JobOutcome::Failure => self.failure += 1,
            JobOutcome::NotFound => self.not_found += 1,
            JobOutcome::Postponed => self.postponed += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.success + self.failure + self.not_found + self.postponed
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success={}, fail={}, not_found={}, postponed={}",
            self.success, self.failure, self.not_found, self.postponed
        )
    }
}

// ============================================================================
// File Events
// ============================================================================

/// File system event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> Document {
        let mut doc = Document {
            id: "abc".to_string(),
            name: "a.txt".to_string(),
            size: 12,
            mtime: 100.5,
            ctime: 90.0,
            url: "https://files.example/a.txt".to_string(),
            mime_type: "text/plain".to_string(),
            extra: Fields::new(),
        };
        doc.set_version("tika_version", 0);
        doc
    }

    // ==================== Document Tests ====================

    #[test]
    fn test_document_serializes_type_and_flattened_fields() {
        let value = serde_json::to_value(sample_document()).unwrap();
        assert_eq!(value["type"], "text/plain");
        assert_eq!(value["tika_version"], 0);
        assert!(value.get("mime_type").is_none());
        assert!(value.get("extra").is_none());
    }

    #[test]
    fn test_document_from_fields_keeps_unknown_fields() {
        let fields = json!({
            "id": "abc",
            "name": "song.mp3",
            "size": 4,
            "mtime": 1.0,
            "ctime": 1.0,
            "url": "https://files.example/song.mp3",
            "type": "audio/mpeg",
            "whisper_version": 2,
            "transcript": "hello"
        });
        let Value::Object(fields) = fields else {
            unreachable!()
        };

        let doc = Document::from_fields(fields).unwrap();
        assert_eq!(doc.mime_type, "audio/mpeg");
        assert_eq!(doc.version_of("whisper_version"), Some(2));
        assert_eq!(doc.extra["transcript"], "hello");
    }

    #[test]
    fn test_document_from_partial_fields_uses_defaults() {
        let mut fields = Fields::new();
        fields.insert("id".to_string(), json!("orphan"));
        fields.insert("text".to_string(), json!("left behind"));

        let doc = Document::from_fields(fields).unwrap();
        assert_eq!(doc.id, "orphan");
        assert!(doc.url.is_empty());
        assert_eq!(doc.mtime, 0.0);
    }

    #[test]
    fn test_into_fields_round_trips() {
        let doc = sample_document();
        let fields = doc.clone().into_fields();
        assert_eq!(fields["id"], "abc");
        assert_eq!(fields["tika_version"], 0);
        assert_eq!(Document::from_fields(fields).unwrap(), doc);
    }

    #[test]
    fn test_version_of_missing_field() {
        let doc = sample_document();
        assert_eq!(doc.version_of("whisper_version"), None);
    }

    // ==================== Status / Task Tests ====================

    #[test]
    fn test_document_status_resets_versions() {
        assert!(DocumentStatus::New.resets_versions());
        assert!(DocumentStatus::Modified.resets_versions());
        assert!(!DocumentStatus::Same.resets_versions());
    }

    #[test]
    fn test_task_status_deserialize() {
        let status: TaskStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(status, TaskStatus::Succeeded);
        assert!(status.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_task_info_camel_case() {
        let info: TaskInfo = serde_json::from_str(r#"{"taskUid": 9}"#).unwrap();
        assert_eq!(info.task_uid, 9);
    }

    #[test]
    fn test_filter_display() {
        let filter = Filter::LessThan {
            field: "tika_version".to_string(),
            value: 3,
        };
        assert_eq!(filter.to_string(), "tika_version < 3");
    }

    // ==================== Outcome Tests ====================

    #[test]
    fn test_outcome_counts_record_and_display() {
        let mut counts = OutcomeCounts::default();
        counts.record(JobOutcome::Success);
        counts.record(JobOutcome::Success);
        counts.record(JobOutcome::Failure);
        counts.record(JobOutcome::Postponed);

        assert_eq!(counts.total(), 4);
        assert_eq!(
            counts.to_string(),
            "success=2, fail=1, not_found=0, postponed=1"
        );
    }

    // ==================== FileEvent Tests ====================

    #[test]
    fn test_file_event_renamed() {
        let event = FileEvent::Renamed {
            from: PathBuf::from("/data/old.txt"),
            to: PathBuf::from("/data/new.txt"),
        };
        match event {
            FileEvent::Renamed { from, to } => {
                assert_eq!(from, PathBuf::from("/data/old.txt"));
                assert_eq!(to, PathBuf::from("/data/new.txt"));
            }
            _ => panic!("Expected Renamed event"),
        }
    }
}
