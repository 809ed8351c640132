//! Scripted modules and fixtures shared by the unit tests.

use async_stream::try_stream;
use async_trait::async_trait;
use fsindex_core::{
    EnrichmentModule, FieldStream, Fields, MimeDetector, ModuleError, PathMapper,
};
use fsindex_store::{GatewayConfig, IndexGateway, MemoryBackend};
use futures::Stream;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Always answers the same MIME type.
pub struct FixedMime(pub String);

impl MimeDetector for FixedMime {
    fn detect(&self, _path: &Path) -> std::io::Result<String> {
        Ok(self.0.clone())
    }
}

/// Picks the MIME type from the extension: `.txt` is text, `.mp3` audio.
pub struct ExtensionMime;

impl MimeDetector for ExtensionMime {
    fn detect(&self, path: &Path) -> std::io::Result<String> {
        Ok(match path.extension().and_then(|e| e.to_str()) {
            Some("txt") => "text/plain",
            Some("mp3") => "audio/mpeg",
            _ => "application/octet-stream",
        }
        .to_string())
    }
}

/// What a [`StubModule`] does with each file.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Yield `chunks` field maps, then end
    Yield { chunks: usize },
    /// Sleep, then yield one field map
    Slow(Duration),
    /// Sleep on files with this name, yield at once for the rest
    SlowOn(String, Duration),
    /// Fail on files with this name, succeed on the rest
    FailOn(String),
    /// Delete the file, then yield a field map
    DeleteFile,
}

struct ActiveGuard<'a>(&'a StubModule);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct StubModule {
    name: String,
    field_name: String,
    data_field: String,
    mime_prefix: String,
    version: u64,
    max_workers: usize,
    behavior: Behavior,
    fail_init: bool,
    pub init_calls: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub started: Mutex<Vec<PathBuf>>,
}

impl StubModule {
    pub fn new(name: &str, mime_prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            field_name: format!("{name}_version"),
            data_field: format!("{name}_data"),
            mime_prefix: mime_prefix.to_string(),
            version: 1,
            max_workers: 4,
            behavior: Behavior::Yield { chunks: 1 },
            fail_init: false,
            init_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn started_names(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }

    fn enter(&self) -> ActiveGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(self)
    }

    fn data(&self, value: serde_json::Value) -> Fields {
        let mut fields = Fields::new();
        fields.insert(self.data_field.clone(), value);
        fields
    }

    fn script<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Stream<Item = Result<Fields, ModuleError>> + Send + 'a {
        try_stream! {
            let _guard = self.enter();
            self.started.lock().unwrap().push(path.to_path_buf());
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match self.behavior.clone() {
                Behavior::Yield { chunks } => {
                    for i in 0..chunks {
                        yield self.data(json!(format!("{file_name} part {i}")));
                    }
                }
                Behavior::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    yield self.data(json!(file_name));
                }
                Behavior::SlowOn(name, delay) => {
                    if name == file_name {
                        tokio::time::sleep(delay).await;
                    }
                    yield self.data(json!(file_name));
                }
                Behavior::FailOn(name) => {
                    refuse_if(name == file_name, &name)?;
                    yield self.data(json!(file_name));
                }
                Behavior::DeleteFile => {
                    std::fs::remove_file(path)?;
                    yield self.data(json!(file_name));
                }
            }
        }
    }
}

fn refuse_if(refuse: bool, name: &str) -> Result<(), ModuleError> {
    if refuse {
        Err(ModuleError::Failed(format!("cannot process {name}")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl EnrichmentModule for StubModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn data_field_names(&self) -> &[&str] {
        &[]
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn supports(&self, mime_type: &str) -> bool {
        mime_type.starts_with(&self.mime_prefix)
    }

    async fn init(&self) -> Result<(), ModuleError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(ModuleError::Init("scripted init failure".to_string()));
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), ModuleError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn produce_fields<'a>(&'a self, path: &'a Path, _current: &'a Fields) -> FieldStream<'a> {
        Box::pin(self.script(path))
    }
}

/// A gateway over a fresh in-memory index, already initialized.
pub async fn memory_gateway(
    root: &Path,
    modules: &[Arc<dyn EnrichmentModule>],
) -> (Arc<IndexGateway>, MemoryBackend) {
    let backend = MemoryBackend::new("files");
    let gateway = IndexGateway::new(
        Arc::new(backend.clone()),
        Arc::new(PathMapper::new(root, "files.example.org")),
        GatewayConfig {
            batch_size: 100,
            poll_interval: Duration::from_millis(1),
            max_task_wait: Duration::from_secs(1),
        },
    );
    gateway.init(modules).await.unwrap();
    (Arc::new(gateway), backend)
}
