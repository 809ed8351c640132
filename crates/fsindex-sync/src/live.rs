//! Applying file system events to the index as they happen.
//!
//! [`LiveWatcher`] runs on its own OS thread with its own runtime and index
//! connection. It shares nothing mutable with the reconciler or the
//! scheduler; the module list it holds is only asked which MIME types it
//! accepts.

use fsindex_core::{Error, FileEvent, IndexBackend, IndexError, Result};
use fsindex_store::{GatewayConfig, IndexGateway};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::document::DocumentBuilder;
use crate::filter::ScanFilter;
use crate::watcher::FileWatcher;

/// Applies single [`FileEvent`]s to the index.
#[derive(Clone)]
pub struct LiveUpdater {
    gateway: Arc<IndexGateway>,
    builder: DocumentBuilder,
    filter: ScanFilter,
}

impl LiveUpdater {
    pub fn new(gateway: Arc<IndexGateway>, builder: DocumentBuilder, filter: ScanFilter) -> Self {
        Self {
            gateway,
            builder,
            filter,
        }
    }

    /// Apply one event. Failures are logged, never returned.
    ///
    /// Writes are enqueued without waiting for the index to apply them.
    pub async fn handle(&self, event: FileEvent) {
        debug!("Received file event: {:?}", event);
        match event {
            FileEvent::Created(path) => {
                self.index_file(&path).await;
            }
            FileEvent::Modified(path) => {
                self.remove(&path).await;
                self.index_file(&path).await;
            }
            FileEvent::Deleted(path) => {
                self.remove(&path).await;
            }
            FileEvent::Renamed { from, to } => {
                self.remove(&from).await;
                self.remove(&to).await;
                self.index_file(&to).await;
            }
        }
    }

    async fn index_file(&self, path: &Path) {
        if self.filter.is_excluded(path) {
            debug!("Skipping excluded path {:?}", path);
            return;
        }

        let builder = self.builder.clone();
        let owned = path.to_path_buf();
        let built = tokio::task::spawn_blocking(move || builder.build(&owned, &HashMap::new())).await;

        let document = match built {
            Ok(Ok(built)) => built.document,
            Ok(Err(e)) => {
                warn!("Failed to build document for {:?}: {}", path, e);
                return;
            }
            Err(e) => {
                error!("Document build task failed for {:?}: {}", path, e);
                return;
            }
        };

        match self.gateway.upsert_batch(vec![document], false).await {
            Ok(()) => info!("Indexed {:?}", path),
            Err(e) => error!("Failed to index {:?}: {}", path, e),
        }
    }

    async fn remove(&self, path: &Path) {
        let id = match self.gateway.mapper().id_from_file_path(path) {
            Ok(id) => id,
            Err(e) => {
                warn!("Ignoring event for {:?}: {}", path, e);
                return;
            }
        };
        match self.gateway.delete_one(&id, false).await {
            Ok(()) => debug!("Removed {:?} from the index", path),
            Err(e) => error!("Failed to delete {:?}: {}", path, e),
        }
    }
}

/// Settings for [`LiveWatcher::spawn`].
#[derive(Debug, Clone)]
pub struct LiveWatcherConfig {
    pub debounce: Duration,
    pub gateway: GatewayConfig,
    /// Capacity of the event queue between the watcher and the updater
    pub queue_capacity: usize,
}

impl Default for LiveWatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            gateway: GatewayConfig::default(),
            queue_capacity: 1024,
        }
    }
}

/// Handle to a running live watcher thread.
pub struct LiveWatcher {
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl LiveWatcher {
    /// Start watching the builder's root on a dedicated thread.
    ///
    /// `connect` runs on that thread and opens the watcher's own index
    /// connection. Returns once the watch is in place, or with the error
    /// that prevented it.
    pub fn spawn<F>(
        config: LiveWatcherConfig,
        builder: DocumentBuilder,
        filter: ScanFilter,
        connect: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<Arc<dyn IndexBackend>, IndexError> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let token = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("fsindex-live".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::Io(e)));
                        return;
                    }
                };
                runtime.block_on(watch_loop(config, builder, filter, connect, token, ready_tx));
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Other("live watcher thread exited during startup".to_string()))
            }
        }
    }

    /// Token that stops the watcher when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop watching and wait for the thread to finish.
    pub fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Live watcher thread panicked");
            }
        }
    }
}

impl Drop for LiveWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn watch_loop<F>(
    config: LiveWatcherConfig,
    builder: DocumentBuilder,
    filter: ScanFilter,
    connect: F,
    shutdown: CancellationToken,
    ready: std::sync::mpsc::Sender<Result<()>>,
) where
    F: FnOnce() -> std::result::Result<Arc<dyn IndexBackend>, IndexError>,
{
    let backend = match connect() {
        Ok(backend) => backend,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };
    let root: PathBuf = builder.mapper().root().to_path_buf();
    let gateway = IndexGateway::new(backend, Arc::clone(builder.mapper()), config.gateway);
    let updater = LiveUpdater::new(Arc::new(gateway), builder, filter);

    let (event_tx, mut event_rx) = mpsc::channel(config.queue_capacity.max(1));
    let mut watcher = match FileWatcher::new(event_tx, config.debounce) {
        Ok(watcher) => watcher,
        Err(e) => {
            let _ = ready.send(Err(Error::Other(format!("watcher error: {e}"))));
            return;
        }
    };
    if let Err(e) = watcher.watch(&root) {
        let _ = ready.send(Err(Error::Other(format!("watch error: {e}"))));
        return;
    }
    let _ = ready.send(Ok(()));
    info!("Watching {:?} for changes", root);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = event_rx.recv() => match event {
                Some(event) => updater.handle(event).await,
                None => break,
            },
        }
    }

    if let Err(e) = watcher.unwatch(&root) {
        debug!("Failed to unwatch {:?}: {}", root, e);
    }
    info!("Live watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_gateway, ExtensionMime, StubModule};
    use fsindex_core::{EnrichmentModule, PathMapper};
    use fsindex_store::MemoryBackend;
    use tempfile::tempdir;

    async fn updater(root: &Path, exclude: &[String]) -> (LiveUpdater, MemoryBackend) {
        let modules: Vec<Arc<dyn EnrichmentModule>> =
            vec![Arc::new(StubModule::new("text", "text/"))];
        let (gateway, backend) = memory_gateway(root, &modules).await;
        let builder = DocumentBuilder::new(
            Arc::new(PathMapper::new(root, "files.example.org")),
            modules,
            Arc::new(ExtensionMime),
        );
        let filter = ScanFilter::new(root, exclude).unwrap();
        (LiveUpdater::new(gateway, builder, filter), backend)
    }

    fn id(root: &Path, path: &Path) -> String {
        PathMapper::new(root, "files.example.org")
            .id_from_file_path(path)
            .unwrap()
    }

    #[tokio::test]
    async fn test_created_file_is_indexed_pending() {
        let dir = tempdir().unwrap();
        let (updater, backend) = updater(dir.path(), &[]).await;
        let path = dir.path().join("new.txt");
        std::fs::write(&path, "hello").unwrap();

        updater.handle(FileEvent::Created(path.clone())).await;

        let doc = backend.document(&id(dir.path(), &path)).await.unwrap();
        assert_eq!(doc["name"], "new.txt");
        assert_eq!(doc["type"], "text/plain");
        assert_eq!(doc["text_version"], 0);
    }

    #[tokio::test]
    async fn test_modified_file_drops_enrichment() {
        let dir = tempdir().unwrap();
        let (updater, backend) = updater(dir.path(), &[]).await;
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "v1").unwrap();
        updater.handle(FileEvent::Created(path.clone())).await;

        let doc_id = id(dir.path(), &path);
        let mut enriched = fsindex_core::Fields::new();
        enriched.insert("id".to_string(), doc_id.clone().into());
        enriched.insert("text_data".to_string(), "old".into());
        enriched.insert("text_version".to_string(), 1.into());
        updater.gateway.upsert_fields(enriched, true).await.unwrap();

        std::fs::write(&path, "version two").unwrap();
        updater.handle(FileEvent::Modified(path.clone())).await;

        let doc = backend.document(&doc_id).await.unwrap();
        assert_eq!(doc["size"], 11);
        assert_eq!(doc["text_version"], 0);
        assert!(doc.get("text_data").is_none());
    }

    #[tokio::test]
    async fn test_deleted_file_is_removed() {
        let dir = tempdir().unwrap();
        let (updater, backend) = updater(dir.path(), &[]).await;
        let path = dir.path().join("gone.txt");
        std::fs::write(&path, "x").unwrap();
        updater.handle(FileEvent::Created(path.clone())).await;
        std::fs::remove_file(&path).unwrap();

        updater.handle(FileEvent::Deleted(path.clone())).await;

        assert!(backend.document(&id(dir.path(), &path)).await.is_none());
        assert!(backend.documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_rename_moves_document() {
        let dir = tempdir().unwrap();
        let (updater, backend) = updater(dir.path(), &[]).await;
        let from = dir.path().join("a.txt");
        let to = dir.path().join("b.txt");
        std::fs::write(&from, "x").unwrap();
        updater.handle(FileEvent::Created(from.clone())).await;
        std::fs::rename(&from, &to).unwrap();

        updater
            .handle(FileEvent::Renamed {
                from: from.clone(),
                to: to.clone(),
            })
            .await;

        assert!(backend.document(&id(dir.path(), &from)).await.is_none());
        let doc = backend.document(&id(dir.path(), &to)).await.unwrap();
        assert_eq!(doc["url"], "https://files.example.org/b.txt");
        assert_eq!(backend.documents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_excluded_path_is_not_indexed() {
        let dir = tempdir().unwrap();
        let (updater, backend) = updater(dir.path(), &["*.tmp".to_string()]).await;
        let path = dir.path().join("scratch.tmp");
        std::fs::write(&path, "x").unwrap();

        updater.handle(FileEvent::Created(path)).await;

        assert!(backend.documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_file_is_logged_not_propagated() {
        let dir = tempdir().unwrap();
        let (updater, backend) = updater(dir.path(), &[]).await;

        updater
            .handle(FileEvent::Created(dir.path().join("never.txt")))
            .await;
        updater
            .handle(FileEvent::Deleted(PathBuf::from("/elsewhere/x.txt")))
            .await;

        assert!(backend.documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_index_failure_is_logged_not_propagated() {
        let dir = tempdir().unwrap();
        let (updater, backend) = updater(dir.path(), &[]).await;
        backend.fail_next_writes(1).await;
        let path = dir.path().join("x.txt");
        std::fs::write(&path, "x").unwrap();

        updater.handle(FileEvent::Created(path.clone())).await;
        updater.handle(FileEvent::Created(path.clone())).await;

        assert!(backend.document(&id(dir.path(), &path)).await.is_some());
    }

    #[test]
    fn test_spawn_reports_connect_failure() {
        let dir = tempdir().unwrap();
        let builder = DocumentBuilder::new(
            Arc::new(PathMapper::new(dir.path(), "files.example.org")),
            Vec::new(),
            Arc::new(ExtensionMime),
        );

        let result = LiveWatcher::spawn(
            LiveWatcherConfig::default(),
            builder,
            ScanFilter::allow_all(dir.path()),
            || Err(IndexError::Request("connection refused".to_string())),
        );

        assert!(matches!(result, Err(Error::Index(IndexError::Request(_)))));
    }

    #[test]
    fn test_spawn_and_stop() {
        let dir = tempdir().unwrap();
        let builder = DocumentBuilder::new(
            Arc::new(PathMapper::new(dir.path(), "files.example.org")),
            Vec::new(),
            Arc::new(ExtensionMime),
        );
        let backend = MemoryBackend::new("files");

        let watcher = LiveWatcher::spawn(
            LiveWatcherConfig {
                debounce: Duration::from_millis(50),
                ..Default::default()
            },
            builder,
            ScanFilter::allow_all(dir.path()),
            move || Ok(Arc::new(backend) as Arc<dyn IndexBackend>),
        )
        .unwrap();

        watcher.stop();
    }
}
