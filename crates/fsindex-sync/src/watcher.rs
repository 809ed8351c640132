//! File system watcher for detecting changes.

use fsindex_core::FileEvent;
use notify_debouncer_full::notify::event::{
    CreateKind, MetadataKind, ModifyKind, RemoveKind, RenameMode,
};
use notify_debouncer_full::notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{
    new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache,
};
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, warn};

/// File system watcher with debouncing.
pub struct FileWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl FileWatcher {
    /// Create a new file watcher.
    pub fn new(
        event_tx: tokio_mpsc::Sender<FileEvent>,
        debounce_duration: Duration,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();

        // Spawn thread to convert events
        std::thread::spawn(move || {
            while let Ok(result) = rx.recv() {
                if !forward_debounced_events(result, &event_tx) {
                    break;
                }
            }
        });

        let debouncer = new_debouncer(debounce_duration, None, move |result| {
            let _ = tx.send(result);
        })?;

        Ok(Self { debouncer })
    }

    /// Start watching a path.
    pub fn watch(&mut self, path: &Path) -> Result<(), notify::Error> {
        debug!("Starting to watch: {:?}", path);
        self.debouncer.watch(path, RecursiveMode::Recursive)
    }

    /// Stop watching a path.
    pub fn unwatch(&mut self, path: &Path) -> Result<(), notify::Error> {
        debug!("Stopping watch: {:?}", path);
        self.debouncer.unwatch(path)
    }
}

/// Returns `false` once the receiving side is gone.
fn forward_debounced_events(
    result: DebounceEventResult,
    event_tx: &tokio_mpsc::Sender<FileEvent>,
) -> bool {
    match result {
        Ok(events) => {
            for event in events {
                if let Some(file_event) = convert_event(&event) {
                    // Use blocking send since we're in a std thread
                    if event_tx.blocking_send(file_event).is_err() {
                        warn!("Event channel closed");
                        return false;
                    }
                }
            }
        }
        Err(errors) => {
            for error in errors {
                error!("Watch error: {error}");
            }
        }
    }
    true
}

/// Map a debounced notify event onto a [`FileEvent`].
///
/// Directory events are dropped; a moved or removed directory is picked up
/// by the next reconciliation.
fn convert_event(event: &DebouncedEvent) -> Option<FileEvent> {
    let path = event.paths.first()?.clone();

    match &event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => None,
        EventKind::Create(_) if path.is_dir() => None,
        EventKind::Create(_) => Some(FileEvent::Created(path)),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let to = event.paths.get(1)?.clone();
            if to.is_dir() {
                return None;
            }
            Some(FileEvent::Renamed { from: path, to })
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FileEvent::Deleted(path)),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) if path.is_dir() => None,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileEvent::Created(path)),
        // Backends that cannot tell the two halves apart (macOS FSEvents)
        // report `Any`; whether the path still exists decides the side.
        EventKind::Modify(ModifyKind::Name(_)) if path.is_dir() => None,
        EventKind::Modify(ModifyKind::Name(_)) if path.exists() => Some(FileEvent::Created(path)),
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileEvent::Deleted(path)),

        EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
            | MetadataKind::Ownership
            | MetadataKind::Extended
            | MetadataKind::AccessTime,
        )) => None,
        EventKind::Modify(_) if path.is_dir() => None,
        EventKind::Modify(_) => Some(FileEvent::Modified(path)),

        EventKind::Remove(_) => Some(FileEvent::Deleted(path)),
        _ => None,
    }
}
