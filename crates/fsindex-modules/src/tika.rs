//! Content extraction through an Apache Tika server.
//!
//! Files are sent with `PUT /tika` and `Accept: text/plain`; the plain-text
//! rendering is stored in the `text` field.

use async_stream::try_stream;
use async_trait::async_trait;
use fsindex_core::{EnrichmentModule, FieldStream, Fields, ModuleError};
use futures::Stream;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::registry::ModuleSettings;

/// Bump when extraction output changes so every document is re-extracted.
pub const TIKA_VERSION: u64 = 1;

const SUPPORTED_PREFIXES: &[&str] = &[
    "text/",
    "application/vnd.openxmlformats-officedocument.",
    "application/vnd.oasis.opendocument.",
    "application/vnd.ms-",
];

const SUPPORTED_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/rtf",
    "application/epub+zip",
    "application/xhtml+xml",
    "application/xml",
    "application/json",
];

/// Tika enrichment module.
pub struct TikaModule {
    client: Client,
    base_url: String,
    max_workers: usize,
    ready: AtomicBool,
}

impl TikaModule {
    pub fn new(settings: &ModuleSettings) -> Result<Self, ModuleError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ModuleError::Init(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            max_workers: settings.max_workers.max(1),
            ready: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl EnrichmentModule for TikaModule {
    fn name(&self) -> &str {
        "tika"
    }

    fn field_name(&self) -> &str {
        "tika_version"
    }

    fn version(&self) -> u64 {
        TIKA_VERSION
    }

    fn data_field_names(&self) -> &[&str] {
        &["text"]
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn supports(&self, mime_type: &str) -> bool {
        SUPPORTED_TYPES.contains(&mime_type)
            || SUPPORTED_PREFIXES
                .iter()
                .any(|prefix| mime_type.starts_with(prefix))
    }

    async fn init(&self) -> Result<(), ModuleError> {
        let url = format!("{}/version", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModuleError::Init(format!("tika server unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ModuleError::Init(format!(
                "tika server answered {}",
                response.status()
            )));
        }

        let version = response.text().await.unwrap_or_default();
        info!("Connected to {}", version.trim());
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), ModuleError> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn produce_fields<'a>(&'a self, path: &'a Path, _current: &'a Fields) -> FieldStream<'a> {
        Box::pin(self.extract(path))
    }
}

impl TikaModule {
    fn ensure_ready(&self) -> Result<(), ModuleError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ModuleError::NotInitialized(self.name().to_string()))
        }
    }

    fn extract<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Stream<Item = Result<Fields, ModuleError>> + Send + 'a {
        try_stream! {
            self.ensure_ready()?;

            let bytes = tokio::fs::read(path).await?;
            debug!("Sending {} bytes of {:?} to tika", bytes.len(), path);

            let response = self
                .client
                .put(format!("{}/tika", self.base_url))
                .header(ACCEPT, "text/plain")
                .body(bytes)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| ModuleError::Failed(format!("tika request failed: {e}")))?;

            let text = response
                .text()
                .await
                .map_err(|e| ModuleError::Failed(format!("tika response unreadable: {e}")))?;

            let mut fields = Fields::new();
            fields.insert("text".to_string(), Value::String(text.trim().to_string()));
            yield fields;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use tempfile::tempdir;

    fn module(url: &str) -> TikaModule {
        TikaModule::new(&ModuleSettings {
            url: url.to_string(),
            max_workers: 4,
            request_timeout: Duration::from_secs(2),
            model: None,
        })
        .unwrap()
    }

    #[test]
    fn test_identity() {
        let tika = module("http://tika:9998/");
        assert_eq!(tika.name(), "tika");
        assert_eq!(tika.field_name(), "tika_version");
        assert_eq!(tika.version(), TIKA_VERSION);
        assert_eq!(tika.data_field_names(), &["text"]);
        assert_eq!(tika.max_workers(), 4);
        assert_eq!(tika.base_url, "http://tika:9998");
    }

    #[test]
    fn test_supported_types() {
        let tika = module("http://tika:9998");
        assert!(tika.supports("text/plain"));
        assert!(tika.supports("text/markdown"));
        assert!(tika.supports("application/pdf"));
        assert!(tika.supports(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        ));
        assert!(tika.supports("application/vnd.oasis.opendocument.text"));
        assert!(tika.supports("application/epub+zip"));
    }

    #[test]
    fn test_unsupported_types() {
        let tika = module("http://tika:9998");
        assert!(!tika.supports("audio/mpeg"));
        assert!(!tika.supports("video/mp4"));
        assert!(!tika.supports("image/png"));
        assert!(!tika.supports("application/octet-stream"));
    }

    #[test]
    fn test_zero_workers_clamped() {
        let tika = TikaModule::new(&ModuleSettings {
            url: "http://tika:9998".to_string(),
            max_workers: 0,
            request_timeout: Duration::from_secs(2),
            model: None,
        })
        .unwrap();
        assert_eq!(tika.max_workers(), 1);
    }

    #[tokio::test]
    async fn test_produce_before_init_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();

        let tika = module("http://127.0.0.1:1");
        let current = Fields::new();
        let mut stream = tika.produce_fields(&path, &current);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(ModuleError::NotInitialized(_))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_init_fails_when_server_unreachable() {
        let tika = module("http://127.0.0.1:1");
        let err = tika.init().await.unwrap_err();
        assert!(matches!(err, ModuleError::Init(_)));
    }
}
