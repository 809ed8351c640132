//! Audio and video transcription through an OpenAI-compatible server.
//!
//! Files are posted to `/v1/audio/transcriptions` with
//! `response_format=verbose_json` and `stream=true`. Segments are read off
//! the server-sent event stream as they are transcribed, and every group of
//! segments is yielded as a field map carrying the transcript so far, so a
//! long recording checkpoints before the server has finished with it.
//! Servers that ignore `stream` answer with one JSON document, which is
//! split into the same checkpoints.

use async_stream::try_stream;
use async_trait::async_trait;
use fsindex_core::{EnrichmentModule, FieldStream, Fields, ModuleError};
use futures::Stream;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::registry::ModuleSettings;

pub const WHISPER_VERSION: u64 = 1;

/// Segments per written checkpoint.
const SEGMENTS_PER_CHECKPOINT: usize = 100;

const DEFAULT_MODEL: &str = "whisper-1";

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

/// One transcribed segment; streamed events carry the same shape.
#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
}

/// A parsed server-sent event line.
#[derive(Debug)]
enum Event {
    Segment(Segment),
    Done,
}

/// Cumulative transcript, emitting a checkpoint every `every` segments.
#[derive(Debug, Default)]
struct Transcript {
    text: String,
    language: Option<String>,
    pending: usize,
    emitted: bool,
}

impl Transcript {
    fn push(&mut self, segment: Segment) {
        if self.language.is_none() {
            self.language = segment.language;
        }
        self.pending += 1;
        let text = segment.text.trim();
        if text.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(text);
    }

    fn checkpoint(&mut self, every: usize) -> Option<Fields> {
        (self.pending >= every.max(1)).then(|| self.emit())
    }

    /// The last map: whatever is left, or the empty transcript if nothing was
    /// ever emitted.
    fn finish(&mut self) -> Option<Fields> {
        (self.pending > 0 || !self.emitted).then(|| self.emit())
    }

    fn emit(&mut self) -> Fields {
        self.pending = 0;
        self.emitted = true;
        let mut fields = Fields::new();
        fields.insert("transcript".to_string(), Value::String(self.text.clone()));
        fields.insert(
            "language".to_string(),
            self.language.clone().map_or(Value::Null, Value::String),
        );
        fields
    }
}

/// Parse one line of a `text/event-stream` body.
fn parse_event(line: &str) -> Result<Option<Event>, ModuleError> {
    let Some(data) = line.trim_end().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(Event::Done));
    }
    serde_json::from_str(data)
        .map(|segment| Some(Event::Segment(segment)))
        .map_err(|e| ModuleError::Failed(format!("transcription event unreadable: {e}")))
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

/// Whisper enrichment module.
pub struct WhisperModule {
    client: Client,
    base_url: String,
    model: String,
    max_workers: usize,
    checkpoint_every: usize,
    ready: AtomicBool,
}

impl WhisperModule {
    pub fn new(settings: &ModuleSettings) -> Result<Self, ModuleError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ModuleError::Init(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_workers: settings.max_workers.max(1),
            checkpoint_every: SEGMENTS_PER_CHECKPOINT,
            ready: AtomicBool::new(false),
        })
    }

    fn ensure_ready(&self) -> Result<(), ModuleError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ModuleError::NotInitialized(self.name().to_string()))
        }
    }

    async fn request(&self, path: &Path) -> Result<Response, ModuleError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        debug!("Transcribing {:?} ({} bytes)", path, bytes.len());

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("stream", "true");

        self.client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .multipart(form)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| ModuleError::Failed(format!("transcription request failed: {e}")))
    }

    fn stream<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Stream<Item = Result<Fields, ModuleError>> + Send + 'a {
        try_stream! {
            self.ensure_ready()?;
            let mut response = self.request(path).await?;
            let mut transcript = Transcript::default();

            if is_event_stream(&response) {
                let mut buffer: Vec<u8> = Vec::new();
                let mut done = false;
                while !done {
                    let chunk = response
                        .chunk()
                        .await
                        .map_err(|e| ModuleError::Failed(format!("transcription stream interrupted: {e}")))?;
                    let Some(chunk) = chunk else { break };
                    buffer.extend_from_slice(&chunk);

                    while let Some(end) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=end).collect();
                        match parse_event(&String::from_utf8_lossy(&line))? {
                            Some(Event::Segment(segment)) => {
                                transcript.push(segment);
                                if let Some(fields) = transcript.checkpoint(self.checkpoint_every) {
                                    yield fields;
                                }
                            }
                            Some(Event::Done) => {
                                done = true;
                                break;
                            }
                            None => {}
                        }
                    }
                }
            } else {
                let body = response
                    .json::<Transcription>()
                    .await
                    .map_err(|e| ModuleError::Failed(format!("transcription response unreadable: {e}")))?;
                transcript.language = body.language;
                if body.segments.is_empty() {
                    transcript.push(Segment { text: body.text, language: None });
                }
                for segment in body.segments {
                    transcript.push(segment);
                    if let Some(fields) = transcript.checkpoint(self.checkpoint_every) {
                        yield fields;
                    }
                }
            }

            if let Some(fields) = transcript.finish() {
                yield fields;
            }
        }
    }
}

#[async_trait]
impl EnrichmentModule for WhisperModule {
    fn name(&self) -> &str {
        "whisper"
    }

    fn field_name(&self) -> &str {
        "whisper_version"
    }

    fn version(&self) -> u64 {
        WHISPER_VERSION
    }

    fn data_field_names(&self) -> &[&str] {
        &["transcript", "language"]
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn supports(&self, mime_type: &str) -> bool {
        mime_type.starts_with("audio/") || mime_type.starts_with("video/")
    }

    async fn init(&self) -> Result<(), ModuleError> {
        // Not every OpenAI-compatible server has /health; any answer will do.
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModuleError::Init(format!("whisper server unavailable: {e}")))?;
        debug!("Whisper health check answered {}", response.status());

        info!("Whisper server ready, model {}", self.model);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), ModuleError> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn produce_fields<'a>(&'a self, path: &'a Path, _current: &'a Fields) -> FieldStream<'a> {
        Box::pin(self.stream(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn module_at(url: &str, model: Option<&str>) -> WhisperModule {
        WhisperModule::new(&ModuleSettings {
            url: url.to_string(),
            max_workers: 1,
            request_timeout: Duration::from_secs(5),
            model: model.map(ToString::to_string),
        })
        .unwrap()
    }

    fn module(model: Option<&str>) -> WhisperModule {
        module_at("http://127.0.0.1:1/", model)
    }

    fn ready_module(url: &str, checkpoint_every: usize) -> WhisperModule {
        let mut whisper = module_at(url, None);
        whisper.checkpoint_every = checkpoint_every;
        whisper.ready.store(true, Ordering::SeqCst);
        whisper
    }

    async fn local_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Read one HTTP request, headers and body.
    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok());
            let complete = match length {
                Some(length) => request.len() >= end + 4 + length,
                None if head.contains("transfer-encoding: chunked") => {
                    request.ends_with(b"0\r\n\r\n")
                }
                None => true,
            };
            if complete {
                return;
            }
        }
    }

    /// Answer a single request with `response`.
    async fn serve_once(listener: TcpListener, response: &'static [u8]) {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket.write_all(response).await.unwrap();
    }

    fn audio_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("talk.mp3");
        std::fs::write(&path, b"ID3 fake audio").unwrap();
        path
    }

    fn transcript_of(segments: &[&str], every: usize) -> Vec<Fields> {
        let mut transcript = Transcript::default();
        let mut maps = Vec::new();
        for text in segments {
            transcript.push(Segment {
                text: (*text).to_string(),
                language: None,
            });
            maps.extend(transcript.checkpoint(every));
        }
        maps.extend(transcript.finish());
        maps
    }

    #[test]
    fn test_identity() {
        let whisper = module(None);
        assert_eq!(whisper.name(), "whisper");
        assert_eq!(whisper.field_name(), "whisper_version");
        assert_eq!(whisper.data_field_names(), &["transcript", "language"]);
        assert_eq!(whisper.model, DEFAULT_MODEL);
        assert_eq!(module(Some("large-v3")).model, "large-v3");
    }

    #[test]
    fn test_supports_audio_and_video_only() {
        let whisper = module(None);
        assert!(whisper.supports("audio/mpeg"));
        assert!(whisper.supports("audio/x-wav"));
        assert!(whisper.supports("video/mp4"));
        assert!(!whisper.supports("text/plain"));
        assert!(!whisper.supports("application/pdf"));
    }

    #[test]
    fn test_checkpoints_are_cumulative() {
        let maps = transcript_of(&[" one", " two", " three"], 2);
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[0]["transcript"], "one two");
        assert_eq!(maps[1]["transcript"], "one two three");
    }

    #[test]
    fn test_checkpoints_skip_blank_segments() {
        let maps = transcript_of(&["a", "  ", "b"], 10);
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0]["transcript"], "a b");
        assert!(maps[0]["language"].is_null());
    }

    #[test]
    fn test_empty_recording_still_yields_a_map() {
        let maps = transcript_of(&[], 10);
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0]["transcript"], "");
    }

    #[test]
    fn test_parse_event_lines() {
        assert!(matches!(
            parse_event("data: {\"text\": \" hi\", \"language\": \"en\"}\r\n").unwrap(),
            Some(Event::Segment(Segment { ref text, .. })) if text == " hi"
        ));
        assert!(matches!(parse_event("data: [DONE]\n").unwrap(), Some(Event::Done)));
        assert!(parse_event("\n").unwrap().is_none());
        assert!(parse_event(": keep-alive\n").unwrap().is_none());
        assert!(parse_event("data: not json\n").is_err());
    }

    #[tokio::test]
    async fn test_streamed_segments_checkpoint_as_they_arrive() {
        let (listener, url) = local_server().await;
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            socket
                .write_all(b"data: {\"text\": \" one\", \"language\": \"en\"}\n\ndata: {\"text\": \" two\"}\n\n")
                .await
                .unwrap();
            released.await.unwrap();
            socket
                .write_all(b"data: {\"text\": \" three\"}\n\ndata: [DONE]\n\n")
                .await
                .unwrap();
        });

        let dir = tempdir().unwrap();
        let audio = audio_file(&dir);
        let whisper = ready_module(&url, 2);
        let current = Fields::new();
        let mut stream = whisper.produce_fields(&audio, &current);

        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("first checkpoint waited for the whole recording")
            .unwrap()
            .unwrap();
        assert_eq!(first["transcript"], "one two");
        assert_eq!(first["language"], "en");

        release.send(()).unwrap();
        let last = stream.next().await.unwrap().unwrap();
        assert_eq!(last["transcript"], "one two three");
        assert!(stream.next().await.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_json_answer_is_split_into_checkpoints() {
        let (listener, url) = local_server().await;
        let body: &'static [u8] = b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nconnection: close\r\n\r\n\
{\"text\": \"one two three\", \"language\": \"en\", \"segments\": [{\"text\": \" one\"}, {\"text\": \" two\"}, {\"text\": \" three\"}]}";
        let server = tokio::spawn(serve_once(listener, body));

        let dir = tempdir().unwrap();
        let audio = audio_file(&dir);
        let whisper = ready_module(&url, 2);
        let current = Fields::new();
        let maps: Vec<Fields> = whisper
            .produce_fields(&audio, &current)
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(maps.len(), 2);
        assert_eq!(maps[0]["transcript"], "one two");
        assert_eq!(maps[1]["transcript"], "one two three");
        assert_eq!(maps[1]["language"], "en");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_json_answer_without_segments() {
        let (listener, url) = local_server().await;
        let body: &'static [u8] = b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nconnection: close\r\n\r\n\
{\"text\": \"  short clip  \"}";
        let server = tokio::spawn(serve_once(listener, body));

        let dir = tempdir().unwrap();
        let audio = audio_file(&dir);
        let whisper = ready_module(&url, 100);
        let current = Fields::new();
        let maps: Vec<Fields> = whisper
            .produce_fields(&audio, &current)
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0]["transcript"], "short clip");
        assert!(maps[0]["language"].is_null());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_init_accepts_server_without_health_route() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(serve_once(
            listener,
            b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ));

        let whisper = module_at(&url, None);
        whisper.init().await.unwrap();
        assert!(whisper.ensure_ready().is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_produce_before_init_fails() {
        let whisper = module(None);
        let current = Fields::new();
        let mut stream = whisper.produce_fields(Path::new("/nonexistent.mp3"), &current);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(ModuleError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn test_init_fails_when_server_unreachable() {
        let whisper = module(None);
        assert!(matches!(whisper.init().await, Err(ModuleError::Init(_))));
    }
}
