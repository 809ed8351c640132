//! MIME type detection for files on disk.

use fsindex_core::MimeDetector;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Fallback for files nothing else recognizes.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Bytes read from the head of a file when sniffing.
const SNIFF_LEN: usize = 8192;

/// Leading-byte signatures.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF8", "image/gif"),
    (b"ID3", "audio/mpeg"),
    (b"OggS", "audio/ogg"),
    (b"fLaC", "audio/flac"),
    (b"\x1aE\xdf\xa3", "video/x-matroska"),
    (b"PK\x03\x04", ZIP),
];

const ZIP: &str = "application/zip";
const TEXT: &str = "text/plain";

/// Content sniffing, refined by the file extension when the content only
/// yields a generic type.
#[derive(Debug, Clone, Copy, Default)]
pub struct SniffingMimeDetector;

impl SniffingMimeDetector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MimeDetector for SniffingMimeDetector {
    fn detect(&self, path: &Path) -> std::io::Result<String> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;
        let sniffed = sniff(&head);

        let guessed = mime_guess::from_path(path).first_raw();
        let refined = match (sniffed, guessed) {
            (OCTET_STREAM, Some(guess)) => guess,
            // Source files share extensions with media containers (.ts)
            (TEXT, Some(guess)) if is_textual(guess) => guess,
            // Office documents, epub and jar are zip containers
            (ZIP, Some(guess)) if guess.starts_with("application/") => guess,
            _ => sniffed,
        };
        Ok(refined.to_string())
    }
}

fn is_textual(mime: &str) -> bool {
    mime.starts_with("text/")
        || ["json", "xml", "javascript", "yaml", "toml", "x-sh"]
            .iter()
            .any(|suffix| mime.ends_with(suffix))
}

/// Classify a file by its leading bytes.
fn sniff(head: &[u8]) -> &'static str {
    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
        return *mime;
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" {
        match &head[8..12] {
            b"WAVE" => return "audio/x-wav",
            b"AVI " => return "video/x-msvideo",
            _ => {}
        }
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return if &head[8..11] == b"M4A" {
            "audio/mp4"
        } else {
            "video/mp4"
        };
    }
    if !head.is_empty() && looks_like_text(head) {
        return TEXT;
    }
    OCTET_STREAM
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off at the sniff boundary
        Err(e) => e.error_len().is_none() && head.len() - e.valid_up_to() < 4,
    }
}
