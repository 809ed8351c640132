//! Error types for fsindex.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for fsindex operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Index backend or gateway failure
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Enrichment module failure
    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    /// Document construction failure
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Index backend errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with an error status.
    #[error("backend returned {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// An asynchronous task reached the `failed` or `canceled` state.
    #[error("task {uid} failed: {reason}")]
    TaskFailed { uid: u64, reason: String },

    /// An asynchronous task was still pending after the maximum wait.
    #[error("task {uid} still pending after {waited:?}")]
    TaskTimeout { uid: u64, waited: Duration },

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Enrichment module errors.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("module used before init: {0}")]
    NotInitialized(String),

    #[error("processing failed: {0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while mapping paths or building documents.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("path is outside the indexed root: {0:?}")]
    OutsideRoot(PathBuf),

    #[error("url does not belong to the public domain: {0}")]
    ForeignUrl(String),

    #[error("not a regular file: {0:?}")]
    NotAFile(PathBuf),

    #[error("cannot stat {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mime detection failed for {path:?}: {source}")]
    Mime {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for fsindex operations.
pub type Result<T> = std::result::Result<T, Error>;
