//! capdex-core: caption watched images into a knowledge base
//!
//! This library provides the pieces behind the `capdex` watcher: a journal
//! of processed file states, clients for the captioning and ingestion
//! services sharing one retry primitive, and the per-file processing
//! pipeline fed by a directory scan or a filesystem watcher.

pub mod caption;
pub mod config;
pub mod consts;
pub mod discover;
pub mod fingerprint;
pub mod journal;
pub mod pipeline;
pub mod retry;
pub mod upload;
pub mod watch;

pub use caption::{CaptionError, CaptionService, Captioner, OllamaClient};
pub use config::Config;
pub use consts::*;
pub use journal::Journal;
pub use pipeline::{Outcome, Pipeline, ScanStats};
pub use retry::{AttemptError, RetryError, RetryPolicy};
pub use upload::{Document, IngestService, KnowledgeBaseClient, UploadError, Uploader};
pub use watch::DirectoryWatcher;

#[derive(Debug, thiserror::Error)]
pub enum CapdexError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Service unavailable at {url}: {message}")]
    ServiceUnavailable { url: String, message: String },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CapdexError>;

/// Keep at most `max` characters of `text`.
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
