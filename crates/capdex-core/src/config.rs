//! Configuration handling for capdex.json

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    API_KEY_ENV, CapdexError, DEFAULT_CAPTION_MODEL, DEFAULT_CAPTION_PROMPT,
    DEFAULT_CAPTION_TIMEOUT_SECS, DEFAULT_EXTENSIONS, DEFAULT_INDEXING_TECHNIQUE,
    DEFAULT_INGEST_API_PREFIX, DEFAULT_INGEST_BASE_URL, DEFAULT_INGEST_TIMEOUT_SECS,
    DEFAULT_JOURNAL_FILE, DEFAULT_LOG_DIR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_TOKENS,
    DEFAULT_MIN_DESCRIPTION_LEN, DEFAULT_MONITOR_DIR, DEFAULT_OLLAMA_HOST,
    DEFAULT_RETRY_DELAY_SECS, DEFAULT_SETTLE_DELAY_SECS, DEFAULT_TEMPERATURE, Result,
};

/// Configuration stored in capdex.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory watched for new images
    #[serde(default = "default_monitor_dir")]
    pub monitor_dir: PathBuf,

    /// Image extensions to process (without the dot, case-insensitive)
    #[serde(default = "default_extensions")]
    pub supported_extensions: Vec<String>,

    /// Journal of processed files
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,

    /// Directory for rolling log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Seconds to wait after a watch event before processing the file
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    #[serde(default)]
    pub caption: CaptionConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Image captioning service (Ollama) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,

    #[serde(default = "default_caption_model")]
    pub model: String,

    #[serde(default = "default_caption_prompt")]
    pub prompt: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Descriptions must be longer than this many characters
    #[serde(default = "default_min_description_len")]
    pub min_description_len: usize,

    #[serde(default = "default_caption_timeout_secs")]
    pub timeout_secs: u64,
}

/// Knowledge base ingestion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_base_url")]
    pub base_url: String,

    #[serde(default = "default_ingest_api_prefix")]
    pub api_prefix: String,

    /// Bearer token; `CAPDEX_INGEST_API_KEY` takes precedence when set
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub knowledge_base_id: String,

    #[serde(default = "default_indexing_technique")]
    pub indexing_technique: String,

    #[serde(default = "default_ingest_timeout_secs")]
    pub timeout_secs: u64,
}

/// Retry settings shared by both service clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
}

fn default_monitor_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MONITOR_DIR)
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_journal_path() -> PathBuf {
    PathBuf::from(DEFAULT_JOURNAL_FILE)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_settle_delay_secs() -> u64 {
    DEFAULT_SETTLE_DELAY_SECS
}

fn default_ollama_host() -> String {
    DEFAULT_OLLAMA_HOST.to_string()
}

fn default_caption_model() -> String {
    DEFAULT_CAPTION_MODEL.to_string()
}

fn default_caption_prompt() -> String {
    DEFAULT_CAPTION_PROMPT.to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_min_description_len() -> usize {
    DEFAULT_MIN_DESCRIPTION_LEN
}

fn default_caption_timeout_secs() -> u64 {
    DEFAULT_CAPTION_TIMEOUT_SECS
}

fn default_ingest_base_url() -> String {
    DEFAULT_INGEST_BASE_URL.to_string()
}

fn default_ingest_api_prefix() -> String {
    DEFAULT_INGEST_API_PREFIX.to_string()
}

fn default_indexing_technique() -> String {
    DEFAULT_INDEXING_TECHNIQUE.to_string()
}

fn default_ingest_timeout_secs() -> u64 {
    DEFAULT_INGEST_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor_dir: default_monitor_dir(),
            supported_extensions: default_extensions(),
            journal_path: default_journal_path(),
            log_dir: default_log_dir(),
            settle_delay_secs: default_settle_delay_secs(),
            caption: CaptionConfig::default(),
            ingest: IngestConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_caption_model(),
            prompt: default_caption_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            min_description_len: default_min_description_len(),
            timeout_secs: default_caption_timeout_secs(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: default_ingest_base_url(),
            api_prefix: default_ingest_api_prefix(),
            api_key: String::new(),
            knowledge_base_id: String::new(),
            indexing_technique: default_indexing_technique(),
            timeout_secs: default_ingest_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults when the file is absent.
    ///
    /// The API key environment override is applied after parsing.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                CapdexError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                CapdexError::Config(format!("invalid config {}: {e}", path.display()))
            })?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.ingest.api_key = key.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Save config to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(CapdexError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.supported_extensions.is_empty() {
            return Err(CapdexError::Config(
                "supported_extensions must not be empty".to_string(),
            ));
        }
        if self.caption.model.trim().is_empty() {
            return Err(CapdexError::Config("caption.model must be set".to_string()));
        }
        Ok(())
    }

    /// Create the monitored directory if it does not exist yet.
    pub fn ensure_monitor_dir(&self) -> Result<()> {
        if self.monitor_dir.is_dir() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.monitor_dir).map_err(|e| {
            CapdexError::Config(format!(
                "cannot create monitored directory {}: {e}",
                self.monitor_dir.display()
            ))
        })?;
        tracing::info!(dir = %self.monitor_dir.display(), "Created monitored directory");
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry.delay_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}
