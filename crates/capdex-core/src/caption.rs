//! Image captioning through the Ollama `/api/generate` endpoint.
//!
//! [`CaptionService`] is a single network attempt; [`Captioner`] adds the
//! decode check, the acceptance rule and the retry policy on top of it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CaptionConfig;
use crate::retry::{AttemptError, RetryError, RetryPolicy};
use crate::Config;

/// Timeout for the startup model listing.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CaptionError {
    /// The file is not a decodable image. Never retried.
    #[error("corrupt image {path}: {message}")]
    CorruptInput { path: PathBuf, message: String },

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Exhausted(#[from] RetryError),
}

/// One captioning request, image already base64 encoded.
#[derive(Debug, Clone)]
pub struct CaptionRequest {
    pub model: String,
    pub prompt: String,
    pub image_base64: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A service that turns an image into text, one attempt per call.
pub trait CaptionService {
    fn generate(&self, request: &CaptionRequest) -> Result<String, AttemptError>;
}

impl<S: CaptionService + ?Sized> CaptionService for &S {
    fn generate(&self, request: &CaptionRequest) -> Result<String, AttemptError> {
        (**self).generate(request)
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [&'a str; 1],
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateReply {
    response: Option<String>,
}

#[derive(Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

/// Blocking client for the Ollama REST API.
pub struct OllamaClient {
    host: String,
    agent: ureq::Agent,
}

impl OllamaClient {
    pub fn new(config: &CaptionConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            host: config.host.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// List the models available on the server (`/api/tags`).
    pub fn probe(&self) -> Result<Vec<String>, AttemptError> {
        let url = format!("{}/api/tags", self.host);
        let reply: TagsReply = self
            .agent
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .call()?
            .into_json()
            .map_err(|e| AttemptError::Unacceptable(format!("invalid tags reply: {e}")))?;

        Ok(reply.models.into_iter().map(|m| m.name).collect())
    }
}

/// Whether `target` is among `models`, with or without a tag suffix.
pub fn has_model(models: &[String], target: &str) -> bool {
    models
        .iter()
        .any(|m| m == target || m.split(':').next() == Some(target))
}

impl CaptionService for OllamaClient {
    fn generate(&self, request: &CaptionRequest) -> Result<String, AttemptError> {
        let url = format!("{}/api/generate", self.host);
        let body = GenerateBody {
            model: request.model.as_str(),
            prompt: request.prompt.as_str(),
            images: [request.image_base64.as_str()],
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        let body = serde_json::to_string(&body)
            .map_err(|e| AttemptError::Transport(format!("JSON serialize error: {e}")))?;

        let reply: GenerateReply = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body)?
            .into_json()
            .map_err(|e| AttemptError::Unacceptable(format!("invalid generate reply: {e}")))?;

        reply
            .response
            .ok_or_else(|| AttemptError::Unacceptable("missing 'response' field".into()))
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("host", &self.host)
            .finish()
    }
}

/// Captioning client: decode check, bounded retries, acceptance rule.
#[derive(Debug)]
pub struct Captioner<S> {
    service: S,
    retry: RetryPolicy,
    model: String,
    prompt: String,
    temperature: f32,
    max_tokens: u32,
    min_description_len: usize,
}

impl<S: CaptionService> Captioner<S> {
    pub fn new(service: S, config: &Config) -> Self {
        Self {
            service,
            retry: RetryPolicy::from_config(config),
            model: config.caption.model.clone(),
            prompt: config.caption.prompt.clone(),
            temperature: config.caption.temperature,
            max_tokens: config.caption.max_tokens,
            min_description_len: config.caption.min_description_len,
        }
    }

    /// Replace the retry policy taken from the config.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Describe the image at `path`.
    pub fn caption(&self, path: &Path) -> Result<String, CaptionError> {
        verify_image(path)?;

        let bytes = std::fs::read(path).map_err(|source| CaptionError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let request = CaptionRequest {
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            image_base64: STANDARD.encode(&bytes),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::info!(path = %path.display(), model = %self.model, "Captioning image");
        let description = self.retry.run("caption", |_| {
            let reply = self.service.generate(&request)?;
            accept_description(&reply, self.min_description_len)
        })?;

        tracing::info!(path = %path.display(), chars = description.chars().count(), "Caption generated");
        Ok(description)
    }
}

/// Fail fast when `path` does not decode as an image.
pub fn verify_image(path: &Path) -> Result<(), CaptionError> {
    let corrupt = |message: String| CaptionError::CorruptInput {
        path: path.to_path_buf(),
        message,
    };

    image::ImageReader::open(path)
        .map_err(|e| corrupt(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| corrupt(e.to_string()))?
        .decode()
        .map_err(|e| corrupt(e.to_string()))?;
    Ok(())
}

/// Trim `reply` and accept it only if it is longer than `min_len` characters.
fn accept_description(reply: &str, min_len: usize) -> Result<String, AttemptError> {
    let description = reply.trim();
    if description.is_empty() {
        return Err(AttemptError::Unacceptable("empty description".into()));
    }
    let len = description.chars().count();
    if len <= min_len {
        return Err(AttemptError::Unacceptable(format!(
            "description too short ({len} <= {min_len} chars)"
        )));
    }
    Ok(description.to_string())
}
