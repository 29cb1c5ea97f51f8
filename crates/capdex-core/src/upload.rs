//! Upload of image descriptions as knowledge base documents

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::IngestConfig;
use crate::retry::{AttemptError, RetryError, RetryPolicy};
use crate::{Config, ERROR_BODY_EXCERPT_LEN, excerpt};

/// Statuses the ingestion endpoint uses for a created document.
const ACCEPTED_STATUSES: [u16; 3] = [200, 201, 202];

/// Timeout for the connectivity check.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("refusing to upload an empty description for {0}")]
    EmptyDescription(String),

    #[error(transparent)]
    Exhausted(#[from] RetryError),
}

/// Text document body sent to the ingestion service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub name: String,
    pub text: String,
    pub indexing_technique: String,
}

impl Document {
    pub fn new(
        path: &Path,
        description: &str,
        processed_at: DateTime<Utc>,
        indexing_technique: &str,
    ) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let full_path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        let text = format!(
            "file_name: {name}\nfull_path: {}\ndescription: {description}\nprocessed_at: {}",
            full_path.display(),
            processed_at.to_rfc3339(),
        );

        Self {
            name,
            text,
            indexing_technique: indexing_technique.to_string(),
        }
    }
}

/// A document ingestion service, one attempt per call.
///
/// Returns the document id when the service reports one.
pub trait IngestService {
    fn create_document(&self, document: &Document) -> Result<Option<String>, AttemptError>;
}

impl<S: IngestService + ?Sized> IngestService for &S {
    fn create_document(&self, document: &Document) -> Result<Option<String>, AttemptError> {
        (**self).create_document(document)
    }
}

/// Blocking client for the knowledge base "create document by text" API.
pub struct KnowledgeBaseClient {
    api_base: String,
    api_key: String,
    knowledge_base_id: String,
    agent: ureq::Agent,
}

impl KnowledgeBaseClient {
    pub fn new(config: &IngestConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            api_base: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.api_prefix.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            knowledge_base_id: config.knowledge_base_id.clone(),
            agent,
        }
    }

    /// Endpoint documents are posted to.
    pub fn create_url(&self) -> String {
        format!(
            "{}/datasets/{}/document/create_by_text",
            self.api_base, self.knowledge_base_id
        )
    }

    /// Endpoint used for the connectivity check.
    pub fn datasets_url(&self) -> String {
        format!("{}/datasets", self.api_base)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key.trim())
    }

    /// List datasets once and report the status with a body excerpt.
    ///
    /// Only a transport failure is an error; any HTTP status is reported.
    pub fn probe(&self) -> Result<(u16, String), AttemptError> {
        let result = self
            .agent
            .get(&self.datasets_url())
            .set("Authorization", &self.bearer())
            .timeout(PROBE_TIMEOUT)
            .call();

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(err.into()),
        };
        let status = response.status();
        let body = response.into_string().unwrap_or_default();
        Ok((status, excerpt(body.trim(), ERROR_BODY_EXCERPT_LEN)))
    }
}

impl IngestService for KnowledgeBaseClient {
    fn create_document(&self, document: &Document) -> Result<Option<String>, AttemptError> {
        let body = serde_json::to_string(document)
            .map_err(|e| AttemptError::Transport(format!("JSON serialize error: {e}")))?;

        let response = self
            .agent
            .post(&self.create_url())
            .set("Authorization", &self.bearer())
            .set("Content-Type", "application/json")
            .send_string(&body)?;

        let status = response.status();
        let body = response.into_string().unwrap_or_default();
        if !ACCEPTED_STATUSES.contains(&status) {
            return Err(AttemptError::Unacceptable(format!(
                "status {status}: {}",
                excerpt(body.trim(), ERROR_BODY_EXCERPT_LEN)
            )));
        }

        Ok(document_id(&body))
    }
}

impl std::fmt::Debug for KnowledgeBaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBaseClient")
            .field("api_base", &self.api_base)
            .field("knowledge_base_id", &self.knowledge_base_id)
            .finish()
    }
}

/// Pull the document id out of a create reply (`id` or `document.id`).
fn document_id(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json["id"]
        .as_str()
        .or_else(|| json["document"]["id"].as_str())
        .map(|s| s.to_string())
}

/// Upload client: document building plus the shared retry policy.
#[derive(Debug)]
pub struct Uploader<S> {
    service: S,
    retry: RetryPolicy,
    indexing_technique: String,
}

impl<S: IngestService> Uploader<S> {
    pub fn new(service: S, config: &Config) -> Self {
        Self {
            service,
            retry: RetryPolicy::from_config(config),
            indexing_technique: config.ingest.indexing_technique.clone(),
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

    /// Upload `description` for the image at `path`.
    pub fn upload(&self, path: &Path, description: &str) -> Result<Option<String>, UploadError> {
        if description.trim().is_empty() {
            return Err(UploadError::EmptyDescription(path.display().to_string()));
        }

        let document = Document::new(path, description, Utc::now(), &self.indexing_technique);
        tracing::info!(name = %document.name, "Uploading description");

        let id = self
            .retry
            .run("upload", |_| self.service.create_document(&document))?;

        tracing::info!(
            name = %document.name,
            document_id = id.as_deref().unwrap_or("unknown"),
            "Upload succeeded"
        );
        Ok(id)
    }
}
