//! Per-file processing: check journal, caption, upload, mark

use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;

use crate::caption::{CaptionError, CaptionService, Captioner};
use crate::discover;
use crate::fingerprint::fingerprint;
use crate::journal::Journal;
use crate::upload::{IngestService, UploadError, Uploader};
use crate::Config;

/// Terminal state of one file run through the pipeline.
#[derive(Debug)]
pub enum Outcome {
    /// The journal already has the file's current fingerprint.
    AlreadyProcessed,
    /// The file vanished before it could be handled.
    Missing,
    /// Extension not in the supported set.
    Unsupported,
    /// Captioning failed; nothing recorded.
    CaptionFailed(CaptionError),
    /// Caption generated but upload failed; nothing recorded, caption dropped.
    UploadFailed(UploadError),
    /// Uploaded and recorded in the journal.
    Done { document_id: Option<String> },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AlreadyProcessed | Self::Done { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadyProcessed => "already processed",
            Self::Missing => "missing",
            Self::Unsupported => "unsupported",
            Self::CaptionFailed(_) => "caption failed",
            Self::UploadFailed(_) => "upload failed",
            Self::Done { .. } => "done",
        }
    }
}

/// Progress events emitted during a scan.
#[derive(Debug, Clone)]
pub enum ProgressEvent<'a> {
    /// Files found by the directory walk.
    Found { total: usize },
    /// About to process a specific file.
    Processing {
        current: usize,
        total: usize,
        path: &'a Path,
    },
}

/// Type alias for progress callback.
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send>;

/// Stats from a scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub files_found: usize,
    pub processed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Shutdown was requested before every file was visited.
    pub interrupted: bool,
}

impl ScanStats {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Done { .. } => self.processed += 1,
            Outcome::AlreadyProcessed => self.unchanged += 1,
            _ => self.failed += 1,
        }
    }
}

/// Owns the journal and both service clients; handles one file at a time.
pub struct Pipeline<C, I> {
    journal: Journal,
    captioner: Captioner<C>,
    uploader: Uploader<I>,
    extensions: Vec<String>,
    progress_callback: Option<ProgressCallback>,
    shutdown: Option<Receiver<()>>,
}

impl<C: CaptionService, I: IngestService> Pipeline<C, I> {
    pub fn new(
        journal: Journal,
        captioner: Captioner<C>,
        uploader: Uploader<I>,
        config: &Config,
    ) -> Self {
        Self {
            journal,
            captioner,
            uploader,
            extensions: config.supported_extensions.clone(),
            progress_callback: None,
            shutdown: None,
        }
    }

    /// Stop scans early once a message arrives on `shutdown`.
    ///
    /// The file in progress is always finished first.
    pub fn set_shutdown_signal(&mut self, shutdown: Receiver<()>) {
        self.shutdown = Some(shutdown);
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|rx| rx.try_recv().is_ok())
    }

    /// Set a callback to receive progress updates during scans.
    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress_callback = Some(callback);
    }

    fn emit_progress(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.progress_callback {
            callback(event);
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn captioner(&self) -> &Captioner<C> {
        &self.captioner
    }

    pub fn uploader(&self) -> &Uploader<I> {
        &self.uploader
    }

    /// Run one file through the pipeline.
    ///
    /// Every failure is logged and folded into the returned [`Outcome`].
    pub fn process(&mut self, path: &Path) -> Outcome {
        let path: PathBuf = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let _span = tracing::info_span!("process", path = %path.display()).entered();

        if !path.is_file() {
            tracing::warn!("File no longer exists");
            return Outcome::Missing;
        }

        // Taken once: an edit during captioning must not be recorded as done.
        let key = fingerprint(&path);
        if self.journal.contains(&key) {
            tracing::info!("Already processed, skipping");
            return Outcome::AlreadyProcessed;
        }

        if !discover::is_supported(&path, &self.extensions) {
            tracing::debug!("Unsupported extension");
            return Outcome::Unsupported;
        }

        let description = match self.captioner.caption(&path) {
            Ok(description) => description,
            Err(e) => {
                tracing::error!(error = %e, "Caption generation failed");
                return Outcome::CaptionFailed(e);
            }
        };

        match self.uploader.upload(&path, &description) {
            Ok(document_id) => {
                self.journal.mark_processed_key(key, &path, &description);
                tracing::info!("Processing complete");
                Outcome::Done { document_id }
            }
            Err(e) => {
                tracing::error!(error = %e, "Upload failed, file left unrecorded");
                Outcome::UploadFailed(e)
            }
        }
    }

    /// Process every supported image under `dir`, one after another.
    pub fn scan(&mut self, dir: &Path) -> ScanStats {
        let images = discover::find_images(dir, &self.extensions);
        let total = images.len();
        self.emit_progress(ProgressEvent::Found { total });

        let mut stats = ScanStats {
            files_found: total,
            ..Default::default()
        };

        for (i, path) in images.iter().enumerate() {
            if self.shutdown_requested() {
                tracing::info!(remaining = total - i, "Scan interrupted");
                stats.interrupted = true;
                break;
            }
            self.emit_progress(ProgressEvent::Processing {
                current: i + 1,
                total,
                path,
            });
            let outcome = self.process(path);
            stats.record(&outcome);
        }

        tracing::info!(
            found = stats.files_found,
            processed = stats.processed,
            unchanged = stats.unchanged,
            failed = stats.failed,
            interrupted = stats.interrupted,
            "Scan complete"
        );
        stats
    }
}
