//! End-to-end pipeline behaviour with stubbed services.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use capdex_core::caption::CaptionRequest;
use capdex_core::fingerprint::fingerprint_parts;
use capdex_core::{
    AttemptError, CaptionService, Captioner, Config, Document, IngestService, Journal, Outcome,
    Pipeline, RetryPolicy, Uploader,
};
use crossbeam_channel::bounded;

const CAPTION: &str = "a red bicycle leaning against a brick wall";

struct StubCaption {
    reply: Result<String, AttemptError>,
    calls: Cell<u32>,
}

impl StubCaption {
    fn ok(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: Cell::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            reply: Err(AttemptError::Transport("connection refused".into())),
            calls: Cell::new(0),
        }
    }
}

impl CaptionService for StubCaption {
    fn generate(&self, _request: &CaptionRequest) -> Result<String, AttemptError> {
        self.calls.set(self.calls.get() + 1);
        self.reply.clone()
    }
}

struct StubIngest {
    accept: bool,
    documents: RefCell<Vec<Document>>,
}

impl StubIngest {
    fn accepting() -> Self {
        Self {
            accept: true,
            documents: RefCell::new(Vec::new()),
        }
    }

    fn rejecting() -> Self {
        Self {
            accept: false,
            documents: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.documents.borrow().len()
    }
}

impl IngestService for StubIngest {
    fn create_document(&self, document: &Document) -> Result<Option<String>, AttemptError> {
        self.documents.borrow_mut().push(document.clone());
        if self.accept {
            Ok(Some("doc-1".into()))
        } else {
            Err(AttemptError::Unacceptable("status 500: internal error".into()))
        }
    }
}

/// Overwrites the image while its caption is being generated.
struct EditingCaption {
    target: PathBuf,
    calls: Cell<u32>,
}

impl CaptionService for EditingCaption {
    fn generate(&self, _request: &CaptionRequest) -> Result<String, AttemptError> {
        self.calls.set(self.calls.get() + 1);
        if self.calls.get() == 1 {
            image::RgbImage::from_pixel(16, 16, image::Rgb([9, 90, 9]))
                .save(&self.target)
                .unwrap();
            let file = std::fs::File::options()
                .write(true)
                .open(&self.target)
                .unwrap();
            file.set_modified(SystemTime::now() + Duration::from_secs(120))
                .unwrap();
        }
        Ok(CAPTION.to_string())
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            monitor_dir: dir.path().join("images"),
            journal_path: dir.path().join("processed_files.json"),
            ..Config::default()
        };
        std::fs::create_dir_all(&config.monitor_dir).unwrap();
        Self { dir, config }
    }

    fn image(&self, name: &str, shade: u8) -> PathBuf {
        let path = self.config.monitor_dir.join(name);
        image::RgbImage::from_pixel(16, 16, image::Rgb([shade, 40, 40]))
            .save(&path)
            .unwrap();
        path
    }

    fn pipeline<'a>(
        &self,
        caption: &'a StubCaption,
        ingest: &'a StubIngest,
        delay: Duration,
    ) -> Pipeline<&'a StubCaption, &'a StubIngest> {
        let retry = RetryPolicy::new(3, delay);
        Pipeline::new(
            Journal::load(&self.config.journal_path),
            Captioner::new(caption, &self.config).with_retry(retry),
            Uploader::new(ingest, &self.config).with_retry(retry),
            &self.config,
        )
    }
}

fn expected_key(path: &Path) -> String {
    let meta = std::fs::metadata(path).unwrap();
    let mtime = meta
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    fingerprint_parts(path, mtime, meta.len())
}

#[test]
fn new_image_is_captioned_uploaded_and_recorded() {
    let fx = Fixture::new();
    let image = fx.image("a.jpg", 200);
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);

    let outcome = pipeline.process(&image);

    assert!(matches!(outcome, Outcome::Done { ref document_id } if document_id.as_deref() == Some("doc-1")));
    assert!(outcome.is_success());
    assert_eq!(caption.calls.get(), 1);
    assert_eq!(ingest.calls(), 1);

    let journal = pipeline.journal();
    assert_eq!(journal.len(), 1);
    let entry = journal.get(&expected_key(&image)).unwrap();
    assert_eq!(entry.description, CAPTION);
    assert_eq!(entry.path, image);

    let document = &ingest.documents.borrow()[0];
    assert_eq!(document.name, "a.jpg");
    assert!(document.text.contains(CAPTION));

    // Persisted immediately.
    let reloaded = Journal::load(&fx.config.journal_path);
    assert!(reloaded.is_processed(&image));
}

#[test]
fn unchanged_image_short_circuits() {
    let fx = Fixture::new();
    let image = fx.image("a.jpg", 200);
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);

    assert!(matches!(pipeline.process(&image), Outcome::Done { .. }));
    let second = pipeline.process(&image);

    assert!(matches!(second, Outcome::AlreadyProcessed));
    assert!(second.is_success());
    assert_eq!(caption.calls.get(), 1);
    assert_eq!(ingest.calls(), 1);
}

#[test]
fn journal_survives_restart() {
    let fx = Fixture::new();
    let image = fx.image("a.jpg", 200);
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();

    {
        let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);
        pipeline.process(&image);
    }
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);
    assert!(matches!(pipeline.process(&image), Outcome::AlreadyProcessed));
    assert_eq!(caption.calls.get(), 1);
}

#[test]
fn edited_image_is_reprocessed() {
    let fx = Fixture::new();
    let image = fx.image("a.jpg", 200);
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);
    pipeline.process(&image);

    let rewritten = fx.image("a.jpg", 10);
    let file = std::fs::File::options().write(true).open(&rewritten).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(120))
        .unwrap();
    drop(file);

    assert!(!pipeline.journal().is_processed(&image));
    assert!(matches!(pipeline.process(&image), Outcome::Done { .. }));
    assert_eq!(caption.calls.get(), 2);
    assert_eq!(pipeline.journal().len(), 2);
}

#[test]
fn caption_failure_leaves_journal_untouched() {
    let fx = Fixture::new();
    let image = fx.image("a.jpg", 200);
    let caption = StubCaption::failing();
    let ingest = StubIngest::accepting();
    let delay = Duration::from_millis(20);
    let mut pipeline = fx.pipeline(&caption, &ingest, delay);

    let start = Instant::now();
    let outcome = pipeline.process(&image);
    let elapsed = start.elapsed();

    assert!(matches!(outcome, Outcome::CaptionFailed(_)));
    assert!(!outcome.is_success());
    assert_eq!(caption.calls.get(), 3);
    assert!(elapsed >= delay * 2);
    assert_eq!(ingest.calls(), 0);
    assert!(pipeline.journal().is_empty());
    assert!(!fx.config.journal_path.exists());
}

#[test]
fn upload_failure_records_nothing() {
    let fx = Fixture::new();
    let image = fx.image("a.jpg", 200);
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::rejecting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);

    let outcome = pipeline.process(&image);

    assert!(matches!(outcome, Outcome::UploadFailed(_)));
    assert_eq!(caption.calls.get(), 1);
    assert_eq!(ingest.calls(), 3);
    assert!(pipeline.journal().is_empty());
    assert!(!pipeline.journal().is_processed(&image));

    // The next attempt captions again from scratch.
    pipeline.process(&image);
    assert_eq!(caption.calls.get(), 2);
}

#[test]
fn corrupt_image_fails_without_network() {
    let fx = Fixture::new();
    let image = fx.config.monitor_dir.join("broken.png");
    std::fs::write(&image, b"\x89PNG truncated").unwrap();
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);

    assert!(matches!(pipeline.process(&image), Outcome::CaptionFailed(_)));
    assert_eq!(caption.calls.get(), 0);
    assert_eq!(ingest.calls(), 0);
}

#[test]
fn missing_and_unsupported_files() {
    let fx = Fixture::new();
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);

    let missing = fx.config.monitor_dir.join("gone.jpg");
    assert!(matches!(pipeline.process(&missing), Outcome::Missing));

    let text = fx.dir.path().join("notes.txt");
    std::fs::write(&text, "hello").unwrap();
    assert!(matches!(pipeline.process(&text), Outcome::Unsupported));

    assert_eq!(caption.calls.get(), 0);
}

#[test]
fn scan_counts_outcomes() {
    let fx = Fixture::new();
    let first = fx.image("a.jpg", 1);
    fx.image("b.png", 2);
    std::fs::create_dir_all(fx.config.monitor_dir.join("sub")).unwrap();
    fx.image("sub/c.bmp", 3);
    std::fs::write(fx.config.monitor_dir.join("broken.gif"), b"nope").unwrap();
    std::fs::write(fx.config.monitor_dir.join("readme.txt"), b"skip").unwrap();

    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);
    pipeline.process(&first);

    let stats = pipeline.scan(&fx.config.monitor_dir);

    assert_eq!(stats.files_found, 4);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(pipeline.journal().len(), 3);
}

#[test]
fn edit_during_captioning_is_not_recorded() {
    let fx = Fixture::new();
    let image = fx.image("a.png", 200);
    let original_key = expected_key(&image);
    let caption = EditingCaption {
        target: image.clone(),
        calls: Cell::new(0),
    };
    let ingest = StubIngest::accepting();
    let mut pipeline = Pipeline::new(
        Journal::load(&fx.config.journal_path),
        Captioner::new(&caption, &fx.config).with_retry(RetryPolicy::new(3, Duration::ZERO)),
        Uploader::new(&ingest, &fx.config).with_retry(RetryPolicy::new(3, Duration::ZERO)),
        &fx.config,
    );

    assert!(matches!(pipeline.process(&image), Outcome::Done { .. }));
    assert!(pipeline.journal().contains(&original_key));
    assert!(!pipeline.journal().is_processed(&image));

    // The edited content still gets its own caption.
    let second = pipeline.process(&image);
    assert!(!matches!(second, Outcome::AlreadyProcessed));
    assert_eq!(caption.calls.get(), 2);
}

#[test]
fn shutdown_stops_scan_before_next_file() {
    let fx = Fixture::new();
    fx.image("a.jpg", 1);
    fx.image("b.jpg", 2);
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    shutdown_tx.send(()).unwrap();
    pipeline.set_shutdown_signal(shutdown_rx);

    let stats = pipeline.scan(&fx.config.monitor_dir);

    assert!(stats.interrupted);
    assert_eq!(stats.files_found, 2);
    assert_eq!(stats.processed, 0);
    assert_eq!(caption.calls.get(), 0);
    assert!(pipeline.journal().is_empty());
}

#[test]
fn scan_without_shutdown_runs_to_completion() {
    let fx = Fixture::new();
    fx.image("a.jpg", 1);
    let caption = StubCaption::ok(CAPTION);
    let ingest = StubIngest::accepting();
    let mut pipeline = fx.pipeline(&caption, &ingest, Duration::ZERO);

    let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);
    pipeline.set_shutdown_signal(shutdown_rx);

    let stats = pipeline.scan(&fx.config.monitor_dir);
    assert!(!stats.interrupted);
    assert_eq!(stats.processed, 1);
}
