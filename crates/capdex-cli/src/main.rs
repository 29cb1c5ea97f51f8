//! capdex CLI: caption watched images into a knowledge base

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use capdex_core::caption::has_model;
use capdex_core::pipeline::ProgressEvent;
use capdex_core::watch::run_queue;
use capdex_core::{
    CONFIG_FILE, CapdexError, Captioner, Config, DirectoryWatcher, Journal, KnowledgeBaseClient,
    OllamaClient, Pipeline, ScanStats, Uploader,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type ServicePipeline = Pipeline<OllamaClient, KnowledgeBaseClient>;

#[derive(Parser)]
#[command(name = "capdex")]
#[command(about = "Caption new images and upload them to a knowledge base", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the directory, then watch it for new images (default)
    Watch {
        /// Directory to monitor (overrides the config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Process every unprocessed image once and exit
    Scan {
        /// Directory to scan (overrides the config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Test connectivity to the captioning and ingestion services
    Check,

    /// Show configuration and journal statistics
    Status,

    /// Write a default config file
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let _log_guard = init_logging(&config.log_dir);

    match cli.command {
        None => cmd_watch(config, None)?,
        Some(Commands::Watch { dir }) => cmd_watch(config, dir)?,
        Some(Commands::Scan { dir }) => cmd_scan(config, dir)?,
        Some(Commands::Check) => cmd_check(&config),
        Some(Commands::Status) => cmd_status(&cli.config, &config),
        Some(Commands::Init) => cmd_init(&cli.config)?,
    }

    Ok(())
}

/// Console plus daily rolling file. The guard must outlive `main`'s work.
fn init_logging(log_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    let mut log_guard = None;
    let file_layer = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "capdex.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            log_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_filter(env_filter.clone()),
            )
        }
        Err(err) => {
            eprintln!(
                "Warning: failed to create log directory {}: {}",
                log_dir.display(),
                err
            );
            None
        }
    };

    let console_layer = tracing_subscriber::fmt::layer().with_filter(env_filter);
    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    log_guard
}

fn cmd_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Already initialized: {} exists", path.display());
    }

    Config::default().save(path)?;

    println!("Wrote default config to {}", path.display());
    println!("Set ingest.knowledge_base_id and the API key, then run 'capdex watch'.");
    Ok(())
}

/// Validate the config and resolve the monitored directory.
fn prepare(mut config: Config, dir: Option<PathBuf>) -> Result<Config> {
    if let Some(dir) = dir {
        config.monitor_dir = dir;
    }
    config.validate()?;
    config.ensure_monitor_dir()?;
    config.monitor_dir = std::fs::canonicalize(&config.monitor_dir).with_context(|| {
        format!("Cannot resolve monitored directory {}", config.monitor_dir.display())
    })?;
    Ok(config)
}

fn build_pipeline(config: &Config) -> ServicePipeline {
    Pipeline::new(
        Journal::load(&config.journal_path),
        Captioner::new(OllamaClient::new(&config.caption), config),
        Uploader::new(KnowledgeBaseClient::new(&config.ingest), config),
        config,
    )
}

/// The captioning service must answer; a missing model is only a warning.
fn probe_captioning(config: &Config) -> Result<()> {
    let client = OllamaClient::new(&config.caption);
    let models = client
        .probe()
        .map_err(|e| CapdexError::ServiceUnavailable {
            url: client.host().to_string(),
            message: e.to_string(),
        })
        .context("Captioning service must be running before watching. Is Ollama up?")?;

    if has_model(&models, &config.caption.model) {
        tracing::info!(model = %config.caption.model, "Captioning model available");
    } else {
        tracing::warn!(
            model = %config.caption.model,
            available = ?models,
            "Captioning model not found on server"
        );
        println!(
            "Warning: model '{}' not found. Run 'ollama pull {}'.",
            config.caption.model, config.caption.model
        );
    }
    Ok(())
}

fn scan_with_progress(pipeline: &mut ServicePipeline, dir: &Path) -> Result<ScanStats> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message("Scanning for images...");

    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("█▓░");

    pipeline.set_progress_callback(Box::new({
        let pb = pb.clone();
        move |event: ProgressEvent<'_>| match event {
            ProgressEvent::Found { total } => {
                pb.set_style(bar_style.clone());
                pb.set_length(total as u64);
                pb.set_message(format!("{total} images found"));
            }
            ProgressEvent::Processing {
                current, path, ..
            } => {
                pb.set_position(current as u64 - 1);
                pb.set_message(
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                );
            }
        }
    }));

    let stats = pipeline.scan(dir);
    pb.finish_and_clear();

    println!("✓ Scan complete:");
    println!("  Images found:     {}", stats.files_found);
    println!("  Newly processed:  {}", stats.processed);
    println!("  Already done:     {}", stats.unchanged);
    println!("  Failed:           {}", stats.failed);
    if stats.interrupted {
        println!("  Interrupted before every image was visited.");
    }

    Ok(stats)
}

/// Ctrl-C sends one message on the returned channel instead of killing the process.
fn install_shutdown_handler() -> Result<crossbeam_channel::Receiver<()>> {
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(shutdown_rx)
}

fn cmd_watch(config: Config, dir: Option<PathBuf>) -> Result<()> {
    let config = prepare(config, dir)?;
    tracing::info!(dir = %config.monitor_dir.display(), "Starting capdex");

    probe_captioning(&config)?;

    let shutdown = install_shutdown_handler()?;
    let mut pipeline = build_pipeline(&config);
    pipeline.set_shutdown_signal(shutdown.clone());

    // Events arriving during the scan wait in the queue.
    let (watcher, paths) =
        DirectoryWatcher::start(&config.monitor_dir, &config.supported_extensions)?;

    let scanned = scan_with_progress(&mut pipeline, &config.monitor_dir);
    let interrupted = match &scanned {
        Ok(stats) => stats.interrupted,
        Err(_) => true,
    };

    let mut handled = 0;
    let mut vanished = 0;
    if !interrupted {
        println!(
            "Watching {} for new images. Press Ctrl-C to stop.",
            config.monitor_dir.display()
        );

        let stats = run_queue(&paths, &shutdown, config.settle_delay(), |path| {
            let outcome = pipeline.process(path);
            let marker = if outcome.is_success() { "✓" } else { "✗" };
            println!("{marker} {} ({})", path.display(), outcome.label());
        });
        handled = stats.handled;
        vanished = stats.vanished;
    }

    watcher.stop();
    scanned?;
    println!(
        "Stopped. Handled {handled} new file(s), {vanished} vanished before processing."
    );
    Ok(())
}

fn cmd_scan(config: Config, dir: Option<PathBuf>) -> Result<()> {
    let config = prepare(config, dir)?;
    let shutdown = install_shutdown_handler()?;
    let mut pipeline = build_pipeline(&config);
    pipeline.set_shutdown_signal(shutdown);
    let stats = scan_with_progress(&mut pipeline, &config.monitor_dir)?;

    if stats.failed > 0 {
        println!("Failed files stay unrecorded and are retried on the next run.");
    }
    Ok(())
}

fn cmd_check(config: &Config) {
    let ollama = OllamaClient::new(&config.caption);
    println!("Captioning service: {}", ollama.host());
    match ollama.probe() {
        Ok(models) => {
            println!("  ✓ reachable, {} model(s)", models.len());
            let marker = if has_model(&models, &config.caption.model) {
                "✓"
            } else {
                "✗"
            };
            println!("  {marker} model '{}'", config.caption.model);
        }
        Err(e) => println!("  ✗ {e}"),
    }

    let kb = KnowledgeBaseClient::new(&config.ingest);
    println!();
    println!("Ingestion service: {}", kb.datasets_url());
    if config.ingest.api_key.trim().is_empty() {
        println!("  ! no API key configured");
    }
    match kb.probe() {
        Ok((status, body)) => {
            println!("  status: {status}");
            if !body.is_empty() {
                println!("  body:   {body}");
            }
        }
        Err(e) => println!("  ✗ {e}"),
    }
}

fn cmd_status(config_path: &Path, config: &Config) {
    let journal = Journal::load(&config.journal_path);

    println!("Config file: {}", config_path.display());
    println!();
    println!("Configuration:");
    println!("  Monitored dir:  {}", config.monitor_dir.display());
    println!("  Extensions:     {}", config.supported_extensions.join(", "));
    println!("  Caption model:  {} @ {}", config.caption.model, config.caption.host);
    println!(
        "  Knowledge base: {} @ {}{}",
        config.ingest.knowledge_base_id, config.ingest.base_url, config.ingest.api_prefix
    );
    println!(
        "  Retries:        {} attempt(s), {}s apart",
        config.retry.max_attempts, config.retry.delay_secs
    );
    println!();
    println!("Journal: {}", journal.path().display());
    println!("  Files processed: {}", journal.len());

    let latest = journal.entries().max_by_key(|(_, e)| e.processed_time);
    if let Some((_, entry)) = latest {
        println!(
            "  Last processed:  {} at {}",
            entry.path.display(),
            entry.processed_time.to_rfc3339()
        );
    }
}
