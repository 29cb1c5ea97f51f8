//! Filesystem watching: notify events are reduced to image paths and queued
//! on a channel that a single consumer drains.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, select, unbounded};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::{Result, discover};

/// Paths in `event` that may be a newly arrived file.
///
/// Created files and rename destinations qualify; everything else
/// (modifications, removals, access) is ignored.
pub fn candidate_paths(event: &Event) -> Vec<PathBuf> {
    let paths = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.clone(),
        // Source first, destination last.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        _ => Vec::new(),
    };
    paths.into_iter().filter(|p| !p.is_dir()).collect()
}

/// A recursive watcher on the monitored directory.
///
/// The notify callback only enqueues paths; dropping the watcher stops the
/// backend thread.
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl DirectoryWatcher {
    /// Start watching `dir`; supported image paths arrive on the returned receiver.
    pub fn start(dir: &Path, extensions: &[String]) -> Result<(Self, Receiver<PathBuf>)> {
        let (tx, rx) = unbounded();
        let extensions = extensions.to_vec();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in candidate_paths(&event) {
                    if !discover::is_supported(&path, &extensions) {
                        continue;
                    }
                    tracing::debug!(path = %path.display(), kind = ?event.kind, "Queued file event");
                    if tx.send(path).is_err() {
                        tracing::trace!("Queue consumer gone, dropping event");
                    }
                }
            }
            Err(err) => tracing::error!(error = %err, "Watch error"),
        })?;
        watcher.watch(dir, RecursiveMode::Recursive)?;
        tracing::info!(dir = %dir.display(), "Watching directory");

        Ok((
            Self {
                watcher,
                dir: dir.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop watching and release the backend.
    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.dir) {
            tracing::debug!(error = %e, "Unwatch failed");
        }
        drop(self.watcher);
        tracing::info!(dir = %self.dir.display(), "Watcher stopped");
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("dir", &self.dir)
            .finish()
    }
}

/// Counts from a queue run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub handled: usize,
    /// Queued paths that no longer existed when their turn came.
    pub vanished: usize,
}

/// Drain `paths` one at a time until `shutdown` fires.
///
/// Each path waits `settle` first, so the writer can finish, and is dropped
/// if the file is gone by then. Also returns when either channel disconnects.
pub fn run_queue<F>(
    paths: &Receiver<PathBuf>,
    shutdown: &Receiver<()>,
    settle: Duration,
    mut handler: F,
) -> QueueStats
where
    F: FnMut(&Path),
{
    let mut stats = QueueStats::default();
    loop {
        select! {
            recv(shutdown) -> _ => {
                tracing::info!("Shutdown requested");
                break;
            }
            recv(paths) -> msg => match msg {
                Ok(path) => {
                    if !settle.is_zero() {
                        std::thread::sleep(settle);
                    }
                    if !path.is_file() {
                        tracing::debug!(path = %path.display(), "Queued file vanished");
                        stats.vanished += 1;
                        continue;
                    }
                    handler(&path);
                    stats.handled += 1;
                }
                Err(_) => {
                    tracing::info!("Event source closed");
                    break;
                }
            }
        }
    }
    stats
}
