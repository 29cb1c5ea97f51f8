//! Journal of fully processed files, stored as one JSON document

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::fingerprint::fingerprint;
use crate::{DESCRIPTION_EXCERPT_LEN, Result, excerpt};

/// A file whose description was generated and uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Absolute path at time of processing
    pub path: PathBuf,
    /// When processing completed
    pub processed_time: DateTime<Utc>,
    /// Leading part of the description, for diagnostics
    pub description: String,
}

/// Fingerprint -> entry map, rewritten to disk after every insert.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    entries: HashMap<String, JournalEntry>,
}

impl Journal {
    /// Load the journal at `path`.
    ///
    /// A missing or unreadable journal yields an empty one.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = if path.exists() {
            match read_entries(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to load journal, starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Journal loaded");
        Self { path, entries }
    }

    /// Whether the file's current state has already been processed.
    pub fn is_processed(&self, file: &Path) -> bool {
        self.contains(&fingerprint(file))
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Record the file's current state as processed and persist the journal.
    pub fn mark_processed(&mut self, file: &Path, description: &str) {
        self.mark_processed_key(fingerprint(file), file, description);
    }

    /// Record `file` under a fingerprint taken earlier and persist the journal.
    ///
    /// The key must be the one the file had when it was captioned, so edits
    /// made while processing stay unrecorded. A failed write is logged; the
    /// entry stays in memory and the file may be processed again on the next
    /// run.
    pub fn mark_processed_key(&mut self, key: String, file: &Path, description: &str) {
        let path = std::path::absolute(file).unwrap_or_else(|_| file.to_path_buf());
        self.entries.insert(
            key,
            JournalEntry {
                path,
                processed_time: Utc::now(),
                description: excerpt(description, DESCRIPTION_EXCERPT_LEN),
            },
        );

        if let Err(e) = self.save() {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to persist journal");
        }
    }

    /// Write the whole journal to disk.
    ///
    /// The previous file is replaced only once the new one is fully written.
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.entries)?;
        replace_file(&self.path, |file| file.write_all(content.as_bytes()))
    }

    /// Entry recorded under `fingerprint`.
    pub fn get(&self, fingerprint: &str) -> Option<&JournalEntry> {
        self.entries.get(fingerprint)
    }

    /// All entries keyed by fingerprint, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &JournalEntry)> {
        self.entries.iter()
    }

    /// Number of recorded file states.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write a sibling temp file with `write`, then rename it over `path`.
///
/// On any failure `path` keeps its old content and the temp file is removed.
fn replace_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> std::io::Result<()>,
{
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    write(&mut tmp)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_entries(path: &Path) -> Result<HashMap<String, JournalEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
