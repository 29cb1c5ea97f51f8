//! Discovery module: find supported images under the monitored directory

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

/// Check if a file has one of the supported extensions (case-insensitive).
pub fn is_supported(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// Recursively list supported images under `dir`, sorted by path.
///
/// Hidden files are included and ignore files are not consulted: every
/// image dropped into the directory counts.
pub fn find_images(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(dir).standard_filters(false).build();

    let mut images: Vec<PathBuf> = walker
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| is_supported(path, extensions))
        .collect();

    images.sort();
    images
}
