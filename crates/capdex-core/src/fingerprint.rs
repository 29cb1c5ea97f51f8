//! File fingerprints: the journal key for a file's current state

use std::path::Path;
use std::time::UNIX_EPOCH;

/// Fingerprint of `path` as it is on disk right now.
///
/// Combines the path with its modification time and size, so an edited file
/// at the same path gets a new fingerprint. When the file cannot be stat'ed
/// the path string alone is hashed.
pub fn fingerprint(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            fingerprint_parts(path, mtime, meta.len())
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Cannot stat file, hashing path only");
            path_fingerprint(path)
        }
    }
}

/// Fingerprint from explicit parts (mtime in nanoseconds since the epoch).
pub fn fingerprint_parts(path: &Path, mtime_nanos: u128, size: u64) -> String {
    let key = format!("{}|{}|{}", path.display(), mtime_nanos, size);
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// Fallback fingerprint for files without readable metadata.
pub fn path_fingerprint(path: &Path) -> String {
    blake3::hash(path.to_string_lossy().as_bytes())
        .to_hex()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_stable_for_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(fingerprint(&path), fingerprint(&path));
    }

    #[test]
    fn test_changes_with_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"abc").unwrap();
        let before = fingerprint(&path);

        fs::write(&path, b"abcdef").unwrap();
        assert_ne!(before, fingerprint(&path));
    }

    #[test]
    fn test_changes_with_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"abc").unwrap();
        let before = fingerprint(&path);

        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        assert_ne!(before, fingerprint(&path));
    }

    #[test]
    fn test_missing_file_hashes_path() {
        let path = Path::new("/definitely/not/here.png");
        assert_eq!(fingerprint(path), path_fingerprint(path));
    }

    #[test]
    fn test_parts_distinguish_fields() {
        let path = Path::new("/img/a.jpg");
        assert_ne!(
            fingerprint_parts(path, 1, 2048),
            fingerprint_parts(path, 2, 2048)
        );
        assert_ne!(
            fingerprint_parts(path, 1, 2048),
            fingerprint_parts(path, 1, 2049)
        );
    }
}
