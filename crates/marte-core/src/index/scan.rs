//! Recursive directory enumeration with canonical-path dedup, so files
//! reached through a symlinked directory are never indexed twice, and
//! symlink cycles are bounded by a visited set.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

pub const SOURCE_EXTENSION: &str = "marte";

#[derive(Debug, Clone)]
pub struct ScanError {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for ScanError {}

/// The outcome of a scan: every distinct source file found, plus any I/O
/// errors encountered — the scan keeps going after an error rather than
/// aborting (spec.md §7: "aggregated ... but do not prevent indexing
/// already-read files").
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<PathBuf>,
    pub errors: Vec<ScanError>,
}

pub fn scan_directory(root: &Path) -> ScanResult {
    let mut result = ScanResult::default();
    let mut seen_canonical = HashSet::new();
    let mut visited_dirs = HashSet::new();
    scan_inner(root, &mut result, &mut seen_canonical, &mut visited_dirs);
    result
}

fn scan_inner(
    dir: &Path,
    result: &mut ScanResult,
    seen_canonical: &mut HashSet<PathBuf>,
    visited_dirs: &mut HashSet<PathBuf>,
) {
    let canonical_dir = match dir.canonicalize() {
        Ok(c) => c,
        Err(err) => {
            result.errors.push(ScanError { path: dir.to_path_buf(), message: err.to_string() });
            return;
        }
    };
    if !visited_dirs.insert(canonical_dir) {
        return; // cycle guard
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            result.errors.push(ScanError { path: dir.to_path_buf(), message: err.to_string() });
            return;
        }
    };

    let mut children = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => children.push(entry.path()),
            Err(err) => result.errors.push(ScanError { path: dir.to_path_buf(), message: err.to_string() }),
        }
    }
    children.sort();

    for path in children {
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(err) => {
                result.errors.push(ScanError { path: path.clone(), message: err.to_string() });
                continue;
            }
        };
        if metadata.is_dir() {
            scan_inner(&path, result, seen_canonical, visited_dirs);
        } else if metadata.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            match path.canonicalize() {
                Ok(canonical) => {
                    if seen_canonical.insert(canonical) {
                        result.files.push(path);
                    }
                }
                Err(err) => result.errors.push(ScanError { path, message: err.to_string() }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_source_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.marte"), "A = 1").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.marte"), "B = 1").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "x").unwrap();

        let result = scan_directory(dir.path());
        assert!(result.errors.is_empty());
        assert_eq!(result.files.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn deduplicates_symlinked_directory_contents() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        std::fs::write(real.join("a.marte"), "A = 1").unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();

        let result = scan_directory(dir.path());
        assert!(result.errors.is_empty());
        assert_eq!(result.files.len(), 1, "expected exactly one contribution, got {:?}", result.files);
    }
}
