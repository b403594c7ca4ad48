//! Recursive file listing and removal under an output root.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, info};

/// Lists every file under `root` (recursively) whose name ends with `suffix`.
///
/// Results are sorted. A missing `root` yields an empty list.
pub fn collect_files(root: &Path, suffix: &str) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    match walk(root, suffix, &mut found) {
        Err(e) if e.kind() == io::ErrorKind::NotFound && !root.exists() => {}
        other => other?,
    }
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, suffix: &str, found: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(&path, suffix, found)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix))
        {
            found.push(path);
        }
    }
    Ok(())
}

/// Removes every file under `root` whose name ends with one of `suffixes`.
///
/// Individual removal failures are logged and skipped. Returns the number of
/// files removed.
pub fn remove_files(root: &Path, suffixes: &[&str]) -> io::Result<usize> {
    let mut removed = 0;
    for suffix in suffixes {
        for path in collect_files(root, suffix)? {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed {}", path.display());
                    removed += 1;
                }
                Err(e) => error!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
    Ok(removed)
}
