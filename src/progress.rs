//! Append-only progress log.
//!
//! Plain text, one record per line, no header. A record is written only after
//! the unit it names has been fully processed, so the log never claims more
//! than was done. Each `record` call opens, appends and closes the file on its
//! own; a crash mid-run keeps every record confirmed before it.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::error;

#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every recorded name.
    ///
    /// A missing log yields an empty set. Read failures are logged and also
    /// yield an empty set: losing history means re-exporting, which is
    /// preferred to aborting the run.
    pub fn load(&self) -> HashSet<String> {
        match self.try_load() {
            Ok(set) => set,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                error!(
                    "Failed to load progress log {}: {}",
                    self.path.display(),
                    e
                );
                HashSet::new()
            }
        }
    }

    fn try_load(&self) -> io::Result<HashSet<String>> {
        let file = File::open(&self.path)?;
        let mut set = HashSet::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let name = line.trim();
            if !name.is_empty() {
                set.insert(name.to_string());
            }
        }
        Ok(set)
    }

    /// Appends one record.
    pub fn record(&self, name: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(format!("{}\n", name).as_bytes())?;
        file.sync_data()
    }

    /// Truncates the log to empty, creating it if needed.
    pub fn clear(&self) -> io::Result<()> {
        File::create(&self.path).map(|_| ())
    }
}
