//! CSV import pipeline.
//!
//! Files produced by the exporter are laid out as
//! `<input_dir>/<table>/<chunk>.csv.gz`. The importer decompresses every
//! archive, maps each `.csv` to a destination table through its parent
//! directory name, streams it in with `COPY ... FROM STDIN`, records it in the
//! import progress log and compresses it again. The directory ends up in the
//! same compressed state it started in.
//!
//! Moving a file to another directory silently changes its destination
//! table, so the table is checked for existence before any data is sent.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use postgres::Client;
use tracing::{error, info, warn};

use crate::command::{CommandRunner, Compressor};
use crate::config::{ConnectionConfig, ImportConfig};
use crate::db::{DbError, connect, quote_ident};
use crate::progress::ProgressLog;
use crate::util::collect_files;

const TABLE_EXISTS_QUERY: &str = "SELECT EXISTS (\
     SELECT 1 FROM information_schema.tables \
     WHERE table_name = $1 AND table_schema = ANY(current_schemas(false)))";

/// A file and the table it is loaded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportUnit {
    pub source_path: PathBuf,
    pub table_name: String,
}

impl ImportUnit {
    /// Maps `path` to its destination table, see [`resolve_table_name`].
    pub fn resolve(path: impl Into<PathBuf>) -> Option<Self> {
        let source_path = path.into();
        let table_name = resolve_table_name(&source_path)?;
        Some(Self {
            source_path,
            table_name,
        })
    }

    /// Key recorded in the import progress log: the path relative to `root`
    /// with `/` separators, e.g. `2024/history/a.csv`.
    ///
    /// Paths outside `root` fall back to `<table>/<file name>`.
    pub fn log_key(&self, root: &Path) -> String {
        match self.source_path.strip_prefix(root) {
            Ok(relative) if relative.components().next().is_some() => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            _ => {
                let file_name = self
                    .source_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{}/{}", self.table_name, file_name)
            }
        }
    }
}

/// Name of the directory directly containing `path`.
///
/// `<root>/trends_uint/x.csv` resolves to `trends_uint`.
pub fn resolve_table_name(path: &Path) -> Option<String> {
    path.parent()?
        .file_name()?
        .to_str()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Database side of the import.
pub trait TableSink {
    fn table_exists(&mut self, table: &str) -> Result<bool, DbError>;

    /// Loads CSV with a header line from `input` into `table` and commits.
    ///
    /// Returns the number of rows copied.
    fn copy_into(&mut self, table: &str, input: &mut dyn Read) -> Result<u64, DbError>;
}

impl TableSink for Client {
    fn table_exists(&mut self, table: &str) -> Result<bool, DbError> {
        let row = self
            .query_one(TABLE_EXISTS_QUERY, &[&table])
            .map_err(|e| DbError::query(&e))?;
        Ok(row.get(0))
    }

    fn copy_into(&mut self, table: &str, input: &mut dyn Read) -> Result<u64, DbError> {
        let statement = format!("COPY {} FROM STDIN WITH CSV HEADER", quote_ident(table));

        let mut transaction = self.transaction().map_err(|e| DbError::query(&e))?;
        let mut writer = transaction
            .copy_in(statement.as_str())
            .map_err(|e| DbError::query(&e))?;
        io::copy(input, &mut writer)?;
        let rows = writer.finish().map_err(|e| DbError::query(&e))?;
        transaction.commit().map_err(|e| DbError::query(&e))?;
        Ok(rows)
    }
}

/// Opens a fresh session per imported file.
pub trait Connector {
    type Sink: TableSink;

    fn connect(&self) -> Result<Self::Sink, DbError>;
}

impl Connector for ConnectionConfig {
    type Sink = Client;

    fn connect(&self) -> Result<Client, DbError> {
        connect(self)
    }
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Imported,
    Skipped,
    Failed,
}

/// Per-run counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ImportSummary {
    fn add(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Imported => self.imported += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct Importer<'a, C: Connector + ?Sized, R: CommandRunner + ?Sized> {
    config: &'a ImportConfig,
    connector: &'a C,
    compressor: Compressor<'a, R>,
    progress: ProgressLog,
    imported: HashSet<String>,
}

impl<'a, C: Connector + ?Sized, R: CommandRunner + ?Sized> Importer<'a, C, R> {
    pub fn new(config: &'a ImportConfig, connector: &'a C, runner: &'a R) -> Self {
        Self {
            config,
            connector,
            compressor: Compressor::new(runner, config.compressor.clone()),
            progress: ProgressLog::new(&config.progress_log),
            imported: HashSet::new(),
        }
    }

    /// Decompresses, imports and re-compresses every file under the input
    /// directory. Per-file failures are logged and counted, never propagated.
    pub fn run(mut self, running: &AtomicBool) -> ImportSummary {
        let mut summary = ImportSummary::default();
        let config = self.config;
        let input_dir = &config.input_dir;

        if config.clear_log {
            match self.progress.clear() {
                Ok(()) => info!("Import log {} cleared", self.progress.path().display()),
                Err(e) => error!(
                    "Failed to clear import log {}: {}",
                    self.progress.path().display(),
                    e
                ),
            }
        }
        self.imported = self.progress.load();

        self.decompress_all();

        let files = match collect_files(input_dir, ".csv") {
            Ok(files) => files,
            Err(e) => {
                error!("Failed to scan {}: {}", input_dir.display(), e);
                return summary;
            }
        };
        info!("Found {} CSV files under {}", files.len(), input_dir.display());

        for (index, path) in files.iter().enumerate() {
            if !running.load(Ordering::SeqCst) {
                warn!(
                    "Import interrupted, compressing {} remaining files",
                    files.len() - index
                );
                for remaining in &files[index..] {
                    let _ = self.compressor.compress(remaining);
                }
                break;
            }
            let outcome = match ImportUnit::resolve(path) {
                Some(unit) => self.import_unit(&unit),
                None => {
                    error!("Cannot determine table for {}", path.display());
                    FileOutcome::Failed
                }
            };
            summary.add(outcome);
        }

        summary
    }

    fn decompress_all(&self) {
        let archives = match collect_files(&self.config.input_dir, ".csv.gz") {
            Ok(archives) => archives,
            Err(e) => {
                error!("Failed to scan {}: {}", self.config.input_dir.display(), e);
                return;
            }
        };
        for archive in archives {
            // Failure is logged by the compressor; the archive is left as is.
            let _ = self.compressor.decompress(&archive);
        }
    }

    /// Imports one file unless the import log already lists it.
    pub fn import_unit(&mut self, unit: &ImportUnit) -> FileOutcome {
        let key = unit.log_key(&self.config.input_dir);
        if self.imported.contains(&key) {
            info!("File {} already imported", unit.source_path.display());
            let _ = self.compressor.compress(&unit.source_path);
            return FileOutcome::Skipped;
        }

        match self.copy_unit(unit) {
            Ok(rows) => info!(
                "Imported {} into {} ({} rows)",
                unit.source_path.display(),
                unit.table_name,
                rows
            ),
            Err(e) => {
                error!("Failed to import {}: {}", unit.source_path.display(), e);
                return FileOutcome::Failed;
            }
        }

        if let Err(e) = self.progress.record(&key) {
            error!("Failed to record {} as imported: {}", key, e);
        }
        self.imported.insert(key);

        // Compression only restores the on-disk state; the data is already in.
        let _ = self.compressor.compress(&unit.source_path);
        FileOutcome::Imported
    }

    /// Streams one file over its own connection, closed on return.
    fn copy_unit(&self, unit: &ImportUnit) -> Result<u64, DbError> {
        let mut sink = self.connector.connect()?;
        if !sink.table_exists(&unit.table_name)? {
            return Err(DbError::Query(format!(
                "table \"{}\" does not exist",
                unit.table_name
            )));
        }
        let file = File::open(&unit.source_path)?;
        sink.copy_into(&unit.table_name, &mut BufReader::new(file))
    }
}
