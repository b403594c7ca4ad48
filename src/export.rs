//! Chunk export pipeline.
//!
//! For every configured hypertable, chunks are discovered page by page and
//! each one not yet in the progress log is streamed with `COPY ... TO STDOUT`
//! into `<output_dir>/<hypertable>/<chunk>.csv`, compressed to `.csv.gz`, and
//! only then recorded. A crash between compression and the log write leads
//! to a harmless re-export on the next run: compression overwrites the old
//! artifact.
//!
//! Rows are first written to a `.csv.tmp` sibling that is renamed into place
//! once the copy has finished, so a failed copy never leaves a file that looks
//! complete.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use postgres::Client;
use tracing::{debug, error, info, warn};

use crate::catalog::{ChunkCatalog, ChunkDescriptor, ChunkPager};
use crate::command::{CommandRunner, Compressor, run_backup};
use crate::config::ExportConfig;
use crate::db::DbError;
use crate::progress::ProgressLog;
use crate::util::{collect_files, remove_files};

const TEMP_SUFFIX: &str = ".csv.tmp";

/// Database side of the export: chunk listing plus bulk copy out.
pub trait ChunkSource: ChunkCatalog {
    /// Writes every row of `chunk` as CSV with a header line to `out`.
    ///
    /// Returns the number of bytes written.
    fn copy_chunk(&mut self, chunk: &ChunkDescriptor, out: &mut dyn Write)
    -> Result<u64, DbError>;
}

impl ChunkSource for Client {
    fn copy_chunk(
        &mut self,
        chunk: &ChunkDescriptor,
        out: &mut dyn Write,
    ) -> Result<u64, DbError> {
        let statement = format!(
            "COPY (SELECT * FROM {}) TO STDOUT WITH CSV HEADER",
            chunk.quoted_name()
        );

        // Dropping the transaction on any early return rolls it back.
        let mut transaction = self.transaction().map_err(|e| DbError::query(&e))?;
        let bytes = {
            let mut reader = transaction
                .copy_out(statement.as_str())
                .map_err(|e| DbError::query(&e))?;
            io::copy(&mut reader, out)?
        };
        transaction.commit().map_err(|e| DbError::query(&e))?;
        Ok(bytes)
    }
}

/// What happened to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Exported,
    Skipped,
    Failed,
}

/// Per-run counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub exported: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Hypertables whose output directory could not be created.
    pub failed_hypertables: usize,
}

impl ExportSummary {
    fn add(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Exported => self.exported += 1,
            ChunkOutcome::Skipped => self.skipped += 1,
            ChunkOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct Exporter<'a, R: CommandRunner + ?Sized> {
    config: &'a ExportConfig,
    runner: &'a R,
    compressor: Compressor<'a, R>,
    progress: ProgressLog,
    exported: HashSet<String>,
    summary: ExportSummary,
}

impl<'a, R: CommandRunner + ?Sized> Exporter<'a, R> {
    pub fn new(config: &'a ExportConfig, runner: &'a R) -> Self {
        Self {
            config,
            runner,
            compressor: Compressor::new(runner, config.compressor.clone()),
            progress: ProgressLog::new(&config.progress_log),
            exported: HashSet::new(),
            summary: ExportSummary::default(),
        }
    }

    /// Runs the whole export, then the backup if one is configured.
    ///
    /// Only catalog failures abort; per-chunk failures are logged and
    /// counted. Clearing `running` stops the run after the current chunk.
    pub fn run<S: ChunkSource + ?Sized>(
        mut self,
        source: &mut S,
        running: &AtomicBool,
    ) -> Result<ExportSummary, DbError> {
        let config = self.config;
        self.prepare();

        for hypertable in &config.hypertables {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.export_hypertable(source, hypertable, running)?;
        }

        if !running.load(Ordering::SeqCst) {
            warn!("Export interrupted, remaining chunks will be exported on the next run");
            return Ok(self.summary);
        }

        if let Some(backup) = &config.backup {
            // Failure is already logged and does not affect the export result.
            let _ = run_backup(self.runner, &config.connection, &config.hypertables, backup);
        }

        Ok(self.summary)
    }

    /// Applies the clear flag, removes leftovers of interrupted copies and
    /// loads the progress log.
    fn prepare(&mut self) {
        let output_dir = &self.config.output_dir;

        if self.config.clear_log {
            match self.progress.clear() {
                Ok(()) => info!("Progress log {} cleared", self.progress.path().display()),
                Err(e) => error!(
                    "Failed to clear progress log {}: {}",
                    self.progress.path().display(),
                    e
                ),
            }
            if let Err(e) = remove_files(output_dir, &[".csv", ".csv.gz"]) {
                error!(
                    "Failed to remove export files under {}: {}",
                    output_dir.display(),
                    e
                );
            }
        }

        match collect_files(output_dir, TEMP_SUFFIX) {
            Ok(stale) => {
                for path in stale {
                    debug!("Removing stale temp file {}", path.display());
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("Failed to remove {}: {}", path.display(), e);
                    }
                }
            }
            Err(e) => warn!("Failed to scan {}: {}", output_dir.display(), e),
        }

        self.exported = self.progress.load();
        info!(
            "Loaded {} exported chunks from {}",
            self.exported.len(),
            self.progress.path().display()
        );
    }

    /// Exports every chunk of one hypertable.
    pub fn export_hypertable<S: ChunkSource + ?Sized>(
        &mut self,
        source: &mut S,
        hypertable: &str,
        running: &AtomicBool,
    ) -> Result<(), DbError> {
        info!("Processing hypertable: {}", hypertable);

        let table_dir = self.config.output_dir.join(hypertable);
        if let Err(e) = std::fs::create_dir_all(&table_dir) {
            error!(
                "Failed to create {}, skipping {}: {}",
                table_dir.display(),
                hypertable,
                e
            );
            self.summary.failed_hypertables += 1;
            return Ok(());
        }

        let mut pager = ChunkPager::new(hypertable, self.config.page_size);
        while let Some(chunks) = pager.next_page(source)? {
            for chunk in &chunks {
                if !running.load(Ordering::SeqCst) {
                    return Ok(());
                }
                let outcome = self.export_chunk(source, &table_dir, chunk);
                self.summary.add(outcome);
            }
        }
        Ok(())
    }

    /// Exports a single chunk into `table_dir` unless it was exported before.
    pub fn export_chunk<S: ChunkSource + ?Sized>(
        &mut self,
        source: &mut S,
        table_dir: &Path,
        chunk: &ChunkDescriptor,
    ) -> ChunkOutcome {
        let qualified = chunk.qualified_name();
        if self.exported.contains(&qualified) {
            info!("Chunk {} already exported", qualified);
            return ChunkOutcome::Skipped;
        }

        let csv_path = table_dir.join(format!("{}.csv", chunk.file_stem()));
        match write_chunk_file(source, chunk, &csv_path) {
            Ok(bytes) => info!(
                "Exported {} to {} ({} bytes)",
                qualified,
                csv_path.display(),
                bytes
            ),
            Err(e) => {
                error!("Failed to export {}: {}", qualified, e);
                return ChunkOutcome::Failed;
            }
        }

        if self.compressor.compress(&csv_path).is_err() {
            return ChunkOutcome::Failed;
        }

        if let Err(e) = self.progress.record(&qualified) {
            error!("Failed to record {} as exported: {}", qualified, e);
            return ChunkOutcome::Failed;
        }
        self.exported.insert(qualified);
        ChunkOutcome::Exported
    }
}

/// Streams a chunk into `path` through a temp sibling.
fn write_chunk_file<S: ChunkSource + ?Sized>(
    source: &mut S,
    chunk: &ChunkDescriptor,
    path: &Path,
) -> Result<u64, DbError> {
    let tmp_path = temp_path(path);
    let result = stream_to(source, chunk, &tmp_path)
        .and_then(|bytes| std::fs::rename(&tmp_path, path).map(|()| bytes).map_err(DbError::Io));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

fn stream_to<S: ChunkSource + ?Sized>(
    source: &mut S,
    chunk: &ChunkDescriptor,
    path: &Path,
) -> Result<u64, DbError> {
    let mut writer = BufWriter::new(File::create(path)?);
    let bytes = source.copy_chunk(chunk, &mut writer)?;
    let file = writer.into_inner().map_err(|e| DbError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(bytes)
}

/// `x.csv` -> `x.csv.tmp`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
