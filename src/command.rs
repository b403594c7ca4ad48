//! External tool invocation: compression and backup.
//!
//! Tools are run through the [`CommandRunner`] trait so pipelines can be
//! exercised without spawning processes. Every invocation blocks until the
//! tool exits.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use tracing::{debug, error, info};

use crate::config::{BackupConfig, CompressorConfig, ConnectionConfig};

/// Schema holding chunk tables; excluded from backups.
const CHUNK_SCHEMA_PATTERN: &str = "_timescaledb_internal.*";

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Error returned when an external tool cannot be run or fails.
#[derive(Debug)]
pub enum RunError {
    /// The process could not be started.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// The process exited unsuccessfully.
    Failed { program: String, status: String },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Spawn { program, source } => {
                write!(f, "failed to start {}: {}", program, source)
            }
            RunError::Failed { program, status } => write!(f, "{} {}", program, status),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Spawn { source, .. } => Some(source),
            RunError::Failed { .. } => None,
        }
    }
}

/// Runs external commands to completion.
pub trait CommandRunner {
    fn run(&self, command: &ExternalCommand) -> Result<(), RunError>;
}

/// Runner that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ExternalCommand) -> Result<(), RunError> {
        debug!("Running {} {:?}", command.program, command.args);
        let status = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .status()
            .map_err(|source| RunError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        check_status(&command.program, status)
    }
}

fn check_status(program: &str, status: ExitStatus) -> Result<(), RunError> {
    if status.success() {
        Ok(())
    } else {
        Err(RunError::Failed {
            program: program.to_string(),
            status: status.to_string(),
        })
    }
}

/// In-place single-file gzip compression through external tools.
///
/// Both directions force-overwrite an existing output and the tool removes
/// the input on success.
pub struct Compressor<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    config: CompressorConfig,
}

impl<'a, R: CommandRunner + ?Sized> Compressor<'a, R> {
    pub fn new(runner: &'a R, config: CompressorConfig) -> Self {
        Self { runner, config }
    }

    /// Replaces `path` with `path.gz`. Failures are logged and returned.
    pub fn compress(&self, path: &Path) -> Result<PathBuf, RunError> {
        let command = ExternalCommand::new(&self.config.compress_program)
            .arg("-f")
            .arg(path.to_string_lossy());
        match self.runner.run(&command) {
            Ok(()) => {
                let compressed = compressed_path(path);
                info!("Compressed: {}", compressed.display());
                Ok(compressed)
            }
            Err(e) => {
                error!("Failed to compress {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    /// Replaces `path.gz` with `path`. Failures are logged and returned.
    pub fn decompress(&self, path: &Path) -> Result<PathBuf, RunError> {
        info!("Decompressing {}", path.display());
        let command = ExternalCommand::new(&self.config.decompress_program)
            .arg("-f")
            .arg(path.to_string_lossy());
        match self.runner.run(&command) {
            Ok(()) => Ok(decompressed_path(path)),
            Err(e) => {
                error!("Failed to decompress {}: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

/// `file.csv` -> `file.csv.gz`.
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// `file.csv.gz` -> `file.csv`; paths without `.gz` are returned unchanged.
pub fn decompressed_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "gz") {
        path.with_extension("")
    } else {
        path.to_path_buf()
    }
}

/// Builds the backup invocation covering every table except the hypertables
/// and their chunks.
pub fn pg_dump_command(
    connection: &ConnectionConfig,
    hypertables: &[String],
    backup: &BackupConfig,
) -> ExternalCommand {
    let mut command = ExternalCommand::new(&backup.program)
        .arg("-U")
        .arg(&connection.user)
        .arg("-h")
        .arg(&connection.host)
        .arg("-p")
        .arg(connection.port.to_string())
        .arg("-f")
        .arg(backup.output_file.to_string_lossy());
    for table in hypertables {
        command = command.arg("-T").arg(table);
    }
    command = command.arg("-T").arg(CHUNK_SCHEMA_PATTERN);
    command = command.arg(&connection.dbname);

    if let Some(password) = connection.password.as_deref().filter(|p| !p.is_empty()) {
        command = command.env("PGPASSWORD", password);
    }
    command
}

/// Runs the backup. Failure is logged and returned; it never affects the
/// export that preceded it.
pub fn run_backup<R: CommandRunner + ?Sized>(
    runner: &R,
    connection: &ConnectionConfig,
    hypertables: &[String],
    backup: &BackupConfig,
) -> Result<(), RunError> {
    let command = pg_dump_command(connection, hypertables, backup);
    match runner.run(&command) {
        Ok(()) => {
            info!(
                "Backup completed and saved to {}",
                backup.output_file.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("Backup failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsMode;
    use crate::mock::RecordingRunner;
    use tempfile::tempdir;

    fn connection(password: Option<&str>) -> ConnectionConfig {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: password.map(str::to_string),
            dbname: "zabbix".to_string(),
            tls: TlsMode::Disable,
        }
    }

    #[test]
    fn compressed_and_decompressed_paths() {
        let csv = Path::new("/out/history/_hyper_1_1_chunk.csv");
        let gz = compressed_path(csv);
        assert_eq!(gz, Path::new("/out/history/_hyper_1_1_chunk.csv.gz"));
        assert_eq!(decompressed_path(&gz), csv);
        assert_eq!(decompressed_path(csv), csv);
    }

    #[test]
    fn compress_invokes_tool_with_force_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "x\n").unwrap();

        let runner = RecordingRunner::new();
        let compressor = Compressor::new(&runner, CompressorConfig::default());
        let out = compressor.compress(&path).unwrap();

        assert_eq!(out, dir.path().join("a.csv.gz"));
        assert!(out.exists());
        assert!(!path.exists());
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "pigz");
        assert_eq!(calls[0].args, vec!["-f".to_string(), path.display().to_string()]);
    }

    #[test]
    fn compress_overwrites_existing_sibling() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "new\n").unwrap();
        std::fs::write(dir.path().join("a.csv.gz"), "old\n").unwrap();

        let runner = RecordingRunner::new();
        Compressor::new(&runner, CompressorConfig::default())
            .compress(&path)
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("a.csv.gz")).unwrap();
        assert_eq!(content, "new\n");
    }

    #[test]
    fn decompress_restores_file() {
        let dir = tempdir().unwrap();
        let gz = dir.path().join("a.csv.gz");
        std::fs::write(&gz, "x\n").unwrap();

        let runner = RecordingRunner::new();
        let out = Compressor::new(&runner, CompressorConfig::default())
            .decompress(&gz)
            .unwrap();

        assert_eq!(out, dir.path().join("a.csv"));
        assert!(out.exists());
        assert!(!gz.exists());
        assert_eq!(runner.calls()[0].program, "gunzip");
    }

    #[test]
    fn compress_failure_is_returned() {
        let runner = RecordingRunner::failing();
        let result = Compressor::new(&runner, CompressorConfig::default())
            .compress(Path::new("/nonexistent/a.csv"));
        assert!(matches!(result, Err(RunError::Failed { .. })));
    }

    #[test]
    fn pg_dump_excludes_hypertables_and_chunk_schema() {
        let backup = BackupConfig {
            program: "pg_dump".to_string(),
            output_file: PathBuf::from("tables_zabbix.sql"),
        };
        let tables = vec!["history".to_string(), "trends".to_string()];
        let command = pg_dump_command(&connection(None), &tables, &backup);

        assert_eq!(command.program, "pg_dump");
        assert_eq!(
            command.args,
            vec![
                "-U",
                "postgres",
                "-h",
                "localhost",
                "-p",
                "5432",
                "-f",
                "tables_zabbix.sql",
                "-T",
                "history",
                "-T",
                "trends",
                "-T",
                "_timescaledb_internal.*",
                "zabbix",
            ]
        );
        assert!(command.env.is_empty());
    }

    #[test]
    fn pg_dump_passes_password_through_env() {
        let backup = BackupConfig {
            program: "pg_dump".to_string(),
            output_file: PathBuf::from("dump.sql"),
        };
        let command = pg_dump_command(&connection(Some("12345")), &[], &backup);
        assert_eq!(
            command.env,
            vec![("PGPASSWORD".to_string(), "12345".to_string())]
        );
        assert!(!command.args.iter().any(|a| a == "12345"));
    }

    #[test]
    fn run_backup_reports_failure() {
        let backup = BackupConfig {
            program: "pg_dump".to_string(),
            output_file: PathBuf::from("dump.sql"),
        };
        let runner = RecordingRunner::failing();
        assert!(run_backup(&runner, &connection(None), &[], &backup).is_err());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn system_runner_reports_missing_program() {
        let err = SystemRunner::new()
            .run(&ExternalCommand::new("/nonexistent/chunkdump-tool"))
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }
}
