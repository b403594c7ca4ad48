//! Run configuration for the export and import pipelines.
//!
//! All settings are fixed at the top of a run and passed explicitly into the
//! components that need them. The binaries build these structs from their
//! command-line arguments (with `PG*` environment variable fallbacks for the
//! connection settings).

use std::path::PathBuf;

use clap::ValueEnum;

/// Hypertables processed when none are given on the command line.
pub const DEFAULT_HYPERTABLES: &[&str] = &[
    "history",
    "history_uint",
    "history_bin",
    "history_str",
    "history_log",
    "history_text",
    "auditlog",
    "trends_uint",
    "trends",
];

/// Number of catalog rows requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// TLS negotiation mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TlsMode {
    /// Plain TCP connection.
    #[default]
    Disable,
    /// Require TLS; fail if the server does not support it.
    Require,
}

/// Database connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    pub tls: TlsMode,
}

impl ConnectionConfig {
    /// Builds the client configuration used by [`crate::db::connect`].
    pub fn to_pg_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname)
            .application_name("chunkdump");
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            config.password(password);
        }
        if self.tls == TlsMode::Require {
            config.ssl_mode(postgres::config::SslMode::Require);
        }
        config
    }

    /// Human-readable target description for logs (never includes the password).
    pub fn describe(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.dbname
        )
    }
}

/// Connection flags shared by both binaries.
///
/// Each flag falls back to the matching libpq environment variable.
#[derive(Debug, Clone, clap::Args)]
pub struct ConnectionArgs {
    /// Database server host.
    #[arg(long, env = "PGHOST", default_value = "localhost")]
    pub host: String,

    /// Database server port.
    #[arg(long, env = "PGPORT", default_value_t = 5432)]
    pub port: u16,

    /// Database user.
    #[arg(short = 'U', long, env = "PGUSER", default_value = "postgres")]
    pub user: String,

    /// Database password.
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Database name.
    #[arg(short = 'd', long, env = "PGDATABASE")]
    pub dbname: String,

    /// TLS mode for the connection.
    #[arg(long, value_enum, default_value_t = TlsMode::Disable)]
    pub sslmode: TlsMode,
}

impl From<ConnectionArgs> for ConnectionConfig {
    fn from(args: ConnectionArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            user: args.user,
            password: args.password,
            dbname: args.dbname,
            tls: args.sslmode,
        }
    }
}

/// External compression tools.
#[derive(Debug, Clone)]
pub struct CompressorConfig {
    /// Single-file in-place compressor, invoked as `<program> -f <file>`.
    pub compress_program: String,
    /// Inverse of `compress_program`, invoked as `<program> -f <file.gz>`.
    pub decompress_program: String,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            compress_program: "pigz".to_string(),
            decompress_program: "gunzip".to_string(),
        }
    }
}

/// Whole-database backup of the non-chunked tables.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub program: String,
    pub output_file: PathBuf,
}

/// Settings for one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub connection: ConnectionConfig,
    pub hypertables: Vec<String>,
    pub output_dir: PathBuf,
    pub progress_log: PathBuf,
    /// Truncate the progress log and remove previous export files first.
    pub clear_log: bool,
    pub page_size: u32,
    pub compressor: CompressorConfig,
    /// Run a backup after the export when set.
    pub backup: Option<BackupConfig>,
}

/// Settings for one import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub connection: ConnectionConfig,
    /// Root directory laid out as `<input_dir>/<table>/<file>.csv[.gz]`.
    pub input_dir: PathBuf,
    pub progress_log: PathBuf,
    /// Truncate the import progress log first. Data files are left alone.
    pub clear_log: bool,
    pub compressor: CompressorConfig,
}
