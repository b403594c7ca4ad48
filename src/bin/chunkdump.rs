//! chunkdump - Export TimescaleDB chunks to compressed CSV files.
//!
//! Every chunk of the selected hypertables is written to
//! `<output-dir>/<hypertable>/<chunk>.csv.gz`. Exported chunks are recorded in
//! a progress log and skipped on later runs, so an interrupted export can
//! simply be started again.
//!
//! Usage:
//!   chunkdump -d zabbix                          # all default hypertables
//!   chunkdump -d zabbix -t history,trends        # selected hypertables
//!   chunkdump -d zabbix --clear-log              # full re-export
//!   chunkdump -d zabbix --backup                 # plus pg_dump of the other tables

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{error, info, warn};

use chunkdump::command::SystemRunner;
use chunkdump::config::{
    BackupConfig, CompressorConfig, ConnectionArgs, ConnectionConfig, DEFAULT_HYPERTABLES,
    DEFAULT_PAGE_SIZE, ExportConfig,
};
use chunkdump::db::connect;
use chunkdump::export::Exporter;
use chunkdump::util::{init_logging, print_pg_error};

/// Export TimescaleDB chunks to compressed CSV files.
#[derive(Parser)]
#[command(name = "chunkdump", about = "Export hypertable chunks to CSV", version)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Hypertables to export (comma separated or repeated).
    #[arg(
        short = 't',
        long = "table",
        value_delimiter = ',',
        default_values_t = DEFAULT_HYPERTABLES.iter().map(|s| s.to_string()).collect::<Vec<_>>()
    )]
    tables: Vec<String>,

    /// Root directory for exported files.
    #[arg(short, long, default_value = "./export")]
    output_dir: PathBuf,

    /// Progress log listing exported chunks.
    #[arg(long, default_value = "exported_chunks.log")]
    progress_log: PathBuf,

    /// Clear the progress log and remove previously exported files first.
    #[arg(long)]
    clear_log: bool,

    /// Number of chunks requested from the catalog per page.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u32).range(1..))]
    page_size: u32,

    /// Compressor invoked as `<program> -f <file>`.
    #[arg(long, default_value = "pigz")]
    compress_program: String,

    /// Also dump all non-chunked tables with pg_dump after the export.
    #[arg(long)]
    backup: bool,

    /// Output file for --backup.
    #[arg(long, default_value = "tables.sql")]
    backup_file: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn into_config(self) -> ExportConfig {
        let connection = ConnectionConfig::from(self.connection);
        ExportConfig {
            connection,
            hypertables: self.tables,
            output_dir: self.output_dir,
            progress_log: self.progress_log,
            clear_log: self.clear_log,
            page_size: self.page_size,
            compressor: CompressorConfig {
                compress_program: self.compress_program,
                ..CompressorConfig::default()
            },
            backup: self.backup.then(|| BackupConfig {
                program: "pg_dump".to_string(),
                output_file: self.backup_file,
            }),
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    let config = args.into_config();

    info!("chunkdump {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: hypertables={}, output={}, log={}, page_size={}",
        config.hypertables.join(","),
        config.output_dir.display(),
        config.progress_log.display(),
        config.page_size
    );

    let mut client = match connect(&config.connection) {
        Ok(client) => {
            info!("Connected to {}", config.connection.describe());
            client
        }
        Err(e) => {
            print_pg_error(&format!(
                "Connection to {} failed: {}",
                config.connection.describe(),
                e
            ));
            std::process::exit(1);
        }
    };

    // Setup graceful shutdown: finish the current chunk, then stop.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let runner = SystemRunner::new();
    match Exporter::new(&config, &runner).run(&mut client, &running) {
        Ok(summary) => info!(
            "Export completed: {} exported, {} skipped, {} failed, {} hypertables skipped",
            summary.exported, summary.skipped, summary.failed, summary.failed_hypertables
        ),
        Err(e) => {
            error!("Export aborted: {}", e);
            std::process::exit(1);
        }
    }
}
