//! chunkload - Import exported chunk files into a database.
//!
//! Reads the layout written by `chunkdump`: every `<input-dir>/<table>/*.csv.gz`
//! is decompressed, copied into `<table>` and compressed again. Imported
//! files are recorded in an import log and skipped on later runs.
//!
//! Usage:
//!   chunkload -d test                     # import ./export
//!   chunkload -d test -i /usr/proyectos   # custom input directory
//!   chunkload -d test --clear-log         # import everything again

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{info, warn};

use chunkdump::command::SystemRunner;
use chunkdump::config::{CompressorConfig, ConnectionArgs, ConnectionConfig, ImportConfig};
use chunkdump::db::connect;
use chunkdump::import::Importer;
use chunkdump::util::{init_logging, print_pg_error};

/// Import exported chunk files.
#[derive(Parser)]
#[command(name = "chunkload", about = "Import chunk CSV files into tables", version)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Root directory laid out as <input-dir>/<table>/<file>.csv.gz.
    #[arg(short, long, default_value = "./export")]
    input_dir: PathBuf,

    /// Progress log listing imported files.
    #[arg(long, default_value = "imported_files.log")]
    progress_log: PathBuf,

    /// Clear the import log first so every file is imported again.
    #[arg(long)]
    clear_log: bool,

    /// Compressor invoked as `<program> -f <file>`.
    #[arg(long, default_value = "pigz")]
    compress_program: String,

    /// Decompressor invoked as `<program> -f <file.gz>`.
    #[arg(long, default_value = "gunzip")]
    decompress_program: String,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn into_config(self) -> ImportConfig {
        ImportConfig {
            connection: ConnectionConfig::from(self.connection),
            input_dir: self.input_dir,
            progress_log: self.progress_log,
            clear_log: self.clear_log,
            compressor: CompressorConfig {
                compress_program: self.compress_program,
                decompress_program: self.decompress_program,
            },
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    let config = args.into_config();

    info!("chunkload {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: input={}, log={}",
        config.input_dir.display(),
        config.progress_log.display()
    );

    // Each file gets its own connection; fail early if none can be opened.
    match connect(&config.connection) {
        Ok(_) => info!("Connected to {}", config.connection.describe()),
        Err(e) => {
            print_pg_error(&format!(
                "Connection to {} failed: {}",
                config.connection.describe(),
                e
            ));
            std::process::exit(1);
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let runner = SystemRunner::new();
    let summary = Importer::new(&config, &config.connection, &runner).run(&running);
    info!(
        "Import completed: {} imported, {} skipped, {} failed",
        summary.imported, summary.skipped, summary.failed
    );
}
