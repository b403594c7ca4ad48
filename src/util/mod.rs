//! Utility modules for chunkdump.

mod files;
mod logging;

pub use files::{collect_files, remove_files};
pub use logging::init_logging;

/// Prints a PostgreSQL connection error to stderr with ANSI colors.
pub fn print_pg_error(error: &str) {
    const RED: &str = "\x1b[1;31m";
    const YELLOW: &str = "\x1b[33m";
    const RESET: &str = "\x1b[0m";

    eprintln!("{RED}{error}{RESET}");
    eprintln!();
    eprintln!("{YELLOW}  Configure the connection with flags or environment variables:");
    eprintln!("    export PGHOST=localhost");
    eprintln!("    export PGPORT=5432");
    eprintln!("    export PGUSER=postgres");
    eprintln!("    export PGPASSWORD=secret");
    eprintln!("    export PGDATABASE=zabbix{RESET}");
}
