//! Database connection handling and shared error type.

use postgres::{Client, NoTls};
use postgres_native_tls::MakeTlsConnector;

use crate::config::{ConnectionConfig, TlsMode};

/// Error type for database operations.
#[derive(Debug)]
pub enum DbError {
    /// Connection failed.
    Connection(String),
    /// Query or bulk copy failed on the server side.
    Query(String),
    /// Local I/O failed while streaming rows.
    Io(std::io::Error),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "PostgreSQL: {}", msg),
            DbError::Query(msg) => write!(f, "PostgreSQL query error: {}", msg),
            DbError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::Io(e)
    }
}

impl DbError {
    pub(crate) fn query(e: &postgres::Error) -> Self {
        DbError::Query(format_postgres_error(e))
    }
}

/// Opens a new connection with the configured TLS mode.
pub fn connect(config: &ConnectionConfig) -> Result<Client, DbError> {
    let pg_config = config.to_pg_config();
    let result = match config.tls {
        TlsMode::Disable => pg_config.connect(NoTls),
        TlsMode::Require => {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| DbError::Connection(format!("TLS setup failed: {}", e)))?;
            pg_config.connect(MakeTlsConnector::new(connector))
        }
    };
    result.map_err(|e| DbError::Connection(format_postgres_error(&e)))
}

/// Quotes an SQL identifier, doubling any embedded double quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
