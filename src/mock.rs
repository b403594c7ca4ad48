//! In-memory stand-ins for the database and external tools.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::rc::Rc;

use crate::catalog::{ChunkCatalog, ChunkDescriptor};
use crate::command::{CommandRunner, ExternalCommand, RunError};
use crate::db::DbError;
use crate::export::ChunkSource;
use crate::import::{Connector, TableSink};

/// Export-side database: a catalog plus per-chunk CSV payloads.
#[derive(Default)]
pub struct MockDatabase {
    chunks: Vec<(String, ChunkDescriptor, String)>,
    /// `(hypertable, limit, offset)` per catalog request.
    pub catalog_requests: Vec<(String, u32, u64)>,
    /// Qualified names of chunks whose rows were requested.
    pub copy_requests: Vec<String>,
    pub fail_catalog: bool,
    /// Qualified names whose copy fails after writing part of the data.
    pub failing_chunks: HashSet<String>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&mut self, hypertable: &str, chunk: ChunkDescriptor, csv: &str) {
        self.chunks
            .push((hypertable.to_string(), chunk, csv.to_string()));
    }
}

impl ChunkCatalog for MockDatabase {
    fn fetch_chunks(
        &mut self,
        hypertable: &str,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<ChunkDescriptor>, DbError> {
        self.catalog_requests
            .push((hypertable.to_string(), limit, offset));
        if self.fail_catalog {
            return Err(DbError::Query(
                "ERROR: relation \"timescaledb_information.chunks\" does not exist".to_string(),
            ));
        }
        Ok(self
            .chunks
            .iter()
            .filter(|(ht, _, _)| ht == hypertable)
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, chunk, _)| chunk.clone())
            .collect())
    }
}

impl ChunkSource for MockDatabase {
    fn copy_chunk(
        &mut self,
        chunk: &ChunkDescriptor,
        out: &mut dyn Write,
    ) -> Result<u64, DbError> {
        let qualified = chunk.qualified_name();
        self.copy_requests.push(qualified.clone());

        let csv = self
            .chunks
            .iter()
            .find(|(_, c, _)| c == chunk)
            .map(|(_, _, csv)| csv.clone())
            .ok_or_else(|| DbError::Query(format!("ERROR: relation {} does not exist", qualified)))?;

        if self.failing_chunks.contains(&qualified) {
            out.write_all(&csv.as_bytes()[..csv.len() / 2])?;
            return Err(DbError::Query(
                "ERROR: canceling statement due to conflict with recovery".to_string(),
            ));
        }

        out.write_all(csv.as_bytes())?;
        Ok(csv.len() as u64)
    }
}

/// Shared state behind [`MockServer`] sessions.
#[derive(Default)]
pub struct ServerState {
    /// Raw CSV received per table, in arrival order.
    pub tables: HashMap<String, String>,
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub fail_connect: bool,
    /// Tables whose copy is rejected by the server.
    pub failing_tables: HashSet<String>,
}

/// Import-side database handing out one session per connection.
#[derive(Clone, Default)]
pub struct MockServer {
    pub state: Rc<RefCell<ServerState>>,
}

impl MockServer {
    pub fn with_tables(tables: &[&str]) -> Self {
        let server = Self::default();
        {
            let mut state = server.state.borrow_mut();
            for table in tables {
                state.tables.insert(table.to_string(), String::new());
            }
        }
        server
    }

    pub fn table(&self, name: &str) -> String {
        self.state
            .borrow()
            .tables
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl Connector for MockServer {
    type Sink = MockSession;

    fn connect(&self) -> Result<MockSession, DbError> {
        let mut state = self.state.borrow_mut();
        if state.fail_connect {
            return Err(DbError::Connection("connection refused".to_string()));
        }
        state.connections_opened += 1;
        Ok(MockSession {
            state: Rc::clone(&self.state),
        })
    }
}

pub struct MockSession {
    state: Rc<RefCell<ServerState>>,
}

impl TableSink for MockSession {
    fn table_exists(&mut self, table: &str) -> Result<bool, DbError> {
        Ok(self.state.borrow().tables.contains_key(table))
    }

    fn copy_into(&mut self, table: &str, input: &mut dyn Read) -> Result<u64, DbError> {
        let mut data = String::new();
        input.read_to_string(&mut data)?;

        let mut state = self.state.borrow_mut();
        if state.failing_tables.contains(table) {
            return Err(DbError::Query(
                "ERROR: duplicate key value violates unique constraint".to_string(),
            ));
        }
        let rows = data.lines().skip(1).count() as u64;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push_str(&data);
        Ok(rows)
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.borrow_mut().connections_closed += 1;
    }
}

/// Records every command and simulates gzip tools by renaming files.
///
/// `pigz -f x` moves `x` to `x.gz`; `gunzip -f x.gz` moves it back. Any other
/// program succeeds without side effects.
#[derive(Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<ExternalCommand>>,
    failing: RefCell<HashSet<String>>,
    fail_all: bool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Makes every later invocation of `program` fail.
    pub fn fail_program(&self, program: &str) {
        self.failing.borrow_mut().insert(program.to_string());
    }

    pub fn succeed_program(&self, program: &str) {
        self.failing.borrow_mut().remove(program);
    }

    pub fn calls(&self) -> Vec<ExternalCommand> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, program: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program == program)
            .count()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &ExternalCommand) -> Result<(), RunError> {
        self.calls.borrow_mut().push(command.clone());

        let failed = || RunError::Failed {
            program: command.program.clone(),
            status: "exit status: 1".to_string(),
        };
        if self.fail_all || self.failing.borrow().contains(&command.program) {
            return Err(failed());
        }

        let Some(target) = command.args.last().map(PathBuf::from) else {
            return Ok(());
        };
        let renamed = match command.program.as_str() {
            "pigz" | "gzip" => Some(crate::command::compressed_path(&target)),
            "gunzip" => Some(crate::command::decompressed_path(&target)),
            _ => None,
        };
        if let Some(to) = renamed {
            std::fs::rename(&target, &to).map_err(|_| failed())?;
        }
        Ok(())
    }
}
