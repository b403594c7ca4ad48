//! chunkdump - TimescaleDB chunk export/import library.
//!
//! This library provides the core functionality shared between:
//! - `chunkdump` - exports hypertable chunks to compressed CSV files
//! - `chunkload` - imports those files back into a target database

pub mod catalog;
pub mod command;
pub mod config;
pub mod db;
pub mod export;
pub mod import;
pub mod progress;
pub mod util;

#[cfg(test)]
pub(crate) mod mock;
