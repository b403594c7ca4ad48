//! Chunk discovery from the TimescaleDB catalog.
//!
//! Chunks are listed from `timescaledb_information.chunks` one page at a
//! time with `LIMIT`/`OFFSET`. Paging stops at the first empty page; no total
//! count is ever queried. The listing is only stable if no chunks are added
//! or dropped while a run is in progress.

use postgres::Client;
use tracing::debug;

use crate::db::{DbError, quote_ident};

const CHUNKS_QUERY: &str = "SELECT chunk_schema::text, chunk_name::text \
     FROM timescaledb_information.chunks \
     WHERE hypertable_name = $1 \
     LIMIT $2 OFFSET $3";

/// One physical partition of a hypertable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkDescriptor {
    pub schema: String,
    pub name: String,
}

impl ChunkDescriptor {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `schema.name`, the key recorded in the progress log.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// `"schema"."name"`, safe to splice into SQL.
    pub fn quoted_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Export file stem: the chunk name with dots replaced by underscores.
    pub fn file_stem(&self) -> String {
        self.name.replace('.', "_")
    }
}

/// Source of chunk listings.
pub trait ChunkCatalog {
    /// Returns at most `limit` chunks of `hypertable`, skipping the first `offset`.
    fn fetch_chunks(
        &mut self,
        hypertable: &str,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<ChunkDescriptor>, DbError>;
}

impl ChunkCatalog for Client {
    fn fetch_chunks(
        &mut self,
        hypertable: &str,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<ChunkDescriptor>, DbError> {
        let rows = self
            .query(
                CHUNKS_QUERY,
                &[&hypertable, &i64::from(limit), &(offset as i64)],
            )
            .map_err(|e| DbError::query(&e))?;

        Ok(rows
            .iter()
            .map(|row| ChunkDescriptor::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }
}

/// Lazy page-by-page walk over one hypertable's chunks.
///
/// Page `k` covers rows `[k * page_size, k * page_size + page_size)`. The pager
/// does not hold the catalog, so the caller can use the same connection for
/// other work between pages.
#[derive(Debug)]
pub struct ChunkPager {
    hypertable: String,
    page_size: u32,
    page: u64,
    done: bool,
}

impl ChunkPager {
    pub fn new(hypertable: impl Into<String>, page_size: u32) -> Self {
        Self {
            hypertable: hypertable.into(),
            page_size: page_size.max(1),
            page: 0,
            done: false,
        }
    }

    /// Index of the next page to be requested.
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Fetches the next page, or `None` once an empty page has been seen.
    pub fn next_page<C: ChunkCatalog + ?Sized>(
        &mut self,
        catalog: &mut C,
    ) -> Result<Option<Vec<ChunkDescriptor>>, DbError> {
        if self.done {
            return Ok(None);
        }

        let offset = self.page * u64::from(self.page_size);
        let chunks = catalog.fetch_chunks(&self.hypertable, self.page_size, offset)?;
        debug!(
            "Catalog page {} for {}: {} chunks (offset {})",
            self.page,
            self.hypertable,
            chunks.len(),
            offset
        );

        if chunks.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.page += 1;
        Ok(Some(chunks))
    }

    /// Drains every remaining page into one list.
    pub fn collect_all<C: ChunkCatalog + ?Sized>(
        mut self,
        catalog: &mut C,
    ) -> Result<Vec<ChunkDescriptor>, DbError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page(catalog)? {
            all.extend(page);
        }
        Ok(all)
    }
}
