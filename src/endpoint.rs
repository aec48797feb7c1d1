// ABOUTME: Seam between the transfer core and a concrete database
// ABOUTME: Postgres handles implement it; tests plug in an in-memory endpoint

use async_trait::async_trait;

use crate::batch::Batch;
use crate::error::Result;
use crate::query::{Query, TableRef};
use crate::transfer::WriteBehavior;

/// Lazy sequence of bounded batches produced by one select query.
#[async_trait]
pub trait BatchReader: Send {
    /// Next batch of at most `batch_size` rows, or `None` once the result set
    /// is exhausted. Never returns an empty batch.
    async fn next_batch(&mut self) -> Result<Option<Batch>>;
}

/// Writes batches into a target table. Each call commits on its own.
#[async_trait]
pub trait BatchWriter: Send {
    /// Apply `behavior` to the target table, insert the batch, commit.
    /// Returns the number of rows inserted.
    async fn write_batch(
        &mut self,
        table: &TableRef,
        batch: &Batch,
        behavior: WriteBehavior,
    ) -> Result<u64>;
}

/// A database reachable under one role.
///
/// Every `open_*` call establishes fresh sessions; nothing is pooled.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Human-readable location, free of credentials.
    fn describe(&self) -> String;

    async fn open_reader(
        &self,
        query: &Query,
        batch_size: usize,
        max_batch_bytes: Option<usize>,
    ) -> Result<Box<dyn BatchReader>>;

    async fn open_writer(&self) -> Result<Box<dyn BatchWriter>>;

    /// Run one statement outside any transaction and return the affected row count.
    async fn execute(&self, query: &Query) -> Result<u64>;

    async fn truncate(&self, table: &TableRef) -> Result<()>;

    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// Evaluate a count query.
    async fn count(&self, query: &Query) -> Result<u64>;
}
