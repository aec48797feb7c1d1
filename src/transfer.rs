// ABOUTME: Chunked transfer engine - streams batches from source and writes them to target
// ABOUTME: First batch uses the configured if-exists behavior, every later batch appends

use std::fmt;

use serde::Serialize;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::query::{Query, TableRef};

/// What to do with an existing target table when writing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteBehavior {
    /// Error out if the table already exists
    Fail,
    /// Drop and recreate the table from the batch's columns
    Replace,
    /// Insert into the table, creating it if missing
    Append,
}

impl WriteBehavior {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteBehavior::Fail => "fail",
            WriteBehavior::Replace => "replace",
            WriteBehavior::Append => "append",
        }
    }
}

impl fmt::Display for WriteBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks whether the next write is the first of the run.
///
/// Transitions exactly once, after the first successful batch write.
#[derive(Debug, Clone, Copy)]
pub struct WriteBehaviorState {
    initial: WriteBehavior,
    first_write_done: bool,
}

impl WriteBehaviorState {
    pub fn new(initial: WriteBehavior) -> Self {
        Self {
            initial,
            first_write_done: false,
        }
    }

    pub fn current(&self) -> WriteBehavior {
        if self.first_write_done {
            WriteBehavior::Append
        } else {
            self.initial
        }
    }

    pub fn mark_written(&mut self) {
        self.first_write_done = true;
    }
}

/// One written batch, kept for reconciling partial runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRecord {
    pub index: usize,
    pub rows: u64,
    pub behavior: WriteBehavior,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub batches: Vec<BatchRecord>,
    pub rows_written: u64,
}

/// Copies the result of one select query into a target table, batch by batch.
///
/// Strictly sequential: a batch is fetched, written and counted before the
/// next fetch starts. Each batch commits independently, so a failure at batch
/// `k` leaves batches `0..k` in the target.
#[derive(Debug, Clone, Default)]
pub struct TransferEngine {
    max_batch_bytes: Option<usize>,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the raw payload bytes buffered for one batch. Going over is
    /// reported as resource exhaustion.
    pub fn with_max_batch_bytes(mut self, max_batch_bytes: Option<usize>) -> Self {
        self.max_batch_bytes = max_batch_bytes;
        self
    }

    pub async fn transfer(
        &self,
        query: &Query,
        source: &dyn Endpoint,
        target: &dyn Endpoint,
        target_table: &TableRef,
        batch_size: usize,
        initial_behavior: WriteBehavior,
    ) -> Result<TransferOutcome> {
        tracing::info!(
            "Transferring {} -> {} on {} (batch size: {}, initial behavior: {})",
            query.table,
            target_table,
            target.describe(),
            batch_size,
            initial_behavior
        );
        tracing::debug!("Source query: {}", query);

        let mut reader = source
            .open_reader(query, batch_size, self.max_batch_bytes)
            .await?;
        let mut writer = target.open_writer().await?;

        let mut state = WriteBehaviorState::new(initial_behavior);
        let mut outcome = TransferOutcome::default();
        let mut index = 0usize;

        while let Some(batch) = reader.next_batch().await? {
            let behavior = state.current();
            tracing::info!(
                "Writing batch {} ({} rows, if-exists={}) to {}",
                index,
                batch.len(),
                behavior,
                target_table
            );

            let written = match writer.write_batch(target_table, &batch, behavior).await {
                Ok(written) => written,
                Err(e) => {
                    tracing::error!(
                        "Batch {} failed after {} rows were committed to {}: {}",
                        index,
                        outcome.rows_written,
                        target_table,
                        e
                    );
                    return Err(e);
                }
            };
            state.mark_written();

            outcome.rows_written += written;
            outcome.batches.push(BatchRecord {
                index,
                rows: written,
                behavior,
            });
            tracing::info!(
                "Batch {} written to {} ({} rows so far)",
                index,
                target_table,
                outcome.rows_written
            );
            index += 1;
        }

        if outcome.batches.is_empty() {
            tracing::info!(
                "Query on {} returned no rows; {} left untouched",
                query.table,
                target_table
            );
        }
        tracing::info!("Total rows written: {}", outcome.rows_written);

        Ok(outcome)
    }
}
