// ABOUTME: RetryController - runs one transfer and retries it once on resource exhaustion
// ABOUTME: The retry halves the batch size and picks a restart behavior that keeps already-cleared data safe

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::delete_window;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::query::{build_select, RangeFilter, TableRef};
use crate::request::TransferRequest;
use crate::transfer::{BatchRecord, TransferEngine, WriteBehavior};

/// Batch size for the retry: half, never below one row.
pub fn halved_batch_size(batch_size: usize) -> usize {
    std::cmp::max(1, batch_size / 2)
}

/// Initial write behavior for the retry attempt.
///
/// If the target was pre-cleared (delete-window or truncate), the rows the
/// first attempt flushed belong to the intended delta and a second clear is
/// not run, so the retry appends. Otherwise the half-written table is
/// discarded and the retry starts clean with `replace`, whatever the requested
/// initial behavior was.
pub fn restart_behavior(request: &TransferRequest) -> WriteBehavior {
    if request.pre_clears_target() {
        WriteBehavior::Append
    } else {
        WriteBehavior::Replace
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub source_table: TableRef,
    pub target_table: TableRef,
    pub filter: RangeFilter,
    /// 1, or 2 when the resource-exhaustion retry kicked in.
    pub attempts: u32,
    /// Batch size of the attempt that completed.
    pub batch_size: usize,
    /// Initial write behavior of the attempt that completed.
    pub initial_behavior: WriteBehavior,
    pub rows_deleted: Option<u64>,
    pub truncated: bool,
    pub batches: Vec<BatchRecord>,
    pub rows_written: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs a [`TransferRequest`] end to end against a pair of endpoints.
pub struct RetryController<'a> {
    source: &'a dyn Endpoint,
    target: &'a dyn Endpoint,
}

impl<'a> RetryController<'a> {
    pub fn new(source: &'a dyn Endpoint, target: &'a dyn Endpoint) -> Self {
        Self { source, target }
    }

    /// Validate, pre-clear the target if asked to, then transfer.
    ///
    /// On resource exhaustion the transfer is retried exactly once with half
    /// the batch size and [`restart_behavior`]. Any other error, or a second
    /// exhaustion, propagates. Pre-clear steps run once and are never retried.
    pub async fn run_with_retry(&self, request: &TransferRequest) -> Result<TransferReport> {
        request.validate()?;
        let query = build_select(
            &request.source_table.name,
            &request.source_table.schema,
            &request.filter,
        )?;

        let started_at = Utc::now();

        let truncated = if request.truncate {
            delete_window::truncate(self.target, &request.target_table).await?
        } else {
            false
        };

        let rows_deleted = if request.delete_window {
            Some(
                delete_window::clear(
                    self.target,
                    &request.target_table.schema,
                    &request.target_table.name,
                    &request.filter,
                )
                .await?,
            )
        } else {
            None
        };

        let engine = TransferEngine::new().with_max_batch_bytes(request.max_batch_bytes);

        let mut attempts = 1;
        let mut batch_size = request.batch_size;
        let mut initial_behavior = request.initial_behavior;

        let first = engine
            .transfer(
                &query,
                self.source,
                self.target,
                &request.target_table,
                batch_size,
                initial_behavior,
            )
            .await;

        let outcome = match first {
            Ok(outcome) => outcome,
            Err(e) if e.is_resource_exhausted() => {
                attempts = 2;
                batch_size = halved_batch_size(batch_size);
                initial_behavior = restart_behavior(request);

                tracing::warn!("{}", e);
                if initial_behavior == WriteBehavior::Replace
                    && request.initial_behavior == WriteBehavior::Append
                {
                    tracing::warn!(
                        "Retrying with 'replace': existing contents of {} will be discarded",
                        request.target_table
                    );
                }
                tracing::warn!(
                    "Retrying transfer once with batch size {} and initial behavior '{}'",
                    batch_size,
                    initial_behavior
                );

                engine
                    .transfer(
                        &query,
                        self.source,
                        self.target,
                        &request.target_table,
                        batch_size,
                        initial_behavior,
                    )
                    .await?
            }
            Err(e) => return Err(e),
        };

        Ok(TransferReport {
            source_table: request.source_table.clone(),
            target_table: request.target_table.clone(),
            filter: request.filter.clone(),
            attempts,
            batch_size,
            initial_behavior,
            rows_deleted,
            truncated,
            batches: outcome.batches,
            rows_written: outcome.rows_written,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
