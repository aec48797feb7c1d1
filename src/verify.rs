// ABOUTME: Post-run reconciliation of filtered source rows against the target window
// ABOUTME: Reports mismatches as warnings; never changes the outcome of the run

use serde::Serialize;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::query::build_count;
use crate::request::TransferRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub source_rows: u64,
    pub target_rows: u64,
}

impl Verification {
    pub fn matches(&self) -> bool {
        self.source_rows == self.target_rows
    }
}

/// Count the request's window on both sides.
///
/// The target window only equals the source when the run was idempotent
/// (delete-window, truncate or a fresh `replace`); plain appends are expected
/// to drift and are reported as such.
pub async fn verify(
    source: &dyn Endpoint,
    target: &dyn Endpoint,
    request: &TransferRequest,
) -> Result<Verification> {
    let source_query = build_count(
        &request.source_table.name,
        &request.source_table.schema,
        &request.filter,
    )?;
    let target_query = build_count(
        &request.target_table.name,
        &request.target_table.schema,
        &request.filter,
    )?;

    let source_rows = source.count(&source_query).await?;
    let target_rows = if target.table_exists(&request.target_table).await? {
        target.count(&target_query).await?
    } else {
        0
    };

    let verification = Verification {
        source_rows,
        target_rows,
    };

    if verification.matches() {
        tracing::info!(
            "Verified: {} and {} both hold {} rows in the window",
            request.source_table,
            request.target_table,
            source_rows
        );
    } else {
        tracing::warn!(
            "Row count mismatch: {} has {} rows in the window, {} has {}",
            request.source_table,
            source_rows,
            request.target_table,
            target_rows
        );
    }

    Ok(verification)
}
