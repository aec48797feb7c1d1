// ABOUTME: Pre-clears the target rows a run is about to copy, making reruns idempotent
// ABOUTME: Runs as single autocommit statements on the target before any batch is written

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::query::{build_delete, RangeFilter, TableRef};

/// Delete rows in `schema.table` matching `filter` on the target.
///
/// Uses the same predicate as the source select, so exactly the window being
/// reloaded is removed. The statement autocommits on its own session, so a
/// later transfer failure never leaves the target locked. A missing target
/// table means there is nothing to clear.
///
/// Returns the number of rows deleted.
pub async fn clear(
    target: &dyn Endpoint,
    schema: &str,
    table: &str,
    filter: &RangeFilter,
) -> Result<u64> {
    let query = build_delete(table, schema, filter)?;

    if !target.table_exists(&query.table).await? {
        tracing::info!(
            "Target table {} does not exist yet; no window to clear",
            query.table
        );
        return Ok(0);
    }

    tracing::info!("Clearing target window on {}: {}", query.table, filter);
    let deleted = target.execute(&query).await?;
    tracing::info!("Deleted {} rows from {}", deleted, query.table);

    Ok(deleted)
}

/// Empty the target table if it exists. Returns whether anything was truncated.
pub async fn truncate(target: &dyn Endpoint, table: &TableRef) -> Result<bool> {
    table.validate()?;

    if !target.table_exists(table).await? {
        tracing::info!(
            "Target table {} does not exist yet; nothing to truncate",
            table
        );
        return Ok(false);
    }

    tracing::info!("Truncating target table {}", table);
    target.truncate(table).await?;
    Ok(true)
}
