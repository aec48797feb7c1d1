// ABOUTME: CursorReader - streams a select query from source PostgreSQL in bounded batches
// ABOUTME: Holds one read-only transaction with a NO SCROLL cursor open until the result set is drained

use async_trait::async_trait;
use futures::{pin_mut, TryStreamExt};
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::value::{columns_of, row_to_cells};
use crate::batch::{Batch, BatchBuilder};
use crate::endpoint::BatchReader;
use crate::error::{Result, TransferError};
use crate::query::Query;

const CURSOR_NAME: &str = "db_to_db_batches";

/// Reads the rows of one query through a server-side cursor.
///
/// Each [`BatchReader::next_batch`] issues `FETCH FORWARD <batch_size>`, so at
/// most one batch is ever buffered client-side. Rows arrive in whatever order
/// the query produces; no ORDER BY is imposed.
pub struct CursorReader {
    client: Client,
    query: Query,
    batch_size: usize,
    max_batch_bytes: Option<usize>,
    exhausted: bool,
    batches_read: usize,
}

impl CursorReader {
    /// Begin a read-only transaction on `client` and declare the cursor.
    ///
    /// An unknown source table is reported here, before any batch is read.
    pub async fn open(
        client: Client,
        query: &Query,
        batch_size: usize,
        max_batch_bytes: Option<usize>,
    ) -> Result<Self> {
        client
            .batch_execute("BEGIN READ ONLY")
            .await
            .map_err(|e| {
                TransferError::transport("Failed to start read transaction on source", e)
            })?;

        let declare = format!(
            "DECLARE {} NO SCROLL CURSOR FOR {}",
            CURSOR_NAME,
            query.sql()
        );
        client.batch_execute(&declare).await.map_err(|e| {
            TransferError::from_postgres(
                e,
                format!("Failed to open cursor over {}", query.table),
                &query.table.schema,
                &query.table.name,
                batch_size,
            )
        })?;

        Ok(Self {
            client,
            query: query.clone(),
            batch_size,
            max_batch_bytes,
            exhausted: false,
            batches_read: 0,
        })
    }

    async fn fetch(&self) -> Result<Option<Batch>> {
        let fetch = format!("FETCH FORWARD {} FROM {}", self.batch_size, CURSOR_NAME);
        let no_params: [&(dyn ToSql + Sync); 0] = [];
        let stream = self
            .client
            .query_raw(fetch.as_str(), no_params.iter().copied())
            .await
            .map_err(|e| self.read_error(e))?;
        pin_mut!(stream);

        let mut builder: Option<BatchBuilder> = None;
        while let Some(row) = stream.try_next().await.map_err(|e| self.read_error(e))? {
            if builder.is_none() {
                builder = Some(BatchBuilder::new(
                    columns_of(&row),
                    self.batch_size,
                    self.max_batch_bytes,
                )?);
            }
            let cells = row_to_cells(&row).map_err(|e| self.read_error(e))?;
            if let Some(builder) = builder.as_mut() {
                builder.push_row(cells)?;
            }
        }

        Ok(builder.map(BatchBuilder::finish))
    }

    /// Close the cursor and end the read transaction.
    async fn finish(&mut self) -> Result<()> {
        self.exhausted = true;
        self.client
            .batch_execute(&format!("CLOSE {}; COMMIT", CURSOR_NAME))
            .await
            .map_err(|e| TransferError::transport("Failed to close source cursor", e))
    }

    fn read_error(&self, e: tokio_postgres::Error) -> TransferError {
        TransferError::from_postgres(
            e,
            format!(
                "Failed to read batch {} from {}",
                self.batches_read, self.query.table
            ),
            &self.query.table.schema,
            &self.query.table.name,
            self.batch_size,
        )
    }
}

#[async_trait]
impl BatchReader for CursorReader {
    async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.fetch().await? {
            Some(batch) => {
                self.batches_read += 1;
                // A short batch means the cursor is drained
                if batch.len() < self.batch_size {
                    self.finish().await?;
                }
                Ok(Some(batch))
            }
            None => {
                self.finish().await?;
                Ok(None)
            }
        }
    }
}
