// ABOUTME: In-memory batch of rows moved in one fetch+write cycle
// ABOUTME: BatchBuilder enforces the memory bound and raises ResourceExhausted instead of aborting

use bytes::Bytes;

use crate::error::{Result, TransferError};

/// One column of a batch: its name and the SQL type used to create it on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_name: String,
    /// Type OID the source reported, when the values are in that type's
    /// binary wire format. A writer must not hand such values to a column
    /// of any other type.
    pub type_oid: Option<u32>,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            type_oid: None,
        }
    }

    pub fn with_type_oid(mut self, oid: u32) -> Self {
        self.type_oid = Some(oid);
        self
    }
}

/// A single value as it travelled on the wire, or SQL NULL.
///
/// The payload is never decoded: whatever the source sent is what the target
/// receives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cell(pub Option<Bytes>);

impl Cell {
    pub fn null() -> Self {
        Cell(None)
    }

    pub fn from_bytes(raw: &[u8]) -> Self {
        Cell(Some(Bytes::copy_from_slice(raw)))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }

    pub fn payload_len(&self) -> usize {
        self.0.as_ref().map_or(0, |b| b.len())
    }
}

/// An ordered, finite buffer of rows sharing one column layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
    /// Sum of raw payload bytes across all cells.
    pub payload_bytes: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Accumulates up to `batch_size` rows for one batch.
///
/// Reserves the row buffer fallibly up front and checks the optional payload
/// budget on every row, so running out of memory surfaces as
/// [`TransferError::ResourceExhausted`] rather than an allocator abort.
#[derive(Debug)]
pub struct BatchBuilder {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
    payload_bytes: usize,
    batch_size: usize,
    max_batch_bytes: Option<usize>,
}

impl BatchBuilder {
    pub fn new(
        columns: Vec<Column>,
        batch_size: usize,
        max_batch_bytes: Option<usize>,
    ) -> Result<Self> {
        let mut rows = Vec::new();
        rows.try_reserve_exact(batch_size)
            .map_err(|e| TransferError::ResourceExhausted {
                batch_size,
                reason: format!("could not reserve the row buffer: {}", e),
            })?;

        Ok(Self {
            columns,
            rows,
            payload_bytes: 0,
            batch_size,
            max_batch_bytes,
        })
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.batch_size
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        let row_bytes: usize = row.iter().map(Cell::payload_len).sum();
        self.payload_bytes += row_bytes;

        if let Some(limit) = self.max_batch_bytes {
            if self.payload_bytes > limit {
                return Err(TransferError::ResourceExhausted {
                    batch_size: self.batch_size,
                    reason: format!(
                        "batch payload reached {} bytes after {} rows, over the {} byte budget",
                        self.payload_bytes,
                        self.rows.len() + 1,
                        limit
                    ),
                });
            }
        }

        self.rows.push(row);
        Ok(())
    }

    pub fn finish(self) -> Batch {
        Batch {
            columns: self.columns,
            rows: self.rows,
            payload_bytes: self.payload_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<Column> {
        vec![Column::new("id", "int8"), Column::new("name", "text")]
    }

    fn row(id: &str, name: &str) -> Vec<Cell> {
        vec![
            Cell::from_bytes(id.as_bytes()),
            Cell::from_bytes(name.as_bytes()),
        ]
    }

    #[test]
    fn test_builder_fills_to_batch_size() {
        let mut builder = BatchBuilder::new(columns(), 2, None).unwrap();
        builder.push_row(row("1", "a")).unwrap();
        assert!(!builder.is_full());
        builder.push_row(row("2", "bb")).unwrap();
        assert!(builder.is_full());

        let batch = builder.finish();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.payload_bytes, 5);
        assert_eq!(batch.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_budget_overrun_is_resource_exhaustion() {
        let mut builder = BatchBuilder::new(columns(), 100, Some(8)).unwrap();
        builder.push_row(row("1", "abc")).unwrap();
        let err = builder.push_row(row("2", "abcdef")).unwrap_err();
        match err {
            TransferError::ResourceExhausted { batch_size, reason } => {
                assert_eq!(batch_size, 100);
                assert!(reason.contains("8 byte budget"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_impossible_reservation_is_resource_exhaustion() {
        let err = BatchBuilder::new(columns(), usize::MAX, None).unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    #[test]
    fn test_null_cells_carry_no_payload() {
        let cell = Cell::null();
        assert!(cell.is_null());
        assert_eq!(cell.payload_len(), 0);
        assert_eq!(cell.as_bytes(), None);
    }
}
