// ABOUTME: In-memory Endpoint used to exercise the transfer core without a database
// ABOUTME: Evaluates range filters on text cells and can simulate out-of-memory during reads

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use db_to_db::batch::{Batch, BatchBuilder, Cell, Column};
use db_to_db::endpoint::{BatchReader, BatchWriter, Endpoint};
use db_to_db::query::{Bound, Comparison, Query, QueryKind, RangeFilter, TableRef};
use db_to_db::{Result, TransferError, WriteBehavior};

#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

impl MemTable {
    /// `id` (int8) and `day` (text) columns, ids `start..start + count`,
    /// `day` cycling through four dates.
    pub fn numbered(start: i64, count: i64) -> Self {
        let days = ["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04"];
        let rows = (start..start + count)
            .map(|id| {
                vec![
                    text_cell(&id.to_string()),
                    text_cell(days[(id.rem_euclid(4)) as usize]),
                ]
            })
            .collect();
        Self {
            columns: vec![Column::new("id", "int8"), Column::new("day", "text")],
            rows,
        }
    }

    pub fn ids(&self) -> Vec<i64> {
        self.rows
            .iter()
            .map(|row| cell_text(&row[0]).parse().unwrap())
            .collect()
    }

    fn matches(&self, row: &[Cell], filter: &RangeFilter) -> Result<bool> {
        for bound in filter.bounds() {
            let idx = self
                .columns
                .iter()
                .position(|c| c.name == bound.column)
                .ok_or_else(|| {
                    TransferError::transport(
                        "Failed to evaluate filter",
                        format!("column \"{}\" does not exist", bound.column),
                    )
                })?;
            if !satisfies(&row[idx], bound) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub fn text_cell(value: &str) -> Cell {
    Cell::from_bytes(value.as_bytes())
}

pub fn cell_text(cell: &Cell) -> String {
    String::from_utf8(cell.as_bytes().unwrap_or_default().to_vec()).unwrap()
}

fn satisfies(cell: &Cell, bound: &Bound) -> bool {
    if cell.is_null() {
        return false;
    }
    let value = cell_text(cell);
    let ordering = match (value.parse::<i64>(), bound.value.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => value.as_str().cmp(bound.value.as_str()),
    };
    match bound.comparison {
        Comparison::Gte => ordering.is_ge(),
        Comparison::Lt => ordering.is_lt(),
    }
}

/// Makes reads fail as out-of-memory when the batch size is above a threshold.
#[derive(Debug, Clone, Copy)]
pub struct OomRule {
    /// Batch sizes strictly above this run out of memory.
    pub above_batch_size: usize,
    /// Index of the batch whose fetch fails; earlier batches succeed.
    pub at_batch: usize,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableRef, MemTable>,
    writes: Vec<(TableRef, usize, WriteBehavior)>,
    oom: Option<OomRule>,
}

/// A database held in memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryEndpoint {
    name: String,
    state: Arc<Mutex<State>>,
    sessions: Arc<AtomicUsize>,
    readers: Arc<AtomicUsize>,
}

impl MemoryEndpoint {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_table(self, table: TableRef, contents: MemTable) -> Self {
        self.state.lock().unwrap().tables.insert(table, contents);
        self
    }

    pub fn with_oom(self, rule: OomRule) -> Self {
        self.state.lock().unwrap().oom = Some(rule);
        self
    }

    pub fn table(&self, table: &TableRef) -> Option<MemTable> {
        self.state.lock().unwrap().tables.get(table).cloned()
    }

    pub fn row_count(&self, table: &TableRef) -> usize {
        self.table(table).map_or(0, |t| t.rows.len())
    }

    /// Every batch write seen: (table, rows, behavior).
    pub fn writes(&self) -> Vec<(TableRef, usize, WriteBehavior)> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Number of sessions opened through this endpoint.
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn readers_opened(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    fn open_session(&self) {
        self.sessions.fetch_add(1, Ordering::SeqCst);
    }

    fn unknown_table(table: &TableRef) -> TransferError {
        TransferError::UnknownTable {
            schema: table.schema.clone(),
            table: table.name.clone(),
        }
    }

    fn filtered(&self, query: &Query) -> Result<MemTable> {
        let state = self.state.lock().unwrap();
        let table = state
            .tables
            .get(&query.table)
            .ok_or_else(|| Self::unknown_table(&query.table))?;
        let mut rows = Vec::new();
        for row in &table.rows {
            if table.matches(row, &query.filter)? {
                rows.push(row.clone());
            }
        }
        Ok(MemTable {
            columns: table.columns.clone(),
            rows,
        })
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn open_reader(
        &self,
        query: &Query,
        batch_size: usize,
        max_batch_bytes: Option<usize>,
    ) -> Result<Box<dyn BatchReader>> {
        assert_eq!(query.kind, QueryKind::Select);
        self.open_session();
        self.readers.fetch_add(1, Ordering::SeqCst);

        let result = self.filtered(query)?;
        let oom = self.state.lock().unwrap().oom;
        Ok(Box::new(MemReader {
            columns: result.columns,
            rows: result.rows.into(),
            batch_size,
            max_batch_bytes,
            oom,
            index: 0,
        }))
    }

    async fn open_writer(&self) -> Result<Box<dyn BatchWriter>> {
        self.open_session();
        Ok(Box::new(MemWriter {
            state: Arc::clone(&self.state),
        }))
    }

    async fn execute(&self, query: &Query) -> Result<u64> {
        assert_eq!(query.kind, QueryKind::Delete);
        self.open_session();
        let mut state = self.state.lock().unwrap();
        let table = state
            .tables
            .get_mut(&query.table)
            .ok_or_else(|| Self::unknown_table(&query.table))?;

        let mut kept = Vec::with_capacity(table.rows.len());
        let mut deleted = 0u64;
        for row in std::mem::take(&mut table.rows) {
            if table.matches(&row, &query.filter)? {
                deleted += 1;
            } else {
                kept.push(row);
            }
        }
        table.rows = kept;
        Ok(deleted)
    }

    async fn truncate(&self, table: &TableRef) -> Result<()> {
        self.open_session();
        let mut state = self.state.lock().unwrap();
        let contents = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Self::unknown_table(table))?;
        contents.rows.clear();
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        self.open_session();
        Ok(self.state.lock().unwrap().tables.contains_key(table))
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        assert_eq!(query.kind, QueryKind::Count);
        self.open_session();
        Ok(self.filtered(query)?.rows.len() as u64)
    }
}

struct MemReader {
    columns: Vec<Column>,
    rows: VecDeque<Vec<Cell>>,
    batch_size: usize,
    max_batch_bytes: Option<usize>,
    oom: Option<OomRule>,
    index: usize,
}

#[async_trait]
impl BatchReader for MemReader {
    async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.rows.is_empty() {
            return Ok(None);
        }
        if let Some(rule) = self.oom {
            if self.batch_size > rule.above_batch_size && self.index == rule.at_batch {
                return Err(TransferError::ResourceExhausted {
                    batch_size: self.batch_size,
                    reason: "simulated allocation failure".to_string(),
                });
            }
        }

        let mut builder = BatchBuilder::new(
            self.columns.clone(),
            self.batch_size,
            self.max_batch_bytes,
        )?;
        while !builder.is_full() {
            match self.rows.pop_front() {
                Some(row) => builder.push_row(row)?,
                None => break,
            }
        }
        self.index += 1;
        Ok(Some(builder.finish()))
    }
}

struct MemWriter {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BatchWriter for MemWriter {
    async fn write_batch(
        &mut self,
        table: &TableRef,
        batch: &Batch,
        behavior: WriteBehavior,
    ) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let exists = state.tables.contains_key(table);

        match behavior {
            WriteBehavior::Fail if exists => {
                return Err(TransferError::TargetExists {
                    schema: table.schema.clone(),
                    table: table.name.clone(),
                })
            }
            WriteBehavior::Fail | WriteBehavior::Replace => {
                state.tables.insert(
                    table.clone(),
                    MemTable {
                        columns: batch.columns.clone(),
                        rows: Vec::new(),
                    },
                );
            }
            WriteBehavior::Append => {
                state.tables.entry(table.clone()).or_insert_with(|| MemTable {
                    columns: batch.columns.clone(),
                    rows: Vec::new(),
                });
            }
        }

        if let Some(contents) = state.tables.get_mut(table) {
            contents.rows.extend(batch.rows.iter().cloned());
        }
        state.writes.push((table.clone(), batch.len(), behavior));
        Ok(batch.len() as u64)
    }
}
