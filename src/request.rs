// ABOUTME: TransferRequest - everything one invocation needs, built once and read-only afterwards
// ABOUTME: Applies the landing-table and target-schema defaults and validates before any I/O

use crate::error::{Result, TransferError};
use crate::query::{RangeFilter, TableRef};
use crate::transfer::WriteBehavior;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Prefix for the default target table name.
pub const LANDING_PREFIX: &str = "landing__";

/// `landing__<source_table>`
pub fn default_target_table(source_table: &str) -> String {
    format!("{}{}", LANDING_PREFIX, source_table)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source_table: TableRef,
    pub target_table: TableRef,
    pub filter: RangeFilter,
    pub batch_size: usize,
    pub initial_behavior: WriteBehavior,
    /// Delete the filtered window from the target before copying.
    pub delete_window: bool,
    /// Empty the whole target table before copying.
    pub truncate: bool,
    /// Optional cap on raw bytes buffered per batch.
    pub max_batch_bytes: Option<usize>,
}

impl TransferRequest {
    /// A request with every default applied: target `schema.landing__<table>`,
    /// no filter, batch size 10000, `fail` on an existing target.
    pub fn new(source_schema: impl Into<String>, source_table: impl Into<String>) -> Self {
        let source_table = TableRef::new(source_schema, source_table);
        let target_table = TableRef::new(
            source_table.schema.clone(),
            default_target_table(&source_table.name),
        );
        Self {
            source_table,
            target_table,
            filter: RangeFilter::all(),
            batch_size: DEFAULT_BATCH_SIZE,
            initial_behavior: WriteBehavior::Fail,
            delete_window: false,
            truncate: false,
            max_batch_bytes: None,
        }
    }

    /// Override the target; `None` keeps the respective default.
    pub fn with_target(mut self, schema: Option<String>, table: Option<String>) -> Self {
        if let Some(schema) = schema.filter(|s| !s.is_empty()) {
            self.target_table.schema = schema;
        }
        if let Some(table) = table.filter(|t| !t.is_empty()) {
            self.target_table.name = table;
        }
        self
    }

    pub fn with_filter(mut self, filter: RangeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_initial_behavior(mut self, behavior: WriteBehavior) -> Self {
        self.initial_behavior = behavior;
        self
    }

    pub fn with_delete_window(mut self, delete_window: bool) -> Self {
        self.delete_window = delete_window;
        self
    }

    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn with_max_batch_bytes(mut self, max_batch_bytes: Option<usize>) -> Self {
        self.max_batch_bytes = max_batch_bytes;
        self
    }

    /// Whether the target is cleared before the transfer starts.
    pub fn pre_clears_target(&self) -> bool {
        self.delete_window || self.truncate
    }

    pub fn validate(&self) -> Result<()> {
        self.source_table.validate()?;
        self.target_table.validate()?;

        if self.batch_size == 0 {
            return Err(TransferError::config(
                "Batch size must be a positive integer",
            ));
        }
        if self.max_batch_bytes == Some(0) {
            return Err(TransferError::config(
                "Max batch bytes must be a positive integer when set",
            ));
        }
        if self.delete_window && self.truncate {
            return Err(TransferError::config(
                "--delete-window and --truncate cannot be combined; truncate already clears the window",
            ));
        }

        Ok(())
    }
}
