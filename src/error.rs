// ABOUTME: Typed error taxonomy for the transfer core
// ABOUTME: Classifies driver failures by SQLSTATE so the retry policy can act on them

use thiserror::Error;
use tokio_postgres::error::SqlState;

pub type Result<T> = std::result::Result<T, TransferError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Malformed filter pair, invalid identifier, missing environment variable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A connection role name that is not registered with the provider.
    #[error("Unknown connection role '{role}' (known roles: {known})")]
    UnknownRole { role: String, known: String },

    #[error("Table {schema}.{table} does not exist")]
    UnknownTable { schema: String, table: String },

    /// First batch written with `fail` against a table that is already there.
    #[error("Target table {schema}.{table} already exists (initial write behavior is 'fail')")]
    TargetExists { schema: String, table: String },

    /// Out of memory while materializing a batch. The only recoverable error.
    #[error("Resource exhausted while buffering a batch of {batch_size} rows: {reason}")]
    ResourceExhausted { batch_size: usize, reason: String },

    /// Source or target unreachable, statement rejected.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl TransferError {
    pub fn config(message: impl Into<String>) -> Self {
        TransferError::Configuration(message.into())
    }

    pub fn transport(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        TransferError::Transport {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, TransferError::ResourceExhausted { .. })
    }

    /// Map a driver error onto the taxonomy.
    ///
    /// `schema`/`table` name the relation the statement touched, used when the
    /// server reports it as undefined.
    pub fn from_postgres(
        err: tokio_postgres::Error,
        context: impl Into<String>,
        schema: &str,
        table: &str,
        batch_size: usize,
    ) -> Self {
        let code = err.code().cloned();
        match code {
            Some(code) if code == SqlState::UNDEFINED_TABLE => TransferError::UnknownTable {
                schema: schema.to_string(),
                table: table.to_string(),
            },
            Some(code) if code == SqlState::OUT_OF_MEMORY => TransferError::ResourceExhausted {
                batch_size,
                reason: err.to_string(),
            },
            _ => TransferError::transport(context, err),
        }
    }
}
