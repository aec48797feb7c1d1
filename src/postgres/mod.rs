// ABOUTME: PostgreSQL implementation of the transfer endpoint
// ABOUTME: Connections, cursor-based batch reads, per-batch transactional writes

pub mod connection;
pub mod reader;
pub mod value;
pub mod writer;

pub use connection::{
    connect, connect_with_retry, ConnectionHandle, ConnectionProvider, TlsPolicy,
};
pub use reader::CursorReader;
pub use writer::{table_exists, TableWriter};
