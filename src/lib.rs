// ABOUTME: Library root for db-to-db - chunked copy of a filtered table slice into a landing table
// ABOUTME: Exposes the transfer core (query, engine, retry) and its PostgreSQL endpoint

pub mod batch;
pub mod config;
pub mod delete_window;
pub mod endpoint;
pub mod error;
pub mod postgres;
pub mod query;
pub mod request;
pub mod retry;
pub mod transfer;
pub mod utils;
pub mod verify;

pub use error::{Result, TransferError};
pub use request::TransferRequest;
pub use retry::{RetryController, TransferReport};
pub use transfer::{TransferEngine, WriteBehavior};
