//! ocrdesk Storage Layer
//!
//! SQLite-backed key/value settings that survive restarts (selected model,
//! and anything else the UI chooses to remember).

mod database;
mod error;
mod migrations;

pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
