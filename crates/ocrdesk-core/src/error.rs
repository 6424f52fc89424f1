//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] ocrdesk_storage::StorageError),

    #[error(transparent)]
    Ocr(#[from] ocrdesk_session::OcrError),

    #[error("Configuration error: {0}")]
    Config(String),
}
