//! ocrdesk Core
//!
//! Central coordination layer: owns configuration, persisted settings, the
//! Ollama client and the single OCR session the UI bridge talks to.

mod config;
mod desk;
mod error;

pub use config::Config;
pub use desk::OcrDesk;
pub use error::CoreError;

// Re-export core components
pub use ocrdesk_session::{
    ErrorKind, ModelInfo, OcrError, OcrRequest, OcrSession, OllamaClient, RepetitionConfig,
    RepetitionReason, RunOutcome, SessionConfig, SessionEvent, SessionState,
};
pub use ocrdesk_storage::{Database, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
