//! ocrdesk OCR session
//!
//! Drives one generation request at a time against a local Ollama server:
//! - Single-flight: a new run supersedes the one in flight
//! - Streams text deltas to the caller as they arrive
//! - Stops early when the model collapses into repetition
//! - Cancellable from any task, releasing the HTTP request before returning

mod client;
mod error;
mod request;
mod session;
mod transport;

pub use client::{ModelInfo, OllamaClient};
pub use error::{ErrorKind, OcrError};
pub use request::{GenerateOptions, GenerateRequest, OcrRequest, SessionConfig};
pub use session::{OcrSession, RunOutcome, SessionEvent, SessionState};
pub use transport::{ByteStream, Transport};

pub use ocrdesk_stream::{RepetitionConfig, RepetitionReason};

pub type Result<T> = std::result::Result<T, OcrError>;
