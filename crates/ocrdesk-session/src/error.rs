//! OCR session error types

use ocrdesk_stream::RepetitionReason;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OcrError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Ollama API Error: {status} {body}")]
    Api { status: u16, body: String },

    #[error("{0}")]
    Server(String),

    #[error("No response body")]
    MissingBody,

    #[error("Generation stopped due to repetition ({0})")]
    RepetitionDetected(RepetitionReason),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid server URL: {0}")]
    InvalidServerUrl(String),
}

/// Coarse grouping used by the UI to pick how a failure is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server could not be reached or the connection broke
    Transport,
    /// The server answered with an error
    Protocol,
    /// Generation was stopped on purpose; the user may retry or switch model
    Repetition,
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Repetition => "repetition",
            ErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

impl OcrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcrError::Transport(_) => ErrorKind::Transport,
            OcrError::Api { .. } | OcrError::Server(_) | OcrError::MissingBody => {
                ErrorKind::Protocol
            }
            OcrError::RepetitionDetected(_) => ErrorKind::Repetition,
            OcrError::InvalidRequest(_) | OcrError::InvalidServerUrl(_) => {
                ErrorKind::InvalidRequest
            }
        }
    }
}

impl From<reqwest::Error> for OcrError {
    fn from(err: reqwest::Error) -> Self {
        OcrError::Transport(err.to_string())
    }
}
