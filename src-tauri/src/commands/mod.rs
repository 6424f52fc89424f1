//! Tauri IPC Commands
//!
//! These commands bridge the frontend to the Rust core.

use serde::Serialize;

pub mod diagnostics;
pub mod ocr;
pub mod ollama;
pub mod settings;

#[derive(Debug, Serialize)]
pub struct CommandResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}
