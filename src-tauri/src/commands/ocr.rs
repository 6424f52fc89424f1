//! OCR session commands
//!
//! Events emitted while a run is in flight:
//! - `ocr-chunk`: newly generated text (string)
//! - `ocr-error`: terminal failure (`OcrFailureInfo`)
//! - `ocr-complete`: terminal success
//! - `ocr-cancelled`: terminal, after `abort_ocr`

use serde::Serialize;
use tauri::{AppHandle, Emitter, Manager};

use ocrdesk_core::{CoreError, OcrError, RunOutcome, SessionEvent};

use super::CommandResult;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct OcrFailureInfo {
    /// `transport`, `protocol`, `repetition` or `invalid_request`
    pub kind: String,
    pub message: String,
}

impl From<&OcrError> for OcrFailureInfo {
    fn from(error: &OcrError) -> Self {
        Self {
            kind: error.kind().as_str().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OcrRunInfo {
    /// `completed`, `failed`, `cancelled` or `superseded`
    pub status: String,
    pub text: Option<String>,
    pub error: Option<OcrFailureInfo>,
}

impl From<RunOutcome> for OcrRunInfo {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed { text } => Self {
                status: "completed".to_string(),
                text: Some(text),
                error: None,
            },
            RunOutcome::Failed { error, text } => Self {
                status: "failed".to_string(),
                text: Some(text),
                error: Some(OcrFailureInfo::from(&error)),
            },
            RunOutcome::Cancelled { text } => Self {
                status: "cancelled".to_string(),
                text: Some(text),
                error: None,
            },
            RunOutcome::Superseded => Self {
                status: "superseded".to_string(),
                text: None,
                error: None,
            },
        }
    }
}

fn emit_session_event(app: &AppHandle, event: SessionEvent) {
    let result = match event {
        SessionEvent::Chunk(text) => app.emit("ocr-chunk", text),
        SessionEvent::Failed(error) => app.emit("ocr-error", OcrFailureInfo::from(&error)),
        SessionEvent::Completed => app.emit("ocr-complete", ()),
        SessionEvent::Cancelled => app.emit("ocr-cancelled", ()),
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "Failed to emit OCR event");
    }
}

#[tauri::command]
pub async fn run_ocr(
    app: AppHandle,
    image_base64: String,
    model: Option<String>,
) -> CommandResult<OcrRunInfo> {
    let desk = app.state::<AppState>().desk();
    let emitter = app.clone();

    let result = desk
        .run_ocr(image_base64, model, move |event| {
            emit_session_event(&emitter, event)
        })
        .await;

    match result {
        Ok(outcome) => CommandResult::ok(outcome.into()),
        Err(e) => {
            // The run never started; report it the same way as a failed run
            if let CoreError::Ocr(error) = &e {
                emit_session_event(&app, SessionEvent::Failed(error.clone()));
            }
            CommandResult::err(e.to_string())
        }
    }
}

#[tauri::command]
pub async fn abort_ocr(app: AppHandle) -> CommandResult<()> {
    let desk = app.state::<AppState>().desk();
    desk.abort_ocr().await;
    CommandResult::ok(())
}
