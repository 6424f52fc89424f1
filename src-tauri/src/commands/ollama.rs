//! Ollama server commands

use tauri::{AppHandle, Manager};

use super::CommandResult;
use crate::state::AppState;

#[tauri::command]
pub async fn check_connection(app: AppHandle) -> CommandResult<bool> {
    let desk = app.state::<AppState>().desk();
    CommandResult::ok(desk.check_connection().await)
}

#[tauri::command]
pub async fn get_models(app: AppHandle) -> CommandResult<Vec<ocrdesk_core::ModelInfo>> {
    let desk = app.state::<AppState>().desk();
    match desk.list_models().await {
        Ok(models) => CommandResult::ok(models),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to fetch models");
            CommandResult::err(e.to_string())
        }
    }
}
