//! Settings commands

use serde::Serialize;
use tauri::State;

use super::CommandResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SettingsInfo {
    pub model: String,
    pub default_model: String,
    pub ollama_url: String,
}

impl From<&ocrdesk_core::OcrDesk> for SettingsInfo {
    fn from(desk: &ocrdesk_core::OcrDesk) -> Self {
        Self {
            model: desk.selected_model(),
            default_model: desk.config().session.default_model.clone(),
            ollama_url: desk.config().ollama_url.clone(),
        }
    }
}

#[tauri::command]
pub fn get_settings(state: State<'_, AppState>) -> CommandResult<SettingsInfo> {
    CommandResult::ok(SettingsInfo::from(&state.desk()))
}

#[tauri::command]
pub fn set_model(state: State<'_, AppState>, model: String) -> CommandResult<SettingsInfo> {
    let desk = state.desk();
    match desk.set_model(&model) {
        Ok(()) => CommandResult::ok(SettingsInfo::from(&desk)),
        Err(e) => CommandResult::err(e.to_string()),
    }
}
