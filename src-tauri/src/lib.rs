//! ocrdesk - Tauri Application
//!
//! The WebView renders; Rust owns the OCR session and all settings.

mod commands;
mod state;

use state::AppState;
use tauri::{Manager, WebviewUrl, WebviewWindowBuilder};

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // Initialize logging
    ocrdesk_core::init_logging();

    tauri::Builder::default()
        .setup(|app| {
            let state = AppState::new()?;
            state.initialize()?;
            app.manage(state);

            WebviewWindowBuilder::new(app, "main", WebviewUrl::App("index.html".into()))
                .title("ocrdesk")
                .inner_size(1200.0, 800.0)
                .min_inner_size(800.0, 600.0)
                .center()
                .build()?;

            tracing::info!("ocrdesk started");

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Diagnostics
            commands::diagnostics::frontend_ready,
            commands::diagnostics::quit_app,
            // Ollama server
            commands::ollama::check_connection,
            commands::ollama::get_models,
            // Settings
            commands::settings::get_settings,
            commands::settings::set_model,
            // OCR session
            commands::ocr::run_ocr,
            commands::ocr::abort_ocr,
        ])
        .run(tauri::generate_context!())
        .expect("error while running ocrdesk");
}
