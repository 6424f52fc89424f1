use tauri::AppHandle;

use super::CommandResult;

#[tauri::command]
pub fn frontend_ready() -> CommandResult<()> {
    tracing::info!("Frontend ready");
    CommandResult::ok(())
}

#[tauri::command]
pub fn quit_app(app: AppHandle) {
    tracing::info!("Quit requested by frontend");
    app.exit(0);
}
