use std::sync::Arc;

use tauri::Emitter;
use tracing::info;

use crate::core::error::EngineError;
use crate::core::events::{ProgressEvent, Reporter};
use crate::core::operations::{
    self, CheckInstalledResponse, CurrentEngineResponse, EngineStatusResponse,
    EngineSwitchResponse, InstallResponse, RemoveResponse, VariantSummary,
};
use crate::core::registry::VariantId;
use crate::core::state::AppState;

const PROGRESS_EVENT: &str = "engine-download-progress";
const LOG_EVENT: &str = "engine-download-log";

type SharedState<'a> = tauri::State<'a, Arc<AppState>>;

/// Reporter that mirrors install progress and log lines to the window.
fn download_reporter(app_handle: &tauri::AppHandle) -> Reporter {
    let progress_handle = app_handle.clone();
    let log_handle = app_handle.clone();
    Reporter::new(
        Arc::new(move |event: ProgressEvent| {
            let _ = progress_handle.emit(PROGRESS_EVENT, event);
        }),
        Arc::new(move |line: &str| {
            info!("[Engine Download] {}", line);
            let _ = log_handle.emit(LOG_EVENT, line.to_string());
        }),
    )
}

#[tauri::command]
pub async fn download_engine(
    app_handle: tauri::AppHandle,
    state: SharedState<'_>,
    engine_type: String,
) -> Result<InstallResponse, EngineError> {
    let reporter = download_reporter(&app_handle);
    Ok(operations::install(&state, &engine_type, &reporter).await)
}

#[tauri::command]
pub async fn check_engine_installed(
    state: SharedState<'_>,
    engine_type: String,
) -> Result<CheckInstalledResponse, EngineError> {
    Ok(operations::check_installed(&state, &engine_type))
}

#[tauri::command]
pub async fn get_installed_engines(state: SharedState<'_>) -> Result<Vec<VariantId>, EngineError> {
    Ok(operations::list_installed(&state))
}

#[tauri::command]
pub async fn remove_engine(
    state: SharedState<'_>,
    engine_type: String,
) -> Result<RemoveResponse, EngineError> {
    Ok(operations::remove(&state, &engine_type).await)
}

#[tauri::command]
pub async fn switch_engine(
    state: SharedState<'_>,
    engine_type: String,
) -> Result<EngineSwitchResponse, EngineError> {
    Ok(operations::switch(&state, &engine_type).await)
}

#[tauri::command]
pub async fn get_current_engine(
    state: SharedState<'_>,
) -> Result<CurrentEngineResponse, EngineError> {
    Ok(operations::get_current(&state).await)
}

#[tauri::command]
pub async fn restart_engine(state: SharedState<'_>) -> Result<EngineSwitchResponse, EngineError> {
    Ok(operations::restart(&state).await)
}

#[tauri::command]
pub async fn list_engine_variants(
    state: SharedState<'_>,
) -> Result<Vec<VariantSummary>, EngineError> {
    Ok(operations::list_variants(&state))
}

#[tauri::command]
pub async fn get_engine_status(
    state: SharedState<'_>,
) -> Result<EngineStatusResponse, EngineError> {
    Ok(operations::engine_status(&state).await)
}
