#[cfg(feature = "desktop")]
mod commands;
pub mod core;

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,yomiage_lib=debug")),
        )
        .try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use std::sync::Arc;

    use tauri::Manager;

    use crate::core::config::default_data_dir;
    use crate::core::state::AppState;

    init_tracing();
    tracing::info!("Yomiage starting...");

    tauri::Builder::default()
        .setup(|app| {
            let state = Arc::new(AppState::load(
                default_data_dir(),
                app.path().resource_dir().ok(),
            )?);
            app.manage(state.clone());

            tauri::async_runtime::spawn(async move {
                state.supervisor.boot().await;
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::download_engine,
            commands::check_engine_installed,
            commands::get_installed_engines,
            commands::remove_engine,
            commands::switch_engine,
            commands::get_current_engine,
            commands::restart_engine,
            commands::list_engine_variants,
            commands::get_engine_status,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app, event| {
            if let tauri::RunEvent::Exit = event {
                let state = app.state::<Arc<AppState>>().inner().clone();
                tauri::async_runtime::block_on(async move {
                    state.supervisor.shutdown().await;
                });
            }
        });
}
