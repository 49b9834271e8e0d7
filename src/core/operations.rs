// ─── IPC-facing operations ───
// Every operation returns a serializable result object; failures are folded
// into `success: false` plus a readable message instead of an error.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::core::error::{EngineError, ErrorKind};
use crate::core::events::Reporter;
use crate::core::registry::{TargetPlatform, VariantId};
use crate::core::state::AppState;
use crate::core::supervisor::{EngineExit, EngineStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResponse {
    pub success: bool,
    pub engine_type: Option<VariantId>,
    pub path: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInstalledResponse {
    pub installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResponse {
    pub success: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl RemoveResponse {
    fn failed(err: &EngineError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSwitchResponse {
    pub success: bool,
    pub engine_type: Option<VariantId>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl EngineSwitchResponse {
    fn from_result(result: Result<VariantId, EngineError>) -> Self {
        match result {
            Ok(id) => Self {
                success: true,
                engine_type: Some(id),
                error: None,
                error_kind: None,
            },
            Err(err) => Self {
                success: false,
                engine_type: None,
                error: Some(err.to_string()),
                error_kind: Some(err.kind()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentEngineResponse {
    pub engine_type: Option<VariantId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    pub id: VariantId,
    pub name: String,
    pub description: String,
    pub recommended: bool,
    pub gpu: bool,
    pub platform: TargetPlatform,
    pub parts: usize,
    pub installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusResponse {
    pub status: EngineStatus,
    pub engine_type: Option<VariantId>,
    pub pid: Option<u32>,
    pub healthy: bool,
    pub last_exit: Option<EngineExit>,
}

fn parse_variant(state: &AppState, raw: &str) -> Result<VariantId, EngineError> {
    state.registry.resolve(raw).map(|variant| variant.id)
}

/// Download and install a variant; on success it becomes the selection.
pub async fn install(state: &AppState, engine_type: &str, reporter: &Reporter) -> InstallResponse {
    info!("Starting engine download: {}", engine_type);
    let result = match parse_variant(state, engine_type) {
        Ok(id) => state.installer.install(id, reporter).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(outcome) => {
            state.supervisor.set_selection(outcome.variant).await;
            InstallResponse {
                success: true,
                engine_type: Some(outcome.variant),
                path: Some(outcome.path.to_string_lossy().to_string()),
                error: None,
                error_kind: None,
            }
        }
        Err(err) => {
            error!("Engine download error: {}", err);
            InstallResponse {
                success: false,
                engine_type: None,
                path: None,
                error: Some(err.to_string()),
                error_kind: Some(err.kind()),
            }
        }
    }
}

pub fn check_installed(state: &AppState, engine_type: &str) -> CheckInstalledResponse {
    let installed = match parse_variant(state, engine_type) {
        Ok(id) => state.installations.check_installed(id),
        Err(err) => {
            warn!("Check engine error: {}", err);
            false
        }
    };
    CheckInstalledResponse { installed }
}

pub fn list_installed(state: &AppState) -> Vec<VariantId> {
    state.installations.detect_installed()
}

/// Delete an installed variant, stopping it first when it is the running one.
pub async fn remove(state: &AppState, engine_type: &str) -> RemoveResponse {
    info!("Removing engine: {}", engine_type);
    let id = match parse_variant(state, engine_type) {
        Ok(id) => id,
        Err(err) => return RemoveResponse::failed(&err),
    };

    if state.supervisor.active_variant().await == Some(id) {
        info!("Engine {} is running, stopping it before removal", id);
        state.supervisor.stop().await;
    }

    match state.installations.remove(id) {
        Ok(removed) => {
            if removed {
                state.supervisor.clear_selection_if(id).await;
            }
            RemoveResponse {
                success: removed,
                error: None,
                error_kind: None,
            }
        }
        Err(err) => {
            error!("Remove engine error: {}", err);
            RemoveResponse::failed(&err)
        }
    }
}

pub async fn switch(state: &AppState, engine_type: &str) -> EngineSwitchResponse {
    info!("Switching to engine: {}", engine_type);
    let result = match parse_variant(state, engine_type) {
        Ok(id) => state.supervisor.switch(id).await,
        Err(err) => Err(err),
    };
    if let Err(err) = &result {
        error!("Switch engine error: {}", err);
    }
    EngineSwitchResponse::from_result(result)
}

pub async fn get_current(state: &AppState) -> CurrentEngineResponse {
    CurrentEngineResponse {
        engine_type: state.supervisor.resolve_active_variant().await,
    }
}

pub async fn restart(state: &AppState) -> EngineSwitchResponse {
    info!("Restarting engine...");
    let result = state.supervisor.restart().await;
    if let Err(err) = &result {
        error!("Restart engine error: {}", err);
    }
    EngineSwitchResponse::from_result(result)
}

/// Catalog for the setup wizard, with the installed flag probed per variant.
pub fn list_variants(state: &AppState) -> Vec<VariantSummary> {
    state
        .registry
        .all()
        .map(|(id, variant)| VariantSummary {
            id,
            name: variant.name.clone(),
            description: variant.description.clone(),
            recommended: variant.recommended,
            gpu: variant.is_gpu(),
            platform: variant.platform,
            parts: variant.part_count(),
            installed: state.installations.check_installed(id),
        })
        .collect()
}

pub async fn engine_status(state: &AppState) -> EngineStatusResponse {
    let supervisor = &state.supervisor;
    let status = supervisor.status().await;
    let healthy = match status {
        EngineStatus::Starting | EngineStatus::Running => supervisor.health().await,
        EngineStatus::Stopped | EngineStatus::Stopping => false,
    };

    EngineStatusResponse {
        status,
        engine_type: supervisor.active_variant().await,
        pid: supervisor.active_pid().await,
        healthy,
        last_exit: supervisor.last_exit().await,
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    use super::*;
    use crate::core::config::EngineConfig;
    use crate::core::events::testing::Recorder;
    use crate::core::events::TracingLog;
    use crate::core::extract::zip_archive::tests::write_zip;
    use crate::core::extract::ZipExtractor;
    use crate::core::platform::entry_point_file_name;
    use crate::core::registry::{EngineRegistry, EngineVariant};

    async fn serve_zip(payload: Vec<u8>) -> SocketAddr {
        let app = Router::new()
            .route(
                "/cpu.zip",
                get(move || {
                    let payload = payload.clone();
                    async move { (StatusCode::OK, payload) }
                }),
            )
            .route("/gone.zip", get(|| async { (StatusCode::NOT_FOUND, Vec::new()) }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn engine_zip() -> Vec<u8> {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join("engine.zip");
        let entry = format!("voicevox_engine-cpu-0.25.0/{}", entry_point_file_name());
        write_zip(
            &path,
            &[
                ("voicevox_engine-cpu-0.25.0/", b""),
                (entry.as_str(), b"#!/bin/sh\nexec sleep 30\n"),
                ("voicevox_engine-cpu-0.25.0/model/metas.json", b"[]"),
            ],
        );
        std::fs::read(path).unwrap()
    }

    fn state_for(dir: &Path, addr: SocketAddr) -> AppState {
        let registry = EngineRegistry::new(vec![
            EngineVariant {
                id: VariantId::Cuda,
                name: "CUDA".into(),
                description: String::new(),
                recommended: true,
                platform: TargetPlatform::current(),
                urls: vec![format!("http://{addr}/gone.zip")],
            },
            EngineVariant {
                id: VariantId::Cpu,
                name: "CPU".into(),
                description: String::new(),
                recommended: false,
                platform: TargetPlatform::current(),
                urls: vec![format!("http://{addr}/cpu.zip")],
            },
        ])
        .unwrap();
        let config = EngineConfig {
            engine_dir: Some(dir.join("engines")),
            min_free_disk_bytes: 0,
            startup_grace_ms: 100,
            ..EngineConfig::default()
        };
        AppState::assemble(
            dir.to_path_buf(),
            config,
            Arc::new(registry),
            Arc::new(ZipExtractor),
            Arc::new(TracingLog),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn install_lays_out_engine_and_selects_it() {
        let addr = serve_zip(engine_zip()).await;
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), addr);
        let recorder = Arc::new(Recorder::default());

        let response = install(&state, "cpu", &recorder.reporter()).await;

        assert!(response.success, "{response:?}");
        assert_eq!(response.engine_type, Some(VariantId::Cpu));
        assert_eq!(response.error_kind, None);
        assert!(check_installed(&state, "cpu").installed);
        assert!(dir.path().join("engines/cpu/model/metas.json").is_file());
        assert_eq!(list_installed(&state), vec![VariantId::Cpu]);
        assert_eq!(get_current(&state).await.engine_type, Some(VariantId::Cpu));
        assert_eq!(recorder.overall_progress().last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn failed_install_reports_error_and_keeps_selection() {
        let addr = serve_zip(engine_zip()).await;
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), addr);

        let response = install(&state, "cuda", &Reporter::tracing()).await;

        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ErrorKind::Network));
        assert!(response.error.unwrap().contains("404"));
        assert_eq!(state.supervisor.current_selection().await, None);
        assert!(!check_installed(&state, "cuda").installed);
    }

    #[tokio::test]
    async fn unknown_identifiers_are_readable_failures() {
        let addr = serve_zip(Vec::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), addr);

        let installed = install(&state, "tpu", &Reporter::tracing()).await;
        assert!(!installed.success);
        assert_eq!(installed.error.as_deref(), Some("Unknown engine type: tpu"));
        assert_eq!(installed.error_kind, Some(ErrorKind::UnknownVariant));

        assert!(!check_installed(&state, "tpu").installed);
        let removed = remove(&state, "tpu").await;
        assert!(!removed.success);
        assert_eq!(removed.error_kind, Some(ErrorKind::UnknownVariant));

        let switched = switch(&state, "tpu").await;
        assert!(!switched.success);
        assert_eq!(switched.engine_type, None);
        assert_eq!(switched.error_kind, Some(ErrorKind::UnknownVariant));
    }

    #[tokio::test]
    async fn nothing_installed_reports_empty_state() {
        let addr = serve_zip(Vec::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), addr);

        assert!(list_installed(&state).is_empty());
        assert_eq!(get_current(&state).await.engine_type, None);
        assert!(!remove(&state, "cpu").await.success);

        let restarted = restart(&state).await;
        assert!(!restarted.success);
        assert_eq!(restarted.error.as_deref(), Some("No engine installed"));
        assert_eq!(restarted.error_kind, Some(ErrorKind::EngineNotFound));

        let status = engine_status(&state).await;
        assert_eq!(status.status, EngineStatus::Stopped);
        assert!(!status.healthy);
        assert_eq!(status.pid, None);
    }

    #[tokio::test]
    async fn variant_catalog_reflects_installs() {
        let addr = serve_zip(engine_zip()).await;
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), addr);
        install(&state, "cpu", &Reporter::tracing()).await;

        let catalog = list_variants(&state);
        assert_eq!(catalog.len(), 2);
        let cpu = catalog.iter().find(|v| v.id == VariantId::Cpu).unwrap();
        assert!(cpu.installed);
        assert!(!cpu.gpu);
        let cuda = catalog.iter().find(|v| v.id == VariantId::Cuda).unwrap();
        assert!(!cuda.installed);
        assert!(cuda.gpu);

        let json = serde_json::to_value(cpu).unwrap();
        assert_eq!(json["id"], "cpu");
        assert_eq!(json["installed"], true);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn removing_the_running_engine_stops_it_first() {
        let addr = serve_zip(engine_zip()).await;
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), addr);
        assert!(install(&state, "cpu", &Reporter::tracing()).await.success);

        let switched = switch(&state, "cpu").await;
        assert!(switched.success, "{switched:?}");
        let status = engine_status(&state).await;
        assert_eq!(status.engine_type, Some(VariantId::Cpu));
        let pid = status.pid.unwrap();

        let removed = remove(&state, "cpu").await;

        assert!(removed.success);
        assert_eq!(state.supervisor.active_pid().await, None);
        assert!(!dir.path().join("engines/cpu").exists());
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        assert!(!alive);
        assert_eq!(get_current(&state).await.engine_type, None);
    }

    #[test]
    fn responses_use_ipc_field_names() {
        let json = serde_json::to_value(InstallResponse {
            success: true,
            engine_type: Some(VariantId::DirectMl),
            path: Some("/engines/directml".into()),
            error: None,
            error_kind: None,
        })
        .unwrap();
        assert_eq!(json["engineType"], "directml");
        assert_eq!(json["path"], "/engines/directml");
        assert!(json["errorKind"].is_null());

        let failed = serde_json::to_value(EngineSwitchResponse::from_result(Err(
            EngineError::ExtractorMissing {
                tool: "7-Zip".into(),
                guidance: "Install 7-Zip".into(),
            },
        )))
        .unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["errorKind"], "extraction");

        let current = serde_json::to_value(CurrentEngineResponse { engine_type: None }).unwrap();
        assert!(current["engineType"].is_null());
    }
}
