// ─── Engine supervisor ───
// Owns the single running engine process and the current variant selection.
//
// The child handle lives in one monitor task per launch. The supervisor keeps
// only the pid and a stop channel; the monitor either observes an unexpected
// exit (recorded as a crash) or performs the requested termination.

pub mod health;
pub mod process;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::process::Child;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::core::events::{LogSink, TracingLog};
use crate::core::http::build_probe_client;
use crate::core::installations::Installations;
use crate::core::registry::VariantId;

use process::Stream;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "lowercase")]
pub enum EngineExit {
    Requested,
    Crashed { code: Option<i32> },
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub host: String,
    pub port: u16,
    pub startup_grace: Duration,
    pub stop_grace: Duration,
    pub default_variant: VariantId,
}

impl SupervisorOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            startup_grace: config.startup_grace(),
            stop_grace: config.stop_grace(),
            default_variant: config.default_variant,
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

struct ActiveEngine {
    variant: VariantId,
    pid: u32,
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<()>,
}

struct SupervisorState {
    selection: Option<VariantId>,
    status: EngineStatus,
    active: Option<ActiveEngine>,
    last_exit: Option<EngineExit>,
}

pub struct EngineSupervisor {
    installations: Arc<Installations>,
    options: SupervisorOptions,
    log: Arc<dyn LogSink>,
    probe: Client,
    state: Arc<Mutex<SupervisorState>>,
    // serializes start/stop/switch/restart
    lifecycle: Mutex<()>,
    generation: AtomicU64,
}

impl EngineSupervisor {
    pub fn new(installations: Arc<Installations>, options: SupervisorOptions) -> EngineResult<Self> {
        Ok(Self {
            installations,
            options,
            log: Arc::new(TracingLog),
            probe: build_probe_client(HEALTH_TIMEOUT)?,
            state: Arc::new(Mutex::new(SupervisorState {
                selection: None,
                status: EngineStatus::Stopped,
                active: None,
                last_exit: None,
            })),
            lifecycle: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    /// Sink receiving the engine's stdout/stderr lines.
    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn installations(&self) -> &Installations {
        &self.installations
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub fn detect_installed(&self) -> Vec<VariantId> {
        self.installations.detect_installed()
    }

    /// Explicit selection if any, otherwise the first installed variant in
    /// preference order, which then becomes the selection.
    pub async fn resolve_active_variant(&self) -> Option<VariantId> {
        let mut state = self.state.lock().await;
        if let Some(selected) = state.selection {
            return Some(selected);
        }
        let detected = self.installations.preferred_installed();
        state.selection = detected;
        detected
    }

    pub async fn current_selection(&self) -> Option<VariantId> {
        self.state.lock().await.selection
    }

    pub async fn set_selection(&self, id: VariantId) {
        self.state.lock().await.selection = Some(id);
    }

    /// Forget the selection if it points at `id` (e.g. after removal).
    pub async fn clear_selection_if(&self, id: VariantId) {
        let mut state = self.state.lock().await;
        if state.selection == Some(id) {
            state.selection = None;
        }
    }

    pub async fn status(&self) -> EngineStatus {
        self.state.lock().await.status
    }

    pub async fn active_variant(&self) -> Option<VariantId> {
        self.state.lock().await.active.as_ref().map(|active| active.variant)
    }

    pub async fn active_pid(&self) -> Option<u32> {
        self.state.lock().await.active.as_ref().map(|active| active.pid)
    }

    pub async fn last_exit(&self) -> Option<EngineExit> {
        self.state.lock().await.last_exit
    }

    /// Whether the engine HTTP API answers on the configured address.
    pub async fn health(&self) -> bool {
        health::probe_version(&self.probe, &self.options.host, self.options.port)
            .await
            .is_some()
    }

    /// Start an engine. Without an explicit variant the selection (or the
    /// preferred installed variant) is used, falling back to the configured
    /// default. A running engine is stopped first.
    #[instrument(skip(self))]
    pub async fn start(&self, requested: Option<VariantId>) -> EngineResult<VariantId> {
        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked(requested).await
    }

    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// Record the new selection, then restart on it.
    #[instrument(skip(self))]
    pub async fn switch(&self, id: VariantId) -> EngineResult<VariantId> {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Switching engine to {}", id);
        self.state.lock().await.selection = Some(id);
        self.stop_locked().await;
        self.start_locked(Some(id)).await
    }

    /// Stop, re-detect by preference order and start again.
    #[instrument(skip(self))]
    pub async fn restart(&self) -> EngineResult<VariantId> {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
        let detected = self
            .installations
            .preferred_installed()
            .ok_or(EngineError::NoEngineInstalled)?;
        self.state.lock().await.selection = Some(detected);
        self.start_locked(Some(detected)).await
    }

    /// Application start-up: launch whatever is selected; failures are logged.
    pub async fn boot(&self) {
        match self.start(None).await {
            Ok(variant) => info!("VOICEVOX Engine ({}) started", variant),
            Err(err) => error!("Failed to start VOICEVOX Engine: {}", err),
        }
    }

    /// Application exit: terminate the engine if it is running.
    pub async fn shutdown(&self) {
        info!("Shutting down VOICEVOX Engine");
        self.stop().await;
    }

    async fn start_locked(&self, requested: Option<VariantId>) -> EngineResult<VariantId> {
        let variant = match requested {
            Some(id) => id,
            None => self
                .resolve_active_variant()
                .await
                .unwrap_or(self.options.default_variant),
        };

        if self.state.lock().await.active.is_some() {
            self.stop_locked().await;
        }

        let target = self.installations.target_dir(variant);
        if !self.installations.fs().is_dir(&target) {
            return Err(EngineError::EngineNotFound(target));
        }
        if let Err(err) = self.installations.repair(variant) {
            warn!("Could not repair engine layout in {:?}: {}", target, err);
        }
        self.state.lock().await.selection = Some(variant);

        let executable = self
            .installations
            .locate_entry_point(variant)
            .ok_or_else(|| EngineError::ExecutableNotFound(target.clone()))?;

        let args = process::engine_args(variant, &self.options.host, self.options.port);
        info!("Starting VOICEVOX Engine ({}): {:?} {:?}", variant, executable, args);
        let mut child = process::spawn_engine(&executable, &target, &args)?;
        let Some(pid) = child.id() else {
            return Err(EngineError::Other(
                "VOICEVOX Engine exited before its pid could be read".to_string(),
            ));
        };

        if let Some(stdout) = child.stdout.take() {
            process::forward_lines(stdout, variant, Stream::Stdout, self.log.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            process::forward_lines(stderr, variant, Stream::Stderr, self.log.clone());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            let monitor = tokio::spawn(monitor(
                child,
                pid,
                variant,
                generation,
                stop_rx,
                self.state.clone(),
                self.options.stop_grace,
            ));
            state.status = EngineStatus::Starting;
            state.active = Some(ActiveEngine {
                variant,
                pid,
                generation,
                stop_tx: Some(stop_tx),
                monitor,
            });
        }
        info!("VOICEVOX Engine process started (pid {})", pid);

        tokio::time::sleep(self.options.startup_grace).await;

        let mut state = self.state.lock().await;
        let still_ours = state
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);
        if still_ours {
            state.status = EngineStatus::Running;
        } else {
            warn!("VOICEVOX Engine ({}) exited during start-up", variant);
        }
        Ok(variant)
    }

    async fn stop_locked(&self) {
        let active = {
            let mut state = self.state.lock().await;
            let Some(active) = state.active.take() else {
                return;
            };
            state.status = EngineStatus::Stopping;
            active
        };

        info!("Stopping VOICEVOX Engine ({}, pid {})", active.variant, active.pid);
        let ActiveEngine {
            mut stop_tx,
            monitor,
            ..
        } = active;
        if let Some(tx) = stop_tx.take() {
            // the monitor may already be gone if the engine just exited
            let _ = tx.send(());
        }
        if let Err(err) = monitor.await {
            warn!("Engine monitor task failed: {}", err);
        }

        let mut state = self.state.lock().await;
        state.status = EngineStatus::Stopped;
        state.last_exit = Some(EngineExit::Requested);
        info!("VOICEVOX Engine stopped");
    }
}

async fn monitor(
    mut child: Child,
    pid: u32,
    variant: VariantId,
    generation: u64,
    stop_rx: oneshot::Receiver<()>,
    state: Arc<Mutex<SupervisorState>>,
    stop_grace: Duration,
) {
    tokio::select! {
        result = child.wait() => {
            let code = match result {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!("Could not wait on engine process {}: {}", pid, err);
                    None
                }
            };
            let mut state = state.lock().await;
            let ours = state
                .active
                .as_ref()
                .is_some_and(|active| active.generation == generation);
            if ours {
                state.active = None;
                state.status = EngineStatus::Stopped;
                state.last_exit = Some(EngineExit::Crashed { code });
                error!("VOICEVOX Engine ({}) exited unexpectedly with code {:?}", variant, code);
            }
        }
        // a dropped sender also ends the engine
        _ = stop_rx => {
            if let Err(err) = process::terminate(pid).await {
                warn!("{}", err);
            }
            match tokio::time::timeout(stop_grace, child.wait()).await {
                Ok(Ok(status)) => info!("VOICEVOX Engine ({}) exited with {:?}", variant, status.code()),
                Ok(Err(err)) => warn!("Could not wait on engine process {}: {}", pid, err),
                Err(_) => {
                    warn!("VOICEVOX Engine ({}) did not exit within {:?}, killing", variant, stop_grace);
                    if let Err(err) = child.kill().await {
                        warn!("Could not kill engine process {}: {}", pid, err);
                    }
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::core::platform::entry_point_file_name;
    use crate::core::registry::EngineRegistry;

    struct Fixture {
        _dir: tempfile::TempDir,
        engines: PathBuf,
        supervisor: EngineSupervisor,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let engines = dir.path().join("engines");
        std::fs::create_dir_all(&engines).unwrap();
        let installations = Arc::new(Installations::new(
            engines.clone(),
            Arc::new(EngineRegistry::builtin()),
        ));
        let options = SupervisorOptions {
            host: "127.0.0.1".to_string(),
            port: 50021,
            startup_grace: Duration::from_millis(100),
            stop_grace: Duration::from_secs(2),
            default_variant: VariantId::Cuda,
        };
        Fixture {
            _dir: dir,
            engines: engines.clone(),
            supervisor: EngineSupervisor::new(installations, options).unwrap(),
        }
    }

    fn write_script(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn install_fake(engines: &Path, id: VariantId) {
        write_script(&engines.join(id.as_str()).join(entry_point_file_name()), "exec sleep 30");
    }

    fn pid_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn resolves_installed_variant_by_preference() {
        let fx = fixture();
        assert_eq!(fx.supervisor.resolve_active_variant().await, None);

        install_fake(&fx.engines, VariantId::Cpu);
        install_fake(&fx.engines, VariantId::DirectMl);
        assert_eq!(fx.supervisor.resolve_active_variant().await, Some(VariantId::DirectMl));
        assert_eq!(fx.supervisor.current_selection().await, Some(VariantId::DirectMl));
    }

    #[tokio::test]
    async fn all_installed_prefers_cuda() {
        let fx = fixture();
        for id in VariantId::PREFERENCE_ORDER {
            install_fake(&fx.engines, id);
        }
        assert_eq!(fx.supervisor.resolve_active_variant().await, Some(VariantId::Cuda));
        assert_eq!(
            fx.supervisor.detect_installed(),
            vec![VariantId::Cuda, VariantId::DirectMl, VariantId::Cpu]
        );
    }

    #[tokio::test]
    async fn start_without_entry_point_fails_and_runs_nothing() {
        let fx = fixture();
        std::fs::create_dir_all(fx.engines.join("cpu/engine_internal")).unwrap();

        let err = fx.supervisor.start(Some(VariantId::Cpu)).await.unwrap_err();

        assert!(matches!(err, EngineError::ExecutableNotFound(_)));
        assert_eq!(fx.supervisor.active_pid().await, None);
        assert_eq!(fx.supervisor.status().await, EngineStatus::Stopped);
    }

    #[tokio::test]
    async fn start_without_install_dir_is_engine_not_found() {
        let fx = fixture();
        let err = fx.supervisor.start(Some(VariantId::DirectMl)).await.unwrap_err();
        assert!(matches!(err, EngineError::EngineNotFound(_)));
    }

    #[tokio::test]
    async fn start_then_stop_terminates_the_process() {
        let fx = fixture();
        install_fake(&fx.engines, VariantId::Cpu);

        let started = fx.supervisor.start(None).await.unwrap();
        assert_eq!(started, VariantId::Cpu);
        assert_eq!(fx.supervisor.status().await, EngineStatus::Running);
        let pid = fx.supervisor.active_pid().await.unwrap();
        assert!(pid_alive(pid));

        fx.supervisor.stop().await;

        assert!(!pid_alive(pid));
        assert_eq!(fx.supervisor.status().await, EngineStatus::Stopped);
        assert_eq!(fx.supervisor.last_exit().await, Some(EngineExit::Requested));
        assert_eq!(fx.supervisor.active_variant().await, None);
    }

    #[tokio::test]
    async fn switch_replaces_the_running_engine() {
        let fx = fixture();
        install_fake(&fx.engines, VariantId::Cuda);
        install_fake(&fx.engines, VariantId::DirectMl);

        fx.supervisor.start(Some(VariantId::Cuda)).await.unwrap();
        let old_pid = fx.supervisor.active_pid().await.unwrap();

        let switched = fx.supervisor.switch(VariantId::DirectMl).await.unwrap();
        let new_pid = fx.supervisor.active_pid().await.unwrap();

        assert_eq!(switched, VariantId::DirectMl);
        assert!(!pid_alive(old_pid));
        assert!(pid_alive(new_pid));
        assert_ne!(old_pid, new_pid);
        assert_eq!(fx.supervisor.current_selection().await, Some(VariantId::DirectMl));
        assert_eq!(fx.supervisor.active_variant().await, Some(VariantId::DirectMl));

        fx.supervisor.shutdown().await;
        assert!(!pid_alive(new_pid));
    }

    #[tokio::test]
    async fn unexpected_exit_is_recorded_as_crash() {
        let fx = fixture();
        write_script(&fx.engines.join("cpu").join(entry_point_file_name()), "exit 3");

        fx.supervisor.start(Some(VariantId::Cpu)).await.unwrap();
        for _ in 0..50 {
            if fx.supervisor.last_exit().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(
            fx.supervisor.last_exit().await,
            Some(EngineExit::Crashed { code: Some(3) })
        );
        assert_eq!(fx.supervisor.status().await, EngineStatus::Stopped);
        assert_eq!(fx.supervisor.active_pid().await, None);
    }

    #[tokio::test]
    async fn restart_without_installs_reports_no_engine() {
        let fx = fixture();
        let err = fx.supervisor.restart().await.unwrap_err();
        assert!(matches!(err, EngineError::NoEngineInstalled));
    }

    #[tokio::test]
    async fn restart_picks_preferred_installed_variant() {
        let fx = fixture();
        install_fake(&fx.engines, VariantId::Cpu);
        fx.supervisor.set_selection(VariantId::Cuda).await;

        let started = fx.supervisor.restart().await.unwrap();
        assert_eq!(started, VariantId::Cpu);
        assert_eq!(fx.supervisor.current_selection().await, Some(VariantId::Cpu));
        fx.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn engine_receives_host_port_and_gpu_flag() {
        let fx = fixture();
        let args_file = fx.engines.join("args.txt");
        write_script(
            &fx.engines.join("cuda").join(entry_point_file_name()),
            &format!("echo \"$@\" > '{}'\nexec sleep 30", args_file.display()),
        );

        fx.supervisor.start(Some(VariantId::Cuda)).await.unwrap();
        for _ in 0..50 {
            if args_file.is_file() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let args = std::fs::read_to_string(&args_file).unwrap();
        assert_eq!(args.trim(), "--host 127.0.0.1 --port 50021 --use_gpu");
        fx.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn boot_swallows_missing_engine() {
        let fx = fixture();
        fx.supervisor.boot().await;
        assert_eq!(fx.supervisor.status().await, EngineStatus::Stopped);
        assert_eq!(fx.supervisor.active_pid().await, None);
    }
}

#[cfg(test)]
mod memory_fs_tests {
    use super::*;
    use crate::core::installations::tests::memory_installations;

    fn supervisor_over_memory() -> (Arc<crate::core::fs::MemoryFileSystem>, EngineSupervisor) {
        let (fs, installations) = memory_installations();
        let options = SupervisorOptions {
            host: "127.0.0.1".to_string(),
            port: 50021,
            startup_grace: Duration::from_millis(10),
            stop_grace: Duration::from_millis(100),
            default_variant: VariantId::Cuda,
        };
        (fs, EngineSupervisor::new(Arc::new(installations), options).unwrap())
    }

    #[tokio::test]
    async fn start_probes_through_the_installation_filesystem() {
        let (fs, supervisor) = supervisor_over_memory();

        let err = supervisor.start(Some(VariantId::Cpu)).await.unwrap_err();
        assert!(matches!(err, EngineError::EngineNotFound(_)));

        fs.add_file("/engines/cpu/model/metas.json", b"[]").unwrap();
        let err = supervisor.start(Some(VariantId::Cpu)).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutableNotFound(_)));
        assert_eq!(supervisor.status().await, EngineStatus::Stopped);
        assert_eq!(supervisor.active_pid().await, None);
    }

    #[tokio::test]
    async fn detection_sees_memory_installs() {
        let (fs, supervisor) = supervisor_over_memory();
        let launcher = crate::core::platform::entry_point_file_name();
        fs.add_file(format!("/engines/directml/{launcher}"), b"").unwrap();

        assert_eq!(supervisor.detect_installed(), vec![VariantId::DirectMl]);
        assert_eq!(supervisor.resolve_active_variant().await, Some(VariantId::DirectMl));
    }
}
