use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult};
use crate::core::registry::VariantId;

const APP_DIR_NAME: &str = "yomiage";
const ENGINE_DIR_NAME: &str = "voicevox-engine";
const SETTINGS_FILE: &str = "engine_settings.json";

/// User-tunable engine settings, read from `engine_settings.json` in the
/// application data directory. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory holding one subdirectory per installed variant.
    pub engine_dir: Option<PathBuf>,
    /// Root for download staging; `<engine_dir>/.temp` when unset.
    pub temp_dir: Option<PathBuf>,
    /// Directory with bundled tools (`tools/7z/7za`).
    pub resource_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub startup_grace_ms: u64,
    pub stop_grace_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_redirects: usize,
    pub min_free_disk_bytes: u64,
    pub default_variant: VariantId,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_dir: None,
            temp_dir: None,
            resource_dir: None,
            host: "127.0.0.1".to_string(),
            port: 50021,
            startup_grace_ms: 3000,
            stop_grace_ms: 2000,
            connect_timeout_secs: 30,
            read_timeout_secs: 120,
            max_redirects: 5,
            min_free_disk_bytes: 2 * 1024 * 1024 * 1024,
            default_variant: VariantId::Cuda,
        }
    }
}

impl EngineConfig {
    /// Load settings from `<data_dir>/engine_settings.json`. A missing file
    /// yields the defaults; a malformed one is an error.
    pub fn load(data_dir: &Path) -> EngineResult<Self> {
        Self::load_from(&data_dir.join(SETTINGS_FILE))
    }

    pub fn load_from(path: &Path) -> EngineResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(EngineError::io(path, source)),
        };
        serde_json::from_str(&raw).map_err(|err| EngineError::Config {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Resolve the configured directories against the platform defaults.
    pub fn paths(&self) -> EnginePaths {
        let engine_dir = self
            .engine_dir
            .clone()
            .unwrap_or_else(|| default_data_dir().join(ENGINE_DIR_NAME));
        let staging_root = self
            .temp_dir
            .clone()
            .unwrap_or_else(|| engine_dir.join(".temp"));

        EnginePaths {
            engine_dir,
            staging_root,
            resource_dir: self.resource_dir.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnginePaths {
    engine_dir: PathBuf,
    staging_root: PathBuf,
    resource_dir: Option<PathBuf>,
}

impl EnginePaths {
    pub fn engine_dir(&self) -> &Path {
        &self.engine_dir
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn resource_dir(&self) -> Option<&Path> {
        self.resource_dir.as_deref()
    }
}

/// Per-user application data directory, e.g. `~/.local/share/yomiage`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
