use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::{EngineError, EngineResult};
use crate::core::registry::{EngineVariant, VariantId, ENGINE_VERSION};

pub const RECEIPT_FILE: &str = "install.json";
const RECEIPT_SCHEMA_VERSION: u32 = 1;

/// Written next to the entry point after a successful install. Informational
/// only: installed state is always probed from the entry point itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub schema_version: u32,
    pub variant: VariantId,
    pub engine_version: String,
    pub source_urls: Vec<String>,
    pub installed_at: String,
    pub entry_point_sha256: Option<String>,
    pub app_version: String,
}

impl InstallReceipt {
    pub fn new(variant: &EngineVariant, entry_point: &Path) -> Self {
        let entry_point_sha256 = if entry_point.is_file() {
            sha256_file(entry_point).ok()
        } else {
            None
        };

        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            variant: variant.id,
            engine_version: ENGINE_VERSION.to_string(),
            source_urls: variant.urls.clone(),
            installed_at: Utc::now().to_rfc3339(),
            entry_point_sha256,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn write(&self, install_dir: &Path) -> EngineResult<PathBuf> {
        let path = install_dir.join(RECEIPT_FILE);
        let payload = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, payload)
            .await
            .map_err(|source| EngineError::io(&path, source))?;
        Ok(path)
    }

    pub fn read(install_dir: &Path) -> EngineResult<Self> {
        let path = install_dir.join(RECEIPT_FILE);
        let raw = std::fs::read(&path).map_err(|source| EngineError::io(&path, source))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

pub fn sha256_file(path: &Path) -> EngineResult<String> {
    let mut file = std::fs::File::open(path).map_err(|source| EngineError::io(path, source))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| EngineError::io(path, source))?;
    Ok(hex::encode(hasher.finalize()))
}
