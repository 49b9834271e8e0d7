// ─── Engine installer ───
// download parts → extract head part → normalize layout → verify → receipt
// Staging lives in a fresh per-install directory that is removed on success
// and on failure.

pub mod receipt;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::downloader::{file_name_from_url, ArchiveFetcher};
use crate::core::error::{EngineError, EngineResult};
use crate::core::events::{ProgressEvent, Reporter};
use crate::core::extract::ArchiveExtractor;
use crate::core::installations::Installations;
use crate::core::layout::NormalizeOutcome;
use crate::core::platform::entry_point_file_name;
use crate::core::registry::{EngineVariant, VariantId};

pub use receipt::{sha256_file, InstallReceipt, RECEIPT_FILE};

const STAGING_PREFIX: &str = "voicevox-engine-download-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
    pub variant: VariantId,
    pub path: PathBuf,
    /// False when the entry point was missing after extraction. The install
    /// still counts as finished; the probe will report it as not installed.
    pub entry_point_verified: bool,
}

pub struct EngineInstaller {
    installations: Arc<Installations>,
    staging_root: PathBuf,
    fetcher: ArchiveFetcher,
    extractor: Arc<dyn ArchiveExtractor>,
    min_free_disk_bytes: u64,
    locks: Mutex<HashMap<VariantId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EngineInstaller {
    pub fn new(
        installations: Arc<Installations>,
        staging_root: PathBuf,
        fetcher: ArchiveFetcher,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Self {
        Self {
            installations,
            staging_root,
            fetcher,
            extractor,
            min_free_disk_bytes: 0,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Minimum free space required on the staging volume; 0 disables the check.
    pub fn with_min_free_disk_bytes(mut self, bytes: u64) -> Self {
        self.min_free_disk_bytes = bytes;
        self
    }

    pub fn installations(&self) -> &Installations {
        &self.installations
    }

    /// Download, extract and lay out one engine variant.
    ///
    /// Concurrent installs of the same variant are serialized. On failure the
    /// staging directory is removed and the original error is returned.
    #[instrument(skip(self, reporter))]
    pub async fn install(&self, id: VariantId, reporter: &Reporter) -> EngineResult<InstallOutcome> {
        let variant = self
            .installations
            .registry()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownVariant(id.to_string()))?;

        let lock = self.variant_lock(id);
        let _guard = lock.lock().await;

        reporter.log(format!("Installing {}...", variant.name));
        let staging = self
            .staging_root
            .join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));

        let mut parts = Vec::new();
        let result = self.run(&variant, &staging, &mut parts, reporter).await;

        match result {
            Ok(outcome) => {
                reporter.log("Cleaning up temporary files...");
                cleanup_staging(&staging, &parts).await;
                reporter.progress(ProgressEvent::Overall {
                    step: "Complete!".to_string(),
                    progress: 100.0,
                });
                reporter.log(format!("Successfully installed {}", variant.name));
                info!("Installed {} engine at {:?}", id, outcome.path);
                Ok(outcome)
            }
            Err(err) => {
                warn!("Install of {} failed: {}", id, err);
                reporter.log(format!("Installation failed: {err}"));
                cleanup_staging(&staging, &parts).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        variant: &EngineVariant,
        staging: &Path,
        parts: &mut Vec<PathBuf>,
        reporter: &Reporter,
    ) -> EngineResult<InstallOutcome> {
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|source| EngineError::io(staging, source))?;
        ensure_min_disk_space(staging, self.min_free_disk_bytes)?;

        let total = variant.urls.len();
        for (index, url) in variant.urls.iter().enumerate() {
            reporter.progress(ProgressEvent::Overall {
                step: format!("Downloading part {}/{}", index + 1, total),
                progress: index as f64 / (total + 1) as f64 * 100.0,
            });
            let dest = staging.join(file_name_from_url(url));
            let path = self.fetcher.fetch(url, &dest, reporter).await?;
            parts.push(path);
        }

        reporter.progress(ProgressEvent::Overall {
            step: "Extracting files...".to_string(),
            progress: 80.0,
        });

        let target = self.installations.target_dir(variant.id);
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|source| EngineError::io(&target, source))?;

        let head = parts
            .first()
            .ok_or_else(|| EngineError::Other(format!("No archive parts for {}", variant.id)))?;
        // 7-Zip picks up the remaining `.7z.NNN` volumes next to the head part
        self.extractor.extract(head, &target, reporter).await?;

        match self.installations.repair(variant.id)? {
            NormalizeOutcome::Repaired { nested } => {
                reporter.log(format!("Moved engine files up from nested directory: {nested}"))
            }
            NormalizeOutcome::AlreadyCorrect => {}
            NormalizeOutcome::NotApplicable => {
                warn!("Unexpected layout in {:?}, left as extracted", target);
                reporter.log("Warning: could not determine engine directory layout");
            }
        }

        let entry_point = self.installations.entry_point(variant.id);
        let entry_point_verified = entry_point.is_file();
        if entry_point_verified {
            reporter.log(format!("Successfully verified {} location", entry_point_file_name()));
        } else {
            warn!("Entry point missing after install: {:?}", entry_point);
            reporter.log(format!(
                "WARNING: {} not found at expected location after extraction",
                entry_point_file_name()
            ));
        }

        if let Err(err) = InstallReceipt::new(variant, &entry_point).write(&target).await {
            warn!("Could not write install receipt for {}: {}", variant.id, err);
        }

        Ok(InstallOutcome {
            variant: variant.id,
            path: target,
            entry_point_verified,
        })
    }

    fn variant_lock(&self, id: VariantId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id).or_default().clone()
    }
}

/// Best effort: remove every staged part, then the staging directory.
async fn cleanup_staging(staging: &Path, parts: &[PathBuf]) {
    for part in parts {
        if let Err(err) = tokio::fs::remove_file(part).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove staged part {:?}: {}", part, err);
            }
        }
    }
    if let Err(err) = tokio::fs::remove_dir_all(staging).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove staging directory {:?}: {}", staging, err);
        }
    }
}

fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> EngineResult<()> {
    if minimum_bytes == 0 {
        return Ok(());
    }

    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }

    match available {
        Some(bytes) if bytes < minimum_bytes => Err(EngineError::InsufficientDiskSpace {
            path: path.to_path_buf(),
            available: bytes,
            required: minimum_bytes,
        }),
        _ => Ok(()),
    }
}
