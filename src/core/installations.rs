// ─── Installation targets ───
// `<engine_dir>/<variant>/` per variant. A variant counts as installed when
// its entry point sits directly in that directory; the installer and the
// supervisor share this probe.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::error::EngineResult;
use crate::core::fs::{remove_tree, FileSystem, StdFileSystem};
use crate::core::layout::{self, NormalizeOutcome};
use crate::core::platform::{entry_point_file_name, locate_entry_point};
use crate::core::registry::{EngineRegistry, VariantId};

pub struct Installations {
    engine_dir: PathBuf,
    registry: Arc<EngineRegistry>,
    fs: Arc<dyn FileSystem>,
}

impl Installations {
    pub fn new(engine_dir: PathBuf, registry: Arc<EngineRegistry>) -> Self {
        Self::with_fs(engine_dir, registry, Arc::new(StdFileSystem))
    }

    pub fn with_fs(
        engine_dir: PathBuf,
        registry: Arc<EngineRegistry>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            engine_dir,
            registry,
            fs,
        }
    }

    pub fn engine_dir(&self) -> &Path {
        &self.engine_dir
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn target_dir(&self, id: VariantId) -> PathBuf {
        self.engine_dir.join(id.as_str())
    }

    pub fn entry_point(&self, id: VariantId) -> PathBuf {
        self.target_dir(id).join(entry_point_file_name())
    }

    /// The launcher inside the variant directory, with the platform fallback.
    pub fn locate_entry_point(&self, id: VariantId) -> Option<PathBuf> {
        locate_entry_point(self.fs(), &self.target_dir(id))
    }

    /// Flatten a nested layout in the variant directory if one is present.
    pub fn repair(&self, id: VariantId) -> EngineResult<NormalizeOutcome> {
        layout::normalize(self.fs(), &self.target_dir(id), entry_point_file_name())
    }

    /// Probe one variant. A detected nested layout is repaired first so that
    /// installs made by older builds are picked up.
    pub fn check_installed(&self, id: VariantId) -> bool {
        let target = self.target_dir(id);
        if !self.fs.is_dir(&target) {
            debug!("Engine directory does not exist: {:?}", target);
            return false;
        }

        match layout::detect_nested(self.fs(), &target, entry_point_file_name()) {
            Ok(Some(nested)) => {
                warn!(
                    "Found nested structure with {} at {:?}, fixing",
                    entry_point_file_name(),
                    target.join(&nested)
                );
                if let Err(err) = self.repair(id) {
                    warn!("Could not repair engine directory {:?}: {}", target, err);
                }
            }
            Ok(None) => {}
            Err(err) => warn!("Error reading engine directory {:?}: {}", target, err),
        }

        let installed = self.fs.exists(&self.entry_point(id));
        debug!("{} installed: {}", id, installed);
        installed
    }

    /// Installed variants in registry order.
    pub fn detect_installed(&self) -> Vec<VariantId> {
        self.registry
            .ids()
            .into_iter()
            .filter(|id| self.check_installed(*id))
            .collect()
    }

    /// First installed variant in preference order.
    pub fn preferred_installed(&self) -> Option<VariantId> {
        let found = self
            .registry
            .preference_order()
            .into_iter()
            .find(|id| self.check_installed(*id));
        match found {
            Some(id) => info!("Detected installed engine: {}", id),
            None => info!("No engine detected"),
        }
        found
    }

    /// Delete a variant directory. Returns false when nothing was installed.
    pub fn remove(&self, id: VariantId) -> EngineResult<bool> {
        let target = self.target_dir(id);
        if !self.fs.exists(&target) {
            return Ok(false);
        }
        info!("Removing {} engine at {:?}", id, target);
        remove_tree(self.fs(), &target)?;
        info!("Removed {} engine", id);
        Ok(true)
    }
}
