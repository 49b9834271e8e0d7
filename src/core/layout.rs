// ─── Layout normalizer ───
// Some engine archives wrap their payload in a release-named folder, e.g.
// `cpu/voicevox_engine-windows-cpu-0.25.0/run.exe`. The engine must live
// directly under the variant directory, so the nested folder is flattened.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::error::EngineResult;
use crate::core::fs::{remove_tree_best_effort, FileSystem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NormalizeOutcome {
    AlreadyCorrect,
    Repaired { nested: String },
    NotApplicable,
}

/// The single child directory that directly holds `entry_point`, if the
/// entry point is not already at the root. Read-only.
pub fn detect_nested(
    fs: &dyn FileSystem,
    install_dir: &Path,
    entry_point: &str,
) -> EngineResult<Option<String>> {
    if !fs.is_dir(install_dir) || fs.exists(&install_dir.join(entry_point)) {
        return Ok(None);
    }

    let mut dirs = fs
        .list(install_dir)?
        .into_iter()
        .filter(|name| fs.is_dir(&install_dir.join(name)));
    let (Some(only), None) = (dirs.next(), dirs.next()) else {
        return Ok(None);
    };

    if fs.exists(&install_dir.join(&only).join(entry_point)) {
        Ok(Some(only))
    } else {
        Ok(None)
    }
}

/// Flatten a nested install so `entry_point` sits directly in `install_dir`.
///
/// Never touches sibling directories (`engine_internal`, `model`, ...), never
/// overwrites an existing destination, and is a no-op when the layout is
/// already correct.
pub fn normalize(
    fs: &dyn FileSystem,
    install_dir: &Path,
    entry_point: &str,
) -> EngineResult<NormalizeOutcome> {
    if fs.exists(&install_dir.join(entry_point)) {
        debug!("Engine directory structure is correct: {:?}", install_dir);
        return Ok(NormalizeOutcome::AlreadyCorrect);
    }

    let Some(nested) = detect_nested(fs, install_dir, entry_point)? else {
        return Ok(NormalizeOutcome::NotApplicable);
    };

    info!(
        "Found nested engine directory {:?} in {:?}, moving contents up",
        nested, install_dir
    );
    let nested_path = install_dir.join(&nested);
    for name in fs.list(&nested_path)? {
        let source = nested_path.join(&name);
        let destination = install_dir.join(&name);
        if fs.exists(&destination) {
            warn!("Skipping {:?}: destination already exists", destination);
            continue;
        }
        fs.rename(&source, &destination)?;
    }

    let leftovers = remove_tree_best_effort(fs, &nested_path);
    if leftovers > 0 {
        warn!(
            "Could not fully remove nested directory {:?} ({} entries left)",
            nested_path, leftovers
        );
    } else {
        info!("Removed nested directory: {}", nested);
    }

    Ok(NormalizeOutcome::Repaired { nested })
}
