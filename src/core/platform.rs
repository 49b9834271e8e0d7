use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::fs::FileSystem;

/// File name of the engine launcher at the root of an installation.
pub fn entry_point_file_name() -> &'static str {
    if cfg!(windows) {
        "run.exe"
    } else {
        "run"
    }
}

/// Find the engine launcher inside `install_dir`.
///
/// The fixed name is tried first. On Windows a loosely named build
/// (`run-cuda.exe`, `Run.exe`, ...) is accepted as a fallback.
pub fn locate_entry_point(fs: &dyn FileSystem, install_dir: &Path) -> Option<PathBuf> {
    let primary = install_dir.join(entry_point_file_name());
    if fs.exists(&primary) && !fs.is_dir(&primary) {
        return Some(primary);
    }
    if cfg!(windows) {
        return scan_for_run_executable(fs, install_dir);
    }
    None
}

fn scan_for_run_executable(fs: &dyn FileSystem, install_dir: &Path) -> Option<PathBuf> {
    // `list` is sorted
    let found = fs.list(install_dir).ok()?.into_iter().find(|name| {
        let lower = name.to_ascii_lowercase();
        lower.ends_with(".exe") && lower.contains("run") && !fs.is_dir(&install_dir.join(name))
    })?;
    debug!("Using fallback engine executable {}", found);
    Some(install_dir.join(found))
}
