// ─── Filesystem capability ───
// The handful of operations the layout normalizer and cleanup helpers need,
// behind a trait so they can run against an in-memory tree in tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::error::{EngineError, EngineResult};

pub trait FileSystem: Send + Sync {
    /// True for any entry at `path`, including a dangling symlink.
    fn exists(&self, path: &Path) -> bool;
    /// True only for a real directory. A symlink is a leaf even when it
    /// points at a directory, so tree walks never leave the tree.
    fn is_dir(&self, path: &Path) -> bool;
    /// Names of the immediate children of `dir`, sorted.
    fn list(&self, dir: &Path) -> EngineResult<Vec<String>>;
    fn create_dir_all(&self, dir: &Path) -> EngineResult<()>;
    fn rename(&self, from: &Path, to: &Path) -> EngineResult<()>;
    fn remove_file(&self, path: &Path) -> EngineResult<()>;
    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> EngineResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_dir())
            .unwrap_or(false)
    }

    fn list(&self, dir: &Path) -> EngineResult<Vec<String>> {
        let entries = std::fs::read_dir(dir).map_err(|source| EngineError::io(dir, source))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EngineError::io(dir, source))?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    fn create_dir_all(&self, dir: &Path) -> EngineResult<()> {
        std::fs::create_dir_all(dir).map_err(|source| EngineError::io(dir, source))
    }

    fn rename(&self, from: &Path, to: &Path) -> EngineResult<()> {
        std::fs::rename(from, to).map_err(|source| EngineError::io(to, source))
    }

    fn remove_file(&self, path: &Path) -> EngineResult<()> {
        std::fs::remove_file(path).map_err(|source| EngineError::io(path, source))
    }

    fn remove_dir(&self, path: &Path) -> EngineResult<()> {
        std::fs::remove_dir(path).map_err(|source| EngineError::io(path, source))
    }
}

/// Recursively delete `path`: files first, then the emptied directories.
/// Stops at the first failure; a missing `path` is not an error.
pub fn remove_tree(fs: &dyn FileSystem, path: &Path) -> EngineResult<()> {
    if !fs.exists(path) {
        return Ok(());
    }
    if !fs.is_dir(path) {
        return fs.remove_file(path);
    }
    for name in fs.list(path)? {
        remove_tree(fs, &path.join(name))?;
    }
    fs.remove_dir(path)
}

/// Like [`remove_tree`] but keeps going past failures.
/// Returns how many entries could not be removed.
pub fn remove_tree_best_effort(fs: &dyn FileSystem, path: &Path) -> usize {
    if !fs.exists(path) {
        return 0;
    }
    if !fs.is_dir(path) {
        return usize::from(fs.remove_file(path).is_err());
    }
    let mut failures = 0;
    match fs.list(path) {
        Ok(names) => {
            for name in names {
                failures += remove_tree_best_effort(fs, &path.join(name));
            }
        }
        Err(_) => failures += 1,
    }
    if fs.remove_dir(path).is_err() {
        failures += 1;
    }
    failures
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    File(Vec<u8>),
    Dir,
}

/// In-memory tree keyed by absolute path. Parent directories must exist
/// before children are added, mirroring the real filesystem.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        let fs = Self::default();
        if let Ok(mut nodes) = fs.nodes.lock() {
            nodes.insert(PathBuf::from("/"), Node::Dir);
        }
        fs
    }

    /// Create a file, creating parent directories as needed.
    pub fn add_file(&self, path: impl AsRef<Path>, contents: &[u8]) -> EngineResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        let mut nodes = self.lock();
        if matches!(nodes.get(path), Some(Node::Dir)) {
            return Err(EngineError::io(path, already_exists()));
        }
        nodes.insert(path.to_path_buf(), Node::File(contents.to_vec()));
        Ok(())
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.lock().get(path.as_ref()) {
            Some(Node::File(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Every path under (and including) `root`, sorted.
    pub fn snapshot(&self, root: impl AsRef<Path>) -> Vec<PathBuf> {
        let root = root.as_ref();
        self.lock()
            .keys()
            .filter(|path| path.starts_with(root))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, Node>> {
        match self.nodes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn children_of(nodes: &BTreeMap<PathBuf, Node>, dir: &Path) -> Vec<PathBuf> {
        nodes
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect()
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(Node::Dir))
    }

    fn list(&self, dir: &Path) -> EngineResult<Vec<String>> {
        let nodes = self.lock();
        match nodes.get(dir) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(EngineError::io(dir, not_a_directory())),
            None => return Err(EngineError::io(dir, not_found())),
        }
        let mut names: Vec<String> = Self::children_of(&nodes, dir)
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn create_dir_all(&self, dir: &Path) -> EngineResult<()> {
        let mut nodes = self.lock();
        for ancestor in dir.ancestors().collect::<Vec<_>>().into_iter().rev() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match nodes.get(ancestor) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => return Err(EngineError::io(ancestor, not_a_directory())),
                None => {
                    nodes.insert(ancestor.to_path_buf(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> EngineResult<()> {
        let mut nodes = self.lock();
        if !nodes.contains_key(from) {
            return Err(EngineError::io(from, not_found()));
        }
        if nodes.contains_key(to) {
            return Err(EngineError::io(to, already_exists()));
        }
        match to.parent() {
            Some(parent) if matches!(nodes.get(parent), Some(Node::Dir)) => {}
            _ => return Err(EngineError::io(to, not_found())),
        }

        let moved: Vec<(PathBuf, Node)> = nodes
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, node)| (path.clone(), node.clone()))
            .collect();
        for (path, node) in moved {
            nodes.remove(&path);
            let relative = path.strip_prefix(from).unwrap_or(Path::new(""));
            let target = if relative.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(relative)
            };
            nodes.insert(target, node);
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> EngineResult<()> {
        let mut nodes = self.lock();
        match nodes.get(path) {
            Some(Node::File(_)) => {
                nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => Err(EngineError::io(path, is_a_directory())),
            None => Err(EngineError::io(path, not_found())),
        }
    }

    fn remove_dir(&self, path: &Path) -> EngineResult<()> {
        let mut nodes = self.lock();
        match nodes.get(path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(EngineError::io(path, not_a_directory())),
            None => return Err(EngineError::io(path, not_found())),
        }
        if !Self::children_of(&nodes, path).is_empty() {
            return Err(EngineError::io(
                path,
                std::io::Error::other("directory not empty"),
            ));
        }
        nodes.remove(path);
        Ok(())
    }
}

fn not_found() -> std::io::Error {
    std::io::Error::from(std::io::ErrorKind::NotFound)
}

fn already_exists() -> std::io::Error {
    std::io::Error::from(std::io::ErrorKind::AlreadyExists)
}

fn not_a_directory() -> std::io::Error {
    std::io::Error::other("not a directory")
}

fn is_a_directory() -> std::io::Error {
    std::io::Error::other("is a directory")
}
