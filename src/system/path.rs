//! Path utilities.

use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Create a directory and any missing parents.
pub fn create(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}

/// Remove a directory tree. A path that is already gone is not an error.
pub fn wipe(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Number of named components, `/` has depth 0.
pub fn depth(path: &str) -> usize {
    Path::new(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

/// Order paths so every ancestor precedes its descendants.
///
/// Paths are grouped by depth, shallow first. Within one depth the input
/// order is kept, so a lexicographically sorted input yields a
/// lexicographic tie-break between siblings.
pub fn sort_by_hierarchy<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    let mut ordered: Vec<String> = paths.iter().map(|p| p.as_ref().to_string()).collect();
    ordered.sort_by_key(|p| depth(p));
    ordered
}

/// Resolve a volume path (`/var/log`) inside `root`.
pub fn join_root(root: &Path, realpath: &str) -> PathBuf {
    let relative = realpath.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}
