//! Path helpers shared across the workspace

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Create a directory and all parents, tolerating benign races.
pub fn ensure_dir_all(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to create directory: {}", dir.display()))
        }
    }
}

/// Resolve `relative` against the directory containing `base_file`.
#[must_use]
pub fn resolve_sibling(base_file: &Path, relative: &str) -> PathBuf {
    base_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(relative)
}

/// The file stem of a source path, used as the stable specification id.
#[must_use]
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
