//! Atomic file writes
//!
//! Emitted artifacts are written to a temporary file in the target
//! directory, fsynced and renamed into place so a failed emit never leaves
//! a truncated output behind.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write string content to `path`.
pub fn write_file_atomic(path: &Path, content: &str) -> Result<()> {
    write_bytes_atomic(path, content.as_bytes())
}

/// Atomically write raw bytes to `path`, creating parent directories.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in: {}", dir.display()))?;

    temp.write_all(bytes)
        .context("Failed to write content to temporary file")?;
    temp.as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;

    temp.persist(path)
        .with_context(|| format!("Failed to rename temporary file into: {}", path.display()))?;
    Ok(())
}
