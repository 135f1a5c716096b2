//! Utility functions for hashtrail
//!
//! Small helpers shared by the session, the history loader and the command
//! line front end:
//!
//! - atomic file writes for manifests,
//! - conversion between filesystem paths and the `/`-separated relative
//!   paths stored in manifests,
//! - file facts (size, modification time),
//! - human-readable byte formatting.

use crate::error::{HashTrailError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Size and modification time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFacts {
    /// Size in bytes
    pub size: u64,
    /// Last modification time, if the platform reports one
    pub modified: Option<DateTime<Utc>>,
}

/// Read size and modification time without following symlinks
pub fn file_facts(path: &Path) -> Result<FileFacts> {
    let metadata = fs::symlink_metadata(path)?;
    Ok(FileFacts {
        size: metadata.len(),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    })
}

/// Make a path relative to a base
///
/// A lexical strip is tried first so that symlinked roots keep their
/// spelling; canonical paths are only compared when that fails.
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            HashTrailError::InvalidConfiguration(format!(
                "{:?} is not inside {:?}",
                path, base
            ))
        })
}

/// Render a relative path the way manifests store it (`a/b/c.txt`)
pub fn manifest_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a user-supplied file argument to its manifest path under `root`
///
/// Absolute paths must lie inside the root. Relative paths are taken
/// relative to the root, not to the working directory.
pub fn resolve_in_root(root: &Path, input: &Path) -> Result<String> {
    let relative = if input.is_absolute() {
        make_relative(input, root)?
    } else {
        input.to_path_buf()
    };

    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(HashTrailError::InvalidConfiguration(format!(
            "{:?} escapes the root folder",
            input
        )));
    }

    let rendered = manifest_path(&relative);
    if rendered.is_empty() {
        return Err(HashTrailError::InvalidConfiguration(format!(
            "{:?} does not name a file",
            input
        )));
    }
    Ok(rendered)
}

/// Join a manifest path onto a root folder
pub fn absolute_in_root(root: &Path, manifest_path: &str) -> PathBuf {
    manifest_path
        .split('/')
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Final path component of a root folder, used in manifest file names
pub fn root_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(root)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string())
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write
///
/// The content goes to a temporary file in the target's folder, is synced,
/// and is then persisted over the target. Readers see either the old file or
/// the complete new one.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| HashTrailError::internal(format!("{:?} has no parent folder", path)))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| HashTrailError::Io(e.error))?;

    Ok(())
}
