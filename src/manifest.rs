//! Generation manifests and their byte-stable codec
//!
//! A [`Generation`] is the record written by one successful create run: its
//! number, when and by whom it was written, the root folder's digests, one
//! [`HashEntry`] per classified path and the rename links found in that run.
//!
//! ## Encoding
//!
//! Manifests are pretty-printed JSON followed by a single newline. The
//! encoding is deterministic for identical input because
//!
//! - struct fields serialize in declaration order,
//! - digest maps are `BTreeMap`s keyed by [`HashAlgorithm`], and
//! - entries and rename links are plain vectors kept in traversal order.
//!
//! The chain hashes these exact bytes, so a manifest must never be re-encoded
//! after it has been written; readers always hash the bytes found on disk.
//!
//! ## File names
//!
//! ```text
//! 0003_card01_2020-01-16_091500Z.mhl
//! ^^^^ ^^^^^^ ^^^^^^^^^^^^^^^^^^
//! gen  root   creation time (UTC)
//! ```

use crate::digest::HashAlgorithm;
use crate::error::{HashTrailError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// File extension of generation manifests
pub const MANIFEST_EXTENSION: &str = "mhl";

/// Digests of one item keyed by algorithm
pub type DigestMap = BTreeMap<HashAlgorithm, String>;

/// Whether an entry describes a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Folder; carries content and structure digests
    Directory,
}

/// Classification of a path in one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Seen for the first time
    New,
    /// Digest equal to the inherited one
    Unchanged,
    /// Digest differs from the inherited one
    Modified,
    /// Moved here from `previous_path` with identical content
    Renamed,
    /// Recorded before, not found any more
    Missing,
    /// Could not be read
    Failed,
}

impl EntryStatus {
    /// Label used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::New => "new",
            EntryStatus::Unchanged => "unchanged",
            EntryStatus::Modified => "modified",
            EntryStatus::Renamed => "renamed",
            EntryStatus::Missing => "missing",
            EntryStatus::Failed => "failed",
        }
    }

    fn requires_digest(self) -> bool {
        matches!(
            self,
            EntryStatus::New | EntryStatus::Unchanged | EntryStatus::Modified | EntryStatus::Renamed
        )
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One path's record within a generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEntry {
    /// Path relative to the root, `/`-separated
    pub path: String,
    /// File or folder
    pub kind: EntryKind,
    /// Classification in this generation
    pub status: EntryStatus,
    /// Content digests (for folders: digest over the children's content digests)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digests: DigestMap,
    /// Structure digests, folders only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<DigestMap>,
    /// Where a renamed file used to live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    /// File size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Last modification time of the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl HashEntry {
    /// A file entry without facts or digests yet
    pub fn file(path: impl Into<String>, status: EntryStatus) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            status,
            digests: DigestMap::new(),
            structure: None,
            previous_path: None,
            size: None,
            modified: None,
        }
    }

    /// A folder entry
    pub fn directory(path: impl Into<String>, status: EntryStatus) -> Self {
        Self {
            kind: EntryKind::Directory,
            ..Self::file(path, status)
        }
    }

    /// Builder-style digest insertion
    pub fn with_digest(mut self, algorithm: HashAlgorithm, digest: impl Into<String>) -> Self {
        self.digests.insert(algorithm, digest.into());
        self
    }

    /// Whether the path is present in the generation (anything but missing)
    pub fn is_active(&self) -> bool {
        self.status != EntryStatus::Missing
    }

    /// Whether this is a folder entry
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Content digest for one algorithm
    pub fn digest(&self, algorithm: HashAlgorithm) -> Option<&str> {
        self.digests.get(&algorithm).map(String::as_str)
    }

    /// Structure digest for one algorithm
    pub fn structure_digest(&self, algorithm: HashAlgorithm) -> Option<&str> {
        self.structure
            .as_ref()
            .and_then(|s| s.get(&algorithm))
            .map(String::as_str)
    }
}

/// Link from a path to the path it was renamed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameLink {
    /// Current path
    pub path: String,
    /// Path in an earlier generation
    pub previous_path: String,
}

/// Who wrote a generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorInfo {
    /// Tool name
    pub tool: String,
    /// Tool version
    pub version: String,
    /// Host the generation was written on
    pub hostname: String,
    /// User name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Process that produced the generation
    pub process: String,
    /// Free-text comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for CreatorInfo {
    fn default() -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .ok(),
            process: "create".to_string(),
            comment: None,
        }
    }
}

/// Content and structure digests of a folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryDigests {
    /// Digest over the children's content digests
    pub content: DigestMap,
    /// Digest over the children's names and structure digests
    pub structure: DigestMap,
}

/// One generation of the archive's record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Generation number, starting at 1
    pub generation: u32,
    /// Creation time (UTC, whole seconds)
    pub created_at: DateTime<Utc>,
    /// Creator metadata
    pub creator: CreatorInfo,
    /// Digests of the root folder itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<DirectoryDigests>,
    /// Classified entries in traversal order
    pub entries: Vec<HashEntry>,
    /// Rename links found in this generation
    #[serde(default)]
    pub renames: Vec<RenameLink>,
}

impl Generation {
    /// Manifest file name for this generation
    pub fn file_name(&self, root_name: &str) -> String {
        format!(
            "{:04}_{}_{}.{}",
            self.generation,
            sanitize_root_name(root_name),
            self.created_at.format("%Y-%m-%d_%H%M%SZ"),
            MANIFEST_EXTENSION
        )
    }

    /// Serialize to the stable on-disk form
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse and validate manifest bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_named(bytes, Path::new("<memory>"))
    }

    /// Parse and validate a manifest file
    pub fn decode_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::decode_named(&bytes, path)
    }

    fn decode_named(bytes: &[u8], origin: &Path) -> Result<Self> {
        let generation: Generation = serde_json::from_slice(bytes)
            .map_err(|e| HashTrailError::malformed_manifest(origin, e.to_string()))?;
        generation
            .validate()
            .map_err(|reason| HashTrailError::malformed_manifest(origin, reason))?;
        Ok(generation)
    }

    /// Check the invariants a decoded manifest must hold
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.generation == 0 {
            return Err("generation numbers start at 1".to_string());
        }

        let mut active = HashSet::new();
        for entry in &self.entries {
            check_relative_path(&entry.path)?;
            if entry.is_active() && !active.insert(entry.path.as_str()) {
                return Err(format!("duplicate active path {}", entry.path));
            }
            if entry.status.requires_digest() && entry.digests.is_empty() {
                return Err(format!("{} entry {} has no digest", entry.status, entry.path));
            }
            if entry.status == EntryStatus::Renamed && entry.previous_path.is_none() {
                return Err(format!("renamed entry {} has no previous path", entry.path));
            }
            if entry.kind == EntryKind::File && entry.structure.is_some() {
                return Err(format!("file entry {} carries a structure digest", entry.path));
            }
        }

        for link in &self.renames {
            check_relative_path(&link.previous_path)?;
            let linked = self.entries.iter().any(|e| {
                e.path == link.path
                    && e.status == EntryStatus::Renamed
                    && e.previous_path.as_deref() == Some(link.previous_path.as_str())
            });
            if !linked {
                return Err(format!("rename link {} has no matching entry", link.path));
            }
            if active.contains(link.previous_path.as_str()) {
                return Err(format!(
                    "rename source {} is still active in generation {}",
                    link.previous_path, self.generation
                ));
            }
        }

        let linked_entries = self.entries.iter().filter(|e| e.previous_path.is_some()).count();
        if linked_entries != self.renames.len() {
            return Err("rename links and renamed entries disagree".to_string());
        }

        Ok(())
    }

    /// Active entry for a path
    pub fn entry(&self, path: &str) -> Option<&HashEntry> {
        self.entries.iter().find(|e| e.path == path && e.is_active())
    }

    /// Count entries with a given status
    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

/// Extract the generation number from a manifest file name
pub fn parse_manifest_file_name(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(MANIFEST_EXTENSION)?.strip_suffix('.')?;
    let (number, rest) = stem.split_once('_')?;
    if number.len() < 4 || rest.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}

fn sanitize_root_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "root".to_string()
    } else {
        cleaned
    }
}

fn check_relative_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() || path.starts_with('/') {
        return Err(format!("invalid relative path {:?}", path));
    }
    if path.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(format!("invalid relative path {:?}", path));
    }
    Ok(())
}
