//! History model: all generations of one root folder
//!
//! [`History::load`] reads every manifest in the root's metadata folder in
//! ascending generation order and folds them into a *current state*: for each
//! relative path the most recent active entry wins. A `missing` entry removes
//! its path from the current state, and a `renamed` entry removes its
//! previous path, but both stay in [`History::generations`] for audit.
//!
//! Each generation is also marked [`Trust::Trusted`] when the chain carries a
//! record for it, or [`Trust::Pending`] when the manifest was written but the
//! chain never caught up (a crash between the two writes of a commit).
//!
//! A history is an immutable snapshot. Sessions borrow it; committing a new
//! generation means loading a fresh one.

use crate::chain::Chain;
use crate::digest::HashAlgorithm;
use crate::error::{HashTrailError, Result};
use crate::manifest::{
    parse_manifest_file_name, DigestMap, DirectoryDigests, EntryKind, EntryStatus, Generation,
    HashEntry,
};
use crate::traverse::METADATA_FOLDER;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Whether the chain vouches for a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// The chain has a record for this manifest
    Trusted,
    /// No chain record covers this manifest yet
    Pending,
}

/// A generation together with where it came from
#[derive(Debug, Clone)]
pub struct StoredGeneration {
    /// Decoded manifest
    pub generation: Generation,
    /// Manifest file name in the metadata folder
    pub file_name: String,
    /// Chain coverage
    pub trust: Trust,
}

impl StoredGeneration {
    /// Generation number
    pub fn number(&self) -> u32 {
        self.generation.generation
    }
}

/// A path that rename detection may pair with a new observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameSource {
    /// Path in the current state
    pub path: String,
    /// Its recorded digests
    pub digests: DigestMap,
}

/// One step in the recorded life of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    /// Generation number
    pub generation: u32,
    /// The entry as recorded in that generation
    pub entry: HashEntry,
}

/// All generations of a root folder plus the derived current state
#[derive(Debug, Clone)]
pub struct History {
    root: PathBuf,
    generations: Vec<StoredGeneration>,
    current: BTreeMap<String, HashEntry>,
}

/// Metadata folder of a root
pub fn metadata_dir(root: &Path) -> PathBuf {
    root.join(METADATA_FOLDER)
}

impl History {
    /// Empty history (generation 0) for a root
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            generations: Vec::new(),
            current: BTreeMap::new(),
        }
    }

    /// Load every manifest under the root's metadata folder
    ///
    /// Missing metadata yields an empty history. Manifest numbers must run
    /// from 1 without gaps and agree with the number inside each manifest.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn load(root: &Path) -> Result<Self> {
        let dir = metadata_dir(root);
        if !dir.is_dir() {
            debug!("No metadata folder at {:?}", dir);
            return Ok(Self::empty(root));
        }

        let mut files: Vec<(u32, String)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(number) = parse_manifest_file_name(&name) {
                files.push((number, name));
            }
        }
        files.sort();

        let chain = Chain::load(&dir)?;
        let mut history = Self::empty(root);

        for (index, (number, name)) in files.into_iter().enumerate() {
            let path = dir.join(&name);
            let expected = index as u32 + 1;
            if number != expected {
                return Err(HashTrailError::malformed_manifest(
                    &path,
                    format!("expected generation {}, found {}", expected, number),
                ));
            }

            let generation = Generation::decode_file(&path)?;
            if generation.generation != number {
                return Err(HashTrailError::malformed_manifest(
                    &path,
                    format!(
                        "file name says generation {}, content says {}",
                        number, generation.generation
                    ),
                ));
            }

            let trust = match chain.entry_for(number) {
                Some(record) if record.manifest == name => Trust::Trusted,
                _ => {
                    warn!("Generation {} ({}) is not covered by the chain", number, name);
                    Trust::Pending
                }
            };

            history.push(StoredGeneration {
                generation,
                file_name: name,
                trust,
            })?;
        }

        debug!(
            "Loaded {} generations, {} current paths",
            history.generations.len(),
            history.current.len()
        );
        Ok(history)
    }

    /// Load a history that must have at least one generation
    pub fn load_required(root: &Path) -> Result<Self> {
        let history = Self::load(root)?;
        if history.is_empty() {
            return Err(HashTrailError::NoHistory(root.to_path_buf()));
        }
        Ok(history)
    }

    /// Fold one more generation into the current state
    fn push(&mut self, stored: StoredGeneration) -> Result<()> {
        for entry in &stored.generation.entries {
            if let Some(previous) = &entry.previous_path {
                let known = self
                    .generations
                    .iter()
                    .any(|g| g.generation.entries.iter().any(|e| &e.path == previous && e.is_active()));
                if !known {
                    return Err(HashTrailError::malformed_manifest(
                        &stored.file_name,
                        format!("{} renames unknown path {}", entry.path, previous),
                    ));
                }
            }
        }

        for entry in &stored.generation.entries {
            match entry.status {
                EntryStatus::Missing => {
                    self.current.remove(&entry.path);
                }
                // a failed read keeps the last good record
                EntryStatus::Failed => {}
                _ => {
                    if let Some(previous) = &entry.previous_path {
                        self.current.remove(previous);
                    }
                    self.current.insert(entry.path.clone(), entry.clone());
                }
            }
        }

        self.generations.push(stored);
        Ok(())
    }

    /// Root folder this history belongs to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether no generation exists yet
    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    /// All generations in ascending order
    pub fn generations(&self) -> &[StoredGeneration] {
        &self.generations
    }

    /// Most recent generation number (0 when empty)
    pub fn latest_number(&self) -> u32 {
        self.generations.last().map(StoredGeneration::number).unwrap_or(0)
    }

    /// Generations not yet covered by the chain
    pub fn pending(&self) -> impl Iterator<Item = &StoredGeneration> {
        self.generations.iter().filter(|g| g.trust == Trust::Pending)
    }

    /// Current entry for a path
    pub fn current_entry(&self, path: &str) -> Option<&HashEntry> {
        self.current.get(path)
    }

    /// Current entries in path order
    pub fn current_entries(&self) -> impl Iterator<Item = &HashEntry> {
        self.current.values()
    }

    /// Current file entries with their digests, the candidates for rename pairing
    pub fn all_known_rename_sources(&self) -> Vec<RenameSource> {
        self.current
            .values()
            .filter(|e| e.kind == EntryKind::File && !e.digests.is_empty())
            .map(|e| RenameSource {
                path: e.path.clone(),
                digests: e.digests.clone(),
            })
            .collect()
    }

    /// Latest recorded digests of the root folder, with the generation that wrote them
    pub fn root_digests(&self) -> Option<(u32, &DirectoryDigests)> {
        self.generations
            .iter()
            .rev()
            .find_map(|g| g.generation.root.as_ref().map(|r| (g.number(), r)))
    }

    /// Latest recorded structure digests of a folder (`""` is the root)
    pub fn directory_structures(&self, path: &str) -> Option<&DigestMap> {
        if path.is_empty() {
            return self.root_digests().map(|(_, root)| &root.structure);
        }
        self.current_entry(path)
            .filter(|e| e.is_directory())
            .and_then(|e| e.structure.as_ref())
    }

    /// Every algorithm a recorded folder structure digest is kept in
    pub fn structure_algorithms(&self) -> BTreeSet<HashAlgorithm> {
        let root = self
            .root_digests()
            .into_iter()
            .flat_map(|(_, root)| root.structure.keys());
        let folders = self
            .current_entries()
            .filter(|e| e.is_directory())
            .filter_map(|e| e.structure.as_ref())
            .flat_map(|structure| structure.keys());
        root.chain(folders).copied().collect()
    }

    /// Every recorded entry of a path, following rename links backward
    ///
    /// Records are returned oldest first. When the path was renamed, the
    /// records of its previous path up to the rename are included.
    pub fn path_history(&self, path: &str) -> Vec<PathRecord> {
        let mut records = Vec::new();
        let mut wanted = path.to_string();

        for stored in self.generations.iter().rev() {
            if let Some(entry) = stored.generation.entries.iter().find(|e| e.path == wanted) {
                records.push(PathRecord {
                    generation: stored.number(),
                    entry: entry.clone(),
                });
                if let Some(previous) = &entry.previous_path {
                    wanted = previous.clone();
                }
            }
        }

        records.reverse();
        records
    }
}
