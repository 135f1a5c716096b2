//! Append-only chain of manifest digests
//!
//! The chain file lives next to the manifests and holds one JSON object per
//! line:
//!
//! ```text
//! {"generation":1,"manifest":"0001_card01_2020-01-16_091500Z.mhl","digest":"sha256:9f86d0..."}
//! {"generation":2,"manifest":"0002_card01_2020-01-17_101200Z.mhl","digest":"sha256:60303a..."}
//! ```
//!
//! Each record is written once, right after its manifest, and never touched
//! again. Re-reading every referenced manifest and recomputing its digest is
//! what separates "the tracked files changed" from "the records about the
//! tracked files were altered".
//!
//! The chain parses on its own; it does not need the history model, so an
//! auditor can validate the records before trusting anything in them.

use crate::digest::{DigestToken, HashAlgorithm};
use crate::error::{HashTrailError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the chain inside the metadata folder
pub const CHAIN_FILE_NAME: &str = "hashtrail_chain.jsonl";

/// Algorithm used to digest manifest bytes
pub const CHAIN_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// One chain record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Generation the record covers
    pub generation: u32,
    /// Manifest file name inside the metadata folder
    pub manifest: String,
    /// Digest of the manifest's raw bytes
    pub digest: DigestToken,
}

/// Result of re-checking one chain record against the disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Manifest bytes still produce the recorded digest
    Intact,
    /// Manifest exists but its digest changed
    Altered {
        /// Digest of the bytes found on disk
        actual: String,
    },
    /// Referenced manifest no longer exists
    Absent,
}

impl EntryState {
    /// Whether the record still holds
    pub fn is_intact(&self) -> bool {
        matches!(self, EntryState::Intact)
    }
}

/// The chain of one metadata folder
#[derive(Debug, Clone)]
pub struct Chain {
    metadata_dir: PathBuf,
    entries: Vec<ChainEntry>,
}

impl Chain {
    /// Load the chain of a metadata folder; a missing chain file is an empty chain
    pub fn load(metadata_dir: &Path) -> Result<Self> {
        let path = metadata_dir.join(CHAIN_FILE_NAME);
        let entries = match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text, &path)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Loaded {} chain entries from {:?}", entries.len(), path);

        Ok(Self {
            metadata_dir: metadata_dir.to_path_buf(),
            entries,
        })
    }

    /// Parse chain text into its ordered records
    ///
    /// Record `k` (1-based, blank lines skipped) must cover generation `k`.
    pub fn parse(text: &str, path: &Path) -> Result<Vec<ChainEntry>> {
        let mut entries: Vec<ChainEntry> = Vec::new();

        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let malformed = |reason: String| HashTrailError::MalformedChain {
                path: path.to_path_buf(),
                line: index + 1,
                reason,
            };

            let entry: ChainEntry =
                serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;

            let expected = entries.len() as u32 + 1;
            if entry.generation != expected {
                return Err(malformed(format!(
                    "expected generation {}, found {}",
                    expected, entry.generation
                )));
            }
            if crate::manifest::parse_manifest_file_name(&entry.manifest) != Some(entry.generation) {
                return Err(malformed(format!(
                    "manifest name {} does not match generation {}",
                    entry.manifest, entry.generation
                )));
            }
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Path of the chain file
    pub fn path(&self) -> PathBuf {
        self.metadata_dir.join(CHAIN_FILE_NAME)
    }

    /// All records in order
    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// Record covering a generation
    pub fn entry_for(&self, generation: u32) -> Option<&ChainEntry> {
        generation
            .checked_sub(1)
            .and_then(|i| self.entries.get(i as usize))
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain has no records
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a record for a freshly written manifest
    ///
    /// The line is written in a single call and synced before returning.
    pub fn append(&mut self, generation: u32, manifest: &str, bytes: &[u8]) -> Result<&ChainEntry> {
        let expected = self.entries.len() as u32 + 1;
        if generation != expected {
            return Err(HashTrailError::internal(format!(
                "chain expects generation {}, got {}",
                expected, generation
            )));
        }

        let entry = ChainEntry {
            generation,
            manifest: manifest.to_string(),
            digest: DigestToken::of(CHAIN_ALGORITHM, bytes),
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        info!("Appended chain entry for generation {} ({})", generation, entry.digest);

        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Re-read one record's manifest and compare digests
    pub fn check(&self, entry: &ChainEntry) -> Result<EntryState> {
        let bytes = match fs::read(self.metadata_dir.join(&entry.manifest)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(EntryState::Absent),
            Err(e) => return Err(e.into()),
        };

        let actual = entry.digest.algorithm.compute(&bytes);
        if actual == entry.digest.digest {
            Ok(EntryState::Intact)
        } else {
            Ok(EntryState::Altered { actual })
        }
    }

    /// Check every record without stopping at the first problem
    pub fn inspect(&self) -> Result<Vec<(&ChainEntry, EntryState)>> {
        self.entries
            .iter()
            .map(|entry| self.check(entry).map(|state| (entry, state)))
            .collect()
    }

    /// Verify every record in order, failing on the first one that no longer holds
    pub fn verify(&self) -> Result<()> {
        for entry in &self.entries {
            match self.check(entry)? {
                EntryState::Intact => {}
                EntryState::Altered { actual } => {
                    warn!("Manifest {} was altered after it was chained", entry.manifest);
                    return Err(HashTrailError::ChainTamper {
                        generation: entry.generation,
                        manifest: entry.manifest.clone(),
                        reason: format!(
                            "recorded {} but manifest now hashes to {}:{}",
                            entry.digest, entry.digest.algorithm, actual
                        ),
                    });
                }
                EntryState::Absent => {
                    warn!("Chained manifest {} is gone", entry.manifest);
                    return Err(HashTrailError::ChainTamper {
                        generation: entry.generation,
                        manifest: entry.manifest.clone(),
                        reason: "manifest file is missing".to_string(),
                    });
                }
            }
        }

        debug!("Chain of {} entries verified", self.entries.len());
        Ok(())
    }
}
