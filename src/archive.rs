//! Archive facade: configuration, builder and the create/verify operations
//!
//! [`Archive`] ties the pieces together for one root folder. Every operation
//! loads a fresh [`History`] snapshot, checks the chain first, and drives a
//! [`GenerationSession`] over the traversal.
//!
//! ```rust,no_run
//! use hashtrail::{ArchiveBuilder, HashAlgorithm, Reporter};
//!
//! # fn main() -> hashtrail::Result<()> {
//! let archive = ArchiveBuilder::new()
//!     .hash_algorithm(HashAlgorithm::Xxh64)
//!     .detect_renames(true)
//!     .build("/media/card01")?;
//!
//! let reporter = Reporter::stdout(true);
//! let report = archive.create(&reporter)?;
//! println!("wrote generation {:?}", report.generation);
//! # Ok(())
//! # }
//! ```

use crate::chain::Chain;
use crate::digest::HashAlgorithm;
use crate::error::{HashTrailError, Result};
use crate::history::{metadata_dir, History};
use crate::manifest::CreatorInfo;
use crate::report::{Reporter, SessionMode, SessionReport};
use crate::session::{GenerationSession, SessionOptions};
use crate::traverse::{post_order, IgnoreRules, DEFAULT_IGNORED_NAMES};
use crate::utils::resolve_in_root;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Settings of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Algorithm for fresh digests
    pub hash_algorithm: HashAlgorithm,
    /// Pair vanished files with new files of identical content
    pub detect_renames: bool,
    /// Report and check folder digests
    pub directory_hashes: bool,
    /// Extra glob patterns to skip
    pub ignore_patterns: Vec<String>,
    /// Names that are always skipped
    pub ignored_names: Vec<String>,
    /// Worker threads for file hashing
    pub parallel_workers: usize,
    /// Comment stored with created generations
    pub comment: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            detect_renames: false,
            directory_hashes: false,
            ignore_patterns: Vec::new(),
            ignored_names: DEFAULT_IGNORED_NAMES.iter().map(|s| s.to_string()).collect(),
            parallel_workers: num_cpus::get(),
            comment: None,
        }
    }
}

impl ArchiveConfig {
    /// Read a JSON configuration file; absent fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text).map_err(|e| {
            HashTrailError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            algorithm: self.hash_algorithm,
            detect_renames: self.detect_renames,
            directory_hashes: self.directory_hashes,
            parallel_workers: self.parallel_workers,
            creator: CreatorInfo {
                comment: self.comment.clone(),
                ..CreatorInfo::default()
            },
        }
    }
}

/// Builder for [`Archive`]
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    config: ArchiveConfig,
}

impl ArchiveBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: ArchiveConfig) -> Self {
        Self { config }
    }

    /// Set the digest algorithm
    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.config.hash_algorithm = algorithm;
        self
    }

    /// Enable or disable rename detection
    pub fn detect_renames(mut self, enabled: bool) -> Self {
        self.config.detect_renames = enabled;
        self
    }

    /// Enable or disable folder digest reporting and checking
    pub fn directory_hashes(mut self, enabled: bool) -> Self {
        self.config.directory_hashes = enabled;
        self
    }

    /// Add glob patterns to skip
    ///
    /// Patterns match entry names and paths relative to the root. The
    /// metadata folder is always skipped.
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore_patterns.extend(patterns);
        self
    }

    /// Set number of parallel workers (values below 1 become 1)
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.config.parallel_workers = count.max(1);
        self
    }

    /// Comment stored with created generations
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.config.comment = Some(comment.into());
        self
    }

    /// Validate the settings and open the archive at `root`
    pub fn build(self, root: impl Into<PathBuf>) -> Result<Archive> {
        let root = root.into();
        if !root.is_dir() {
            return Err(HashTrailError::InvalidConfiguration(format!(
                "{} is not a folder",
                root.display()
            )));
        }
        if self.config.parallel_workers == 0 {
            return Err(HashTrailError::InvalidConfiguration(
                "parallel_workers must be at least 1".to_string(),
            ));
        }

        let mut names: Vec<String> = self.config.ignored_names.clone();
        names.push(crate::traverse::METADATA_FOLDER.to_string());
        let rules = IgnoreRules::new(names, &self.config.ignore_patterns)?;

        debug!("Opened archive at {:?} with {:?}", root, self.config);

        Ok(Archive {
            root,
            config: self.config,
            rules,
        })
    }
}

/// One root folder with its generational record
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
    config: ArchiveConfig,
    rules: IgnoreRules,
}

impl Archive {
    /// Root folder
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Settings in effect
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Folder holding manifests and the chain
    pub fn metadata_dir(&self) -> PathBuf {
        metadata_dir(&self.root)
    }

    /// Load the current history snapshot
    pub fn history(&self) -> Result<History> {
        History::load(&self.root)
    }

    /// Load the chain on its own
    pub fn chain(&self) -> Result<Chain> {
        Chain::load(&self.metadata_dir())
    }

    /// Verify every chain record against its manifest
    pub fn verify_chain(&self) -> Result<()> {
        self.chain()?.verify()
    }

    /// Write a new generation covering the whole tree
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn create(&self, reporter: &Reporter) -> Result<SessionReport> {
        let history = self.history_for_create()?;
        reporter.detail(format!("Creating new generation for folder at path: {}", self.root.display()));

        let mut session =
            GenerationSession::open(&history, SessionMode::Create, self.config.session_options(), reporter)?;
        for folder in post_order(&self.root, &self.rules) {
            session.seal_folder(&folder?)?;
        }

        let report = session.finish()?;
        info!("Created generation {:?} at {:?}", report.generation, self.root);
        Ok(report)
    }

    /// Write a new generation recording only the named files
    pub fn create_files(&self, files: &[PathBuf], reporter: &Reporter) -> Result<SessionReport> {
        let history = self.history_for_create()?;
        let paths = self.resolve_all(files)?;

        let mut session =
            GenerationSession::open(&history, SessionMode::Create, self.config.session_options(), reporter)?;
        for path in &paths {
            session.seal_single(path);
        }
        session.finish()
    }

    /// Compare the whole tree against history
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn verify(&self, reporter: &Reporter) -> Result<SessionReport> {
        let history = self.history_for_verify()?;
        reporter.detail(format!("check folder at path: {}", self.root.display()));

        let mut session =
            GenerationSession::open(&history, SessionMode::Verify, self.config.session_options(), reporter)?;
        for folder in post_order(&self.root, &self.rules) {
            session.seal_folder(&folder?)?;
        }

        let mut report = session.finish()?;
        self.note_pending(&history, &mut report, reporter);
        Ok(report)
    }

    /// Compare the named files against history
    pub fn verify_files(&self, files: &[PathBuf], reporter: &Reporter) -> Result<SessionReport> {
        let history = self.history_for_verify()?;
        let paths = self.resolve_all(files)?;

        let mut session =
            GenerationSession::open(&history, SessionMode::Verify, self.config.session_options(), reporter)?;
        for path in &paths {
            session.seal_single(path);
        }

        let mut report = session.finish()?;
        self.note_pending(&history, &mut report, reporter);
        Ok(report)
    }

    /// Manifest paths of the named files, first mention wins
    fn resolve_all(&self, files: &[PathBuf]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            let path = resolve_in_root(&self.root, file)?;
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// History for a create run: chain intact, no pending generation
    fn history_for_create(&self) -> Result<History> {
        self.verify_chain()?;
        let history = self.history()?;
        if let Some(pending) = history.pending().next() {
            return Err(HashTrailError::PendingGeneration {
                generation: pending.number(),
                manifest: pending.file_name.clone(),
            });
        }
        Ok(history)
    }

    /// History for a verify run: chain intact, at least one generation
    fn history_for_verify(&self) -> Result<History> {
        if !self.metadata_dir().is_dir() {
            return Err(HashTrailError::NoHistory(self.root.clone()));
        }
        self.verify_chain()?;
        History::load_required(&self.root)
    }

    fn note_pending(&self, history: &History, report: &mut SessionReport, reporter: &Reporter) {
        for pending in history.pending() {
            reporter.warning(format!(
                "generation {} ({}) is not covered by the chain",
                pending.number(),
                pending.file_name
            ));
            report.pending.push(pending.number());
        }
    }
}
