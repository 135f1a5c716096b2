//! Generation session: one create or verify pass over a root folder
//!
//! A session borrows a [`History`] snapshot and owns all scan state (visited
//! paths, consumed rename sources, collected entries). The caller feeds it
//! folders in post-order via [`GenerationSession::seal_folder`] (or single
//! files via [`GenerationSession::seal_single`]) and ends it with
//! [`GenerationSession::finish`], which in create mode writes the manifest
//! and appends the chain record.
//!
//! ## Classification
//!
//! | history entry | fresh digest            | create     | verify                  |
//! |---------------|-------------------------|------------|-------------------------|
//! | none          | matches a vanished file | `renamed`  | structure hash mismatch |
//! | none          | no match                | `new`      | reported, not a failure |
//! | present       | equal                   | `unchanged`| OK                      |
//! | present       | different               | `modified` | content hash mismatch   |
//! | unreadable    |                         | `failed`   | unreadable              |
//!
//! Paths of the current state that were never visited become `missing`.
//!
//! ## Directory digests
//!
//! Every folder gets two digests once all of its children are sealed:
//!
//! - *content*: over the children's content digests, sorted by value, so a
//!   rename inside the folder leaves it untouched;
//! - *structure*: over `(name, structure)` pairs in listing order, where a
//!   file contributes only its name, so editing bytes in place leaves it
//!   untouched.
//!
//! A folder with an unreadable descendant gets no digests at all.
//!
//! File hashing inside one folder runs on a rayon pool; results are collected
//! in listing order before the folder's own digests are computed.

use crate::chain::Chain;
use crate::digest::HashAlgorithm;
use crate::error::{HashTrailError, Result};
use crate::history::{metadata_dir, History};
use crate::manifest::{
    CreatorInfo, DigestMap, DirectoryDigests, EntryKind, EntryStatus, Generation, HashEntry,
    RenameLink,
};
use crate::report::{FailureKind, PathFailure, Reporter, SessionMode, SessionReport};
use crate::traverse::{Folder, SkipReason};
use crate::utils::{absolute_in_root, atomic_write, file_facts, make_relative, manifest_path, root_name, FileFacts};
use chrono::{SubsecRound, Utc};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace};

/// Knobs of a single session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Algorithm for fresh digests
    pub algorithm: HashAlgorithm,
    /// Pair vanished files with new files of equal content
    pub detect_renames: bool,
    /// Report folder digests (create) or check folder structure digests (verify)
    pub directory_hashes: bool,
    /// Worker threads for file hashing
    pub parallel_workers: usize,
    /// Metadata written into a created generation
    pub creator: CreatorInfo,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            detect_renames: false,
            directory_hashes: false,
            parallel_workers: num_cpus::get(),
            creator: CreatorInfo::default(),
        }
    }
}

/// Outcome of sealing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Status the path received
    pub status: EntryStatus,
    /// Failure raised for the path, if any
    pub failure: Option<FailureKind>,
    /// Fresh digest in the session's algorithm
    pub digest: Option<String>,
}

/// Hash result for one file, produced on a worker thread
#[derive(Debug)]
struct FileScan {
    path: String,
    facts: Option<FileFacts>,
    result: std::result::Result<Scanned, String>,
}

#[derive(Debug)]
struct Scanned {
    fresh: String,
    /// Digest in an algorithm the history entry has, when it lacks the requested one
    fallback: Option<(HashAlgorithm, String)>,
}

enum ChildDigest<'d> {
    File(&'d str),
    Folder(&'d DirectoryDigests),
}

/// One create or verify pass
pub struct GenerationSession<'a> {
    history: &'a History,
    reporter: &'a Reporter,
    mode: SessionMode,
    options: SessionOptions,
    root: PathBuf,
    pool: rayon::ThreadPool,
    rename_index: HashMap<(HashAlgorithm, String), Vec<String>>,
    /// Algorithms folder structure digests are computed in
    structure_algorithms: Vec<HashAlgorithm>,
    visited: HashSet<String>,
    consumed_sources: HashSet<String>,
    entries: Vec<HashEntry>,
    renames: Vec<RenameLink>,
    /// Digests of finished folders whose parent is not finished yet
    folders: HashMap<String, Option<DirectoryDigests>>,
    root_digests: Option<DirectoryDigests>,
    single_file: bool,
    report: SessionReport,
}

impl std::fmt::Debug for GenerationSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationSession")
            .field("root", &self.root)
            .field("mode", &self.mode)
            .field("visited", &self.visited.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<'a> GenerationSession<'a> {
    /// Open a session against a history snapshot
    pub fn open(
        history: &'a History,
        mode: SessionMode,
        options: SessionOptions,
        reporter: &'a Reporter,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.parallel_workers.max(1))
            .build()
            .map_err(|e| HashTrailError::internal(format!("Failed to build worker pool: {}", e)))?;

        let mut rename_index: HashMap<(HashAlgorithm, String), Vec<String>> = HashMap::new();
        if options.detect_renames {
            for source in history.all_known_rename_sources() {
                for (algorithm, digest) in source.digests {
                    rename_index
                        .entry((algorithm, digest))
                        .or_default()
                        .push(source.path.clone());
                }
            }
        }

        // keep every structure algorithm the history already uses
        let mut structure_algorithms = history.structure_algorithms();
        structure_algorithms.insert(options.algorithm);

        debug!(
            "Opened {:?} session on {:?} at generation {}",
            mode,
            history.root(),
            history.latest_number()
        );

        Ok(Self {
            history,
            reporter,
            mode,
            root: history.root().to_path_buf(),
            options,
            pool,
            rename_index,
            structure_algorithms: structure_algorithms.into_iter().collect(),
            visited: HashSet::new(),
            consumed_sources: HashSet::new(),
            entries: Vec::new(),
            renames: Vec::new(),
            folders: HashMap::new(),
            root_digests: None,
            single_file: false,
            report: SessionReport::new(mode),
        })
    }

    /// Mode of this session
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Seal one file at a relative path
    pub fn seal(&mut self, path: &str) -> Classification {
        let scan = scan_file(self.history, &self.root, self.options.algorithm, path);
        self.classify(scan)
    }

    /// Seal every file of a folder, then compute the folder's digests
    ///
    /// Folders must arrive in post-order so that every subfolder is finished
    /// before its parent.
    #[instrument(skip_all, fields(folder = %folder.path.display()))]
    pub fn seal_folder(&mut self, folder: &Folder) -> Result<()> {
        let relative = manifest_path(&make_relative(&folder.path, &self.root)?);

        let file_paths: Vec<String> = folder
            .files()
            .map(|child| join_path(&relative, &child.name))
            .collect();

        let history = self.history;
        let root = self.root.as_path();
        let algorithm = self.options.algorithm;
        let scans: Vec<FileScan> = self.pool.install(|| {
            file_paths
                .par_iter()
                .map(|path| scan_file(history, root, algorithm, path))
                .collect()
        });

        let mut file_digests: HashMap<String, Option<String>> = HashMap::new();
        for scan in scans {
            let path = scan.path.clone();
            let classification = self.classify(scan);
            file_digests.insert(path, classification.digest);
        }

        let mut finished: Vec<(String, Option<DirectoryDigests>)> = Vec::new();
        for child in folder.children.iter().filter(|c| c.is_dir) {
            let path = join_path(&relative, &child.name);
            let digests = self.folders.remove(&path).flatten();
            finished.push((path, digests));
        }

        let mut complete = true;
        for skipped in &folder.skipped {
            let shown = manifest_path(&make_relative(&skipped.path, &self.root)?);
            match skipped.reason {
                SkipReason::NonUtf8Name => {
                    complete = false;
                    self.fail(
                        &shown,
                        FailureKind::Unreadable,
                        format!("{}: name is not valid UTF-8", shown),
                    );
                }
                SkipReason::SymlinkedFolder => self
                    .reporter
                    .detail(format!("skipping symbolic link to folder {}", shown)),
            }
        }

        let mut children: Vec<(&str, ChildDigest<'_>)> = Vec::with_capacity(folder.children.len());
        for child in &folder.children {
            let path = join_path(&relative, &child.name);
            let digest = if child.is_dir {
                finished
                    .iter()
                    .find(|(p, _)| *p == path)
                    .and_then(|(_, d)| d.as_ref())
                    .map(ChildDigest::Folder)
            } else {
                file_digests
                    .get(&path)
                    .and_then(|d| d.as_deref())
                    .map(ChildDigest::File)
            };
            match digest {
                Some(digest) => children.push((child.name.as_str(), digest)),
                None => complete = false,
            }
        }

        let digests = if complete {
            Some(directory_digests(algorithm, &self.structure_algorithms, &children))
        } else {
            debug!("Folder {:?} has unreadable descendants, no digests", relative);
            None
        };

        self.finish_folder(relative, digests);
        Ok(())
    }

    /// Seal one explicitly named file
    ///
    /// Single-file sessions record only the named files: no missing
    /// detection, no rename pairing and no folder digests.
    pub fn seal_single(&mut self, path: &str) -> Classification {
        self.single_file = true;
        let absolute = absolute_in_root(&self.root, path);

        if !absolute.is_file() {
            self.fail(path, FailureKind::MissingFile, format!("{} does not exist on disk", path));
            return Classification {
                status: EntryStatus::Missing,
                failure: Some(FailureKind::MissingFile),
                digest: None,
            };
        }

        let listed = self
            .history
            .current_entry(path)
            .map(|e| e.kind == EntryKind::File)
            .unwrap_or(false);
        if self.mode == SessionMode::Verify && !listed {
            self.visited.insert(path.to_string());
            self.fail(path, FailureKind::UnlistedFile, format!("{} is not listed in history", path));
            return Classification {
                status: EntryStatus::New,
                failure: Some(FailureKind::UnlistedFile),
                digest: None,
            };
        }

        self.seal(path)
    }

    fn classify(&mut self, scan: FileScan) -> Classification {
        let FileScan { path, facts, result } = scan;
        self.visited.insert(path.clone());
        let algorithm = self.options.algorithm;

        let scanned = match result {
            Ok(scanned) => scanned,
            Err(reason) => {
                self.fail(&path, FailureKind::Unreadable, format!("{}: {}", path, reason));
                let mut entry = HashEntry::file(&path, EntryStatus::Failed);
                apply_facts(&mut entry, facts);
                self.record(entry);
                return Classification {
                    status: EntryStatus::Failed,
                    failure: Some(FailureKind::Unreadable),
                    digest: None,
                };
            }
        };

        let history = self.history;
        let previous = history
            .current_entry(&path)
            .filter(|e| e.kind == EntryKind::File);

        let mut entry = HashEntry::file(&path, EntryStatus::New).with_digest(algorithm, &scanned.fresh);
        if let Some((fallback_algorithm, digest)) = &scanned.fallback {
            entry.digests.insert(*fallback_algorithm, digest.clone());
        }
        apply_facts(&mut entry, facts);

        let mut failure = None;
        match previous {
            None => match self.take_rename_source(algorithm, &scanned.fresh) {
                Some(source) => {
                    entry.status = EntryStatus::Renamed;
                    entry.previous_path = Some(source.clone());
                    self.renames.push(RenameLink {
                        path: path.clone(),
                        previous_path: source.clone(),
                    });
                    if self.mode == SessionMode::Verify {
                        failure = Some(self.fail(
                            &path,
                            FailureKind::StructureHashMismatch,
                            format!("for {}: renamed from {}", path, source),
                        ));
                    } else {
                        self.reporter.detail(format!("renamed file {} -> {}", source, path));
                    }
                }
                None => match self.mode {
                    SessionMode::Verify => {
                        self.reporter.detail(format!("new file found at path: {}", path))
                    }
                    SessionMode::Create => self.reporter.detail(format!(
                        "created original hash for {}  {}: {}",
                        path, algorithm, scanned.fresh
                    )),
                },
            },
            Some(previous) => {
                let (compare_algorithm, fresh) = match &scanned.fallback {
                    Some((a, d)) => (*a, d.as_str()),
                    None => (algorithm, scanned.fresh.as_str()),
                };
                let recorded = previous.digest(compare_algorithm).unwrap_or_default();

                if recorded == fresh {
                    entry.status = EntryStatus::Unchanged;
                    self.reporter
                        .ok(format!("verification ({}) of file {}", compare_algorithm, path));
                } else {
                    entry.status = EntryStatus::Modified;
                    let detail = format!(
                        "for {} old {}: {}, new {}: {}",
                        path, compare_algorithm, recorded, compare_algorithm, fresh
                    );
                    match self.mode {
                        SessionMode::Verify => {
                            failure = Some(self.fail(&path, FailureKind::ContentHashMismatch, detail))
                        }
                        SessionMode::Create => {
                            self.reporter.warning(format!("content changed {}", detail))
                        }
                    }
                }
            }
        }

        trace!("{} classified as {}", path, entry.status);
        let classification = Classification {
            status: entry.status,
            failure,
            digest: Some(scanned.fresh),
        };
        self.record(entry);
        classification
    }

    /// Find a vanished current-state file with the same digest
    fn take_rename_source(&mut self, algorithm: HashAlgorithm, digest: &str) -> Option<String> {
        if !self.options.detect_renames || self.single_file {
            return None;
        }

        let source = self
            .rename_index
            .get(&(algorithm, digest.to_string()))?
            .iter()
            .find(|candidate| {
                !self.visited.contains(*candidate)
                    && !self.consumed_sources.contains(*candidate)
                    && !absolute_in_root(&self.root, candidate).exists()
            })
            .cloned()?;

        self.consumed_sources.insert(source.clone());
        Some(source)
    }

    fn finish_folder(&mut self, relative: String, digests: Option<DirectoryDigests>) {
        let algorithm = self.options.algorithm;
        let history = self.history;
        let is_root = relative.is_empty();
        let label = if is_root {
            "root folder".to_string()
        } else {
            format!("folder {}", relative)
        };

        if let Some(d) = &digests {
            let content = d.content.get(&algorithm).map(String::as_str).unwrap_or_default();
            let structure = d.structure.get(&algorithm).map(String::as_str).unwrap_or_default();

            match self.mode {
                SessionMode::Create if self.options.directory_hashes => {
                    self.reporter.detail(format!(
                        "calculated directory hash for {}  {}: {} (content) {} (structure)",
                        label, algorithm, content, structure
                    ));
                }
                SessionMode::Verify if self.options.directory_hashes => {
                    let compared = history
                        .directory_structures(&relative)
                        .and_then(|recorded| common_digest(recorded, &d.structure, algorithm));
                    match compared {
                        Some((_, recorded, fresh)) if recorded == fresh => {
                            if is_root {
                                let generation =
                                    history.root_digests().map(|(g, _)| g).unwrap_or_default();
                                self.reporter.ok(format!(
                                    "verification of root folder (generation {:04})",
                                    generation
                                ));
                            } else {
                                self.reporter.ok(format!("verification of {}", label));
                            }
                        }
                        Some((used, recorded, fresh)) => {
                            self.fail(
                                &relative,
                                FailureKind::StructureHashMismatch,
                                format!(
                                    "for {} old {}: {}, new {}: {}",
                                    label, used, recorded, used, fresh
                                ),
                            );
                        }
                        None => self.reporter.detail(format!("new {} found", label)),
                    }
                }
                _ => {}
            }
        }

        if is_root {
            self.root_digests = digests;
            return;
        }

        self.visited.insert(relative.clone());
        let mut entry = HashEntry::directory(&relative, EntryStatus::Failed);
        if let Some(d) = &digests {
            let previous = history.current_entry(&relative).filter(|e| e.is_directory());
            entry.status = match previous {
                None => EntryStatus::New,
                Some(p) => {
                    let content_same = match p.digest(algorithm) {
                        Some(recorded) => d.content.get(&algorithm).map(String::as_str) == Some(recorded),
                        None => true,
                    };
                    let structure_same = p
                        .structure
                        .as_ref()
                        .and_then(|recorded| common_digest(recorded, &d.structure, algorithm))
                        .map_or(true, |(_, recorded, fresh)| recorded == fresh);
                    if content_same && structure_same {
                        EntryStatus::Unchanged
                    } else {
                        EntryStatus::Modified
                    }
                }
            };
            entry.digests = d.content.clone();
            entry.structure = Some(d.structure.clone());
        }
        self.record(entry);
        self.folders.insert(relative, digests);
    }

    fn fail(&mut self, path: &str, kind: FailureKind, detail: String) -> FailureKind {
        let failure = PathFailure {
            path: path.to_string(),
            kind,
            detail,
        };
        self.reporter.failure(&failure);
        self.report.failures.push(failure);
        kind
    }

    fn record(&mut self, entry: HashEntry) {
        if entry.kind == EntryKind::File {
            self.report.count(entry.status);
        }
        self.entries.push(entry);
    }

    /// Classify never-visited paths as missing
    fn collect_missing(&mut self) {
        let history = self.history;
        for previous in history.current_entries() {
            if self.visited.contains(&previous.path) || self.consumed_sources.contains(&previous.path) {
                continue;
            }

            let mut entry = HashEntry {
                status: EntryStatus::Missing,
                previous_path: None,
                structure: None,
                ..previous.clone()
            };
            if entry.kind == EntryKind::File {
                match self.mode {
                    SessionMode::Verify => {
                        self.fail(
                            &previous.path,
                            FailureKind::MissingFile,
                            format!("{} is listed in history but not on disk", previous.path),
                        );
                    }
                    SessionMode::Create => self
                        .reporter
                        .warning(format!("missing file {} recorded as missing", previous.path)),
                }
            } else {
                entry.digests = DigestMap::new();
            }
            self.record(entry);
        }
    }

    /// Reject a create run that looks like an unrecorded rename
    fn check_inconsistent_renames(&self) -> Result<()> {
        let mut fresh: HashMap<(HashAlgorithm, &str), &str> = HashMap::new();
        for entry in self
            .entries
            .iter()
            .filter(|e| e.kind == EntryKind::File && e.status == EntryStatus::New)
        {
            for (algorithm, digest) in &entry.digests {
                fresh.entry((*algorithm, digest.as_str())).or_insert(entry.path.as_str());
            }
        }

        for missing in self
            .entries
            .iter()
            .filter(|e| e.kind == EntryKind::File && e.status == EntryStatus::Missing)
        {
            for (algorithm, digest) in &missing.digests {
                if let Some(new) = fresh.get(&(*algorithm, digest.as_str())) {
                    return Err(HashTrailError::InconsistentRename {
                        missing: missing.path.clone(),
                        new: new.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// End the session
    ///
    /// Verify sessions return their report. Create sessions write the manifest
    /// and append the chain record first; if the run looks like an unrecorded
    /// rename nothing is written.
    pub fn finish(mut self) -> Result<SessionReport> {
        if !self.single_file {
            self.collect_missing();
        }
        self.report.renames = self.renames.clone();

        match self.mode {
            SessionMode::Verify => Ok(self.report),
            SessionMode::Create => {
                if !self.options.detect_renames {
                    self.check_inconsistent_renames()?;
                }
                self.commit()
            }
        }
    }

    fn commit(mut self) -> Result<SessionReport> {
        let generation = Generation {
            generation: self.history.latest_number() + 1,
            created_at: Utc::now().trunc_subsecs(0),
            creator: self.options.creator.clone(),
            root: self.root_digests.take(),
            entries: std::mem::take(&mut self.entries),
            renames: std::mem::take(&mut self.renames),
        };
        generation
            .validate()
            .map_err(|reason| HashTrailError::internal(format!("Refusing to write generation: {}", reason)))?;

        let dir = metadata_dir(&self.root);
        fs::create_dir_all(&dir)?;

        let name = generation.file_name(&root_name(&self.root));
        let bytes = generation.encode()?;
        atomic_write(&dir.join(&name), &bytes)?;

        let mut chain = Chain::load(&dir)?;
        chain.append(generation.generation, &name, &bytes)?;

        info!(
            "Created generation {} with {} entries",
            generation.generation,
            generation.entries.len()
        );
        self.reporter
            .detail(format!("created new generation {}", name));

        self.report.generation = Some(generation.generation);
        self.report.manifest = Some(name);
        Ok(self.report)
    }
}

fn scan_file(history: &History, root: &Path, algorithm: HashAlgorithm, path: &str) -> FileScan {
    let absolute = absolute_in_root(root, path);
    let facts = file_facts(&absolute).ok();

    let fallback_algorithm = history
        .current_entry(path)
        .filter(|e| e.kind == EntryKind::File && e.digest(algorithm).is_none())
        .and_then(|e| e.digests.keys().next().copied());

    let result = algorithm.hash_file(&absolute).and_then(|fresh| {
        let fallback = match fallback_algorithm {
            Some(other) => Some((other, other.hash_file(&absolute)?)),
            None => None,
        };
        Ok(Scanned { fresh, fallback })
    });

    FileScan {
        path: path.to_string(),
        facts,
        result: result.map_err(|e| e.to_string()),
    }
}

fn apply_facts(entry: &mut HashEntry, facts: Option<FileFacts>) {
    if let Some(facts) = facts {
        entry.size = Some(facts.size);
        entry.modified = facts.modified;
    }
}

fn join_path(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Pick an algorithm both maps carry, preferring `preferred`
fn common_digest<'m>(
    recorded: &'m DigestMap,
    fresh: &'m DigestMap,
    preferred: HashAlgorithm,
) -> Option<(HashAlgorithm, &'m str, &'m str)> {
    std::iter::once(preferred)
        .chain(recorded.keys().copied())
        .find_map(|alg| Some((alg, recorded.get(&alg)?.as_str(), fresh.get(&alg)?.as_str())))
}

/// Content digest in `algorithm`, structure digest in each of `structure_algorithms`
fn directory_digests(
    algorithm: HashAlgorithm,
    structure_algorithms: &[HashAlgorithm],
    children: &[(&str, ChildDigest<'_>)],
) -> DirectoryDigests {
    let mut contents: Vec<&str> = children
        .iter()
        .map(|(_, child)| match child {
            ChildDigest::File(digest) => *digest,
            ChildDigest::Folder(d) => d.content.get(&algorithm).map(String::as_str).unwrap_or_default(),
        })
        .collect();
    contents.sort_unstable();

    let mut content = algorithm.hasher();
    for digest in contents {
        content.update(digest.as_bytes());
        content.update(b"\n");
    }

    let structure = structure_algorithms
        .iter()
        .map(|&alg| {
            let mut hasher = alg.hasher();
            for (name, child) in children {
                hasher.update(name.as_bytes());
                hasher.update(b"\0");
                if let ChildDigest::Folder(d) = child {
                    let nested = d.structure.get(&alg).map(String::as_str).unwrap_or_default();
                    hasher.update(nested.as_bytes());
                }
                hasher.update(b"\n");
            }
            (alg, hasher.finalize())
        })
        .collect();

    DirectoryDigests {
        content: DigestMap::from([(algorithm, content.finalize())]),
        structure,
    }
}
