//! Deterministic post-order directory traversal
//!
//! Structure hashes are only reproducible if every machine visits a tree in
//! the same order. [`post_order`] walks a root folder and yields one
//! [`Folder`] per directory, deepest first, each carrying its immediate
//! children sorted by the raw bytes of their names (not locale collation).
//! A folder is only yielded after all of its subfolders have been yielded, so
//! a consumer can compute a directory hash from already-finished children.
//!
//! Ignored names never appear in a children list and are never descended
//! into, so they cannot influence any hash. Names that are not valid UTF-8
//! and symbolic links to folders are not listed either; they are reported in
//! [`Folder::skipped`] so the caller can surface them.
//!
//! ```text
//! root/                  yields, in order:
//! ├── A/                   A      [A1.txt]
//! │   └── A1.txt           B      [B1.txt]
//! ├── B/                   root   [A/, B/, Stuff.txt]
//! │   └── B1.txt
//! └── Stuff.txt
//! ```

use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// Name of the folder that holds manifests and the chain inside a root
pub const METADATA_FOLDER: &str = "hashtrail";

/// Names that are always excluded from traversal
pub const DEFAULT_IGNORED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", METADATA_FOLDER];

/// Names and glob patterns excluded from traversal
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    names: BTreeSet<String>,
    patterns: Vec<String>,
    globs: GlobSet,
}

impl IgnoreRules {
    /// Build rules from exact names plus glob patterns
    ///
    /// Patterns are matched against both the entry name and its path relative
    /// to the traversal root, so `*.tmp` and `cache/**` both work.
    pub fn new<I, S>(names: I, patterns: &[String]) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            names: names.into_iter().map(Into::into).collect(),
            patterns: patterns.to_vec(),
            globs: builder.build()?,
        })
    }

    /// Default rules extended with extra glob patterns
    pub fn with_patterns(patterns: &[String]) -> Result<Self> {
        Self::new(DEFAULT_IGNORED_NAMES.iter().copied(), patterns)
    }

    /// Glob patterns in effect
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether an entry should be skipped
    pub fn is_ignored(&self, name: &str, relative: &Path) -> bool {
        self.names.contains(name) || self.globs.is_match(name) || self.globs.is_match(relative)
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            names: DEFAULT_IGNORED_NAMES.iter().map(|s| s.to_string()).collect(),
            patterns: Vec::new(),
            globs: GlobSet::empty(),
        }
    }
}

/// An immediate child of a folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    /// File or folder name
    pub name: String,
    /// Whether the child is a directory
    pub is_dir: bool,
}

/// Why an entry was left out of its folder's children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The name is not valid UTF-8 and cannot be stored as a manifest path
    NonUtf8Name,
    /// A symbolic link pointing at a folder; links are never followed
    SymlinkedFolder,
}

/// An entry the walk saw but did not list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Full path of the entry
    pub path: PathBuf,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// One folder together with its sorted children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Absolute (or root-joined) path of the folder
    pub path: PathBuf,
    /// Depth below the traversal root (root is 0)
    pub depth: usize,
    /// Immediate children, sorted by name bytes
    pub children: Vec<ChildEntry>,
    /// Immediate entries that could not be listed
    pub skipped: Vec<SkippedEntry>,
}

impl Folder {
    fn open(path: PathBuf, depth: usize) -> Self {
        Self {
            path,
            depth,
            children: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Children that are regular files (or anything that is not a folder)
    pub fn files(&self) -> impl Iterator<Item = &ChildEntry> {
        self.children.iter().filter(|c| !c.is_dir)
    }
}

/// Lazy, single-pass post-order walk
///
/// The underlying walk runs in pre-order so ignored folders are never
/// entered. A folder is complete once the walk reaches an entry at the same
/// depth or shallower, at which point it is moved to `ready`.
pub struct PostOrderWalk {
    inner: walkdir::IntoIter,
    root: PathBuf,
    rules: IgnoreRules,
    /// Folders whose listing is still being read, outermost first
    open: Vec<Folder>,
    ready: VecDeque<Folder>,
    exhausted: bool,
}

impl std::fmt::Debug for PostOrderWalk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostOrderWalk")
            .field("root", &self.root)
            .field("open_levels", &self.open.len())
            .field("ready", &self.ready.len())
            .finish()
    }
}

/// Walk `root` in post-order with lexicographically sorted children
pub fn post_order(root: &Path, rules: &IgnoreRules) -> PostOrderWalk {
    let inner = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    PostOrderWalk {
        inner,
        root: root.to_path_buf(),
        rules: rules.clone(),
        open: Vec::new(),
        ready: VecDeque::new(),
        exhausted: false,
    }
}

impl PostOrderWalk {
    /// Move every open folder at `depth` or deeper to the ready queue
    fn close_from(&mut self, depth: usize) {
        while self.open.last().is_some_and(|f| f.depth >= depth) {
            if let Some(folder) = self.open.pop() {
                self.ready.push_back(folder);
            }
        }
    }

    fn skip(&mut self, entry: DirEntry, reason: SkipReason) {
        debug!("Skipping {} ({:?})", entry.path().display(), reason);
        if let Some(parent) = self.open.last_mut() {
            parent.skipped.push(SkippedEntry {
                path: entry.into_path(),
                reason,
            });
        }
    }

    fn visit(&mut self, entry: DirEntry) {
        let depth = entry.depth();
        self.close_from(depth);

        if depth == 0 {
            self.open.push(Folder::open(entry.into_path(), 0));
            return;
        }

        let is_dir = entry.file_type().is_dir();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            if is_dir {
                self.inner.skip_current_dir();
            }
            self.skip(entry, SkipReason::NonUtf8Name);
            return;
        };

        let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
        if self.rules.is_ignored(&name, relative) {
            trace!("Ignoring {}", entry.path().display());
            if is_dir {
                self.inner.skip_current_dir();
            }
            return;
        }

        if entry.path_is_symlink() && fs::metadata(entry.path()).is_ok_and(|m| m.is_dir()) {
            self.skip(entry, SkipReason::SymlinkedFolder);
            return;
        }

        if let Some(parent) = self.open.last_mut() {
            parent.children.push(ChildEntry {
                name,
                is_dir,
            });
        }
        if is_dir {
            self.open.push(Folder::open(entry.into_path(), depth));
        }
    }
}

impl Iterator for PostOrderWalk {
    type Item = Result<Folder>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(folder) = self.ready.pop_front() {
                return Some(Ok(folder));
            }
            if self.exhausted {
                return None;
            }

            match self.inner.next() {
                Some(Ok(entry)) => self.visit(entry),
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    self.exhausted = true;
                    self.close_from(0);
                }
            }
        }
    }
}
