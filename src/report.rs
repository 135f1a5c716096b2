//! Per-path findings and the reporting context
//!
//! A session never prints on its own and never reads a global verbosity
//! flag. It is handed a [`Reporter`] that decides where lines go (stdout, an
//! in-memory buffer, nowhere) and whether per-path OK lines are shown.
//! Failures are always shown.
//!
//! Everything a session found is summarized in a [`SessionReport`], whose
//! [`exit_code`](SessionReport::exit_code) is the contract with scripting
//! callers.

use crate::manifest::{EntryStatus, RenameLink};
use colored::Colorize;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

/// Kind of a per-path failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    /// A file's bytes no longer match its recorded digest
    ContentHashMismatch,
    /// A folder's listing no longer matches its recorded structure digest
    StructureHashMismatch,
    /// Listed in history, absent on disk
    MissingFile,
    /// Present on disk, absent from history
    UnlistedFile,
    /// Could not be read
    Unreadable,
}

impl FailureKind {
    /// Exit code communicated for this kind
    pub fn exit_code(self) -> i32 {
        match self {
            FailureKind::ContentHashMismatch => 11,
            FailureKind::StructureHashMismatch => 12,
            FailureKind::MissingFile => 20,
            FailureKind::UnlistedFile => 21,
            FailureKind::Unreadable => 22,
        }
    }

    /// Lower is more severe
    fn rank(self) -> u8 {
        match self {
            FailureKind::StructureHashMismatch => 0,
            FailureKind::ContentHashMismatch => 1,
            FailureKind::MissingFile => 2,
            FailureKind::UnlistedFile => 3,
            FailureKind::Unreadable => 4,
        }
    }

    /// Short label used in report lines
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::ContentHashMismatch => "content hash mismatch",
            FailureKind::StructureHashMismatch => "structure hash mismatch",
            FailureKind::MissingFile => "missing file",
            FailureKind::UnlistedFile => "unlisted file",
            FailureKind::Unreadable => "unreadable file",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A failure recorded against one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFailure {
    /// Relative path (empty for the root folder)
    pub path: String,
    /// What went wrong
    pub kind: FailureKind,
    /// Human-readable detail
    pub detail: String,
}

/// Whether a session only checked or also wrote a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Read-only comparison against history
    Verify,
    /// Writes a new generation
    Create,
}

/// Summary of one session
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Mode the session ran in
    pub mode: SessionMode,
    /// Generation written by a create session
    pub generation: Option<u32>,
    /// Manifest file written by a create session
    pub manifest: Option<String>,
    /// How many paths ended up in each status
    pub status_counts: BTreeMap<&'static str, usize>,
    /// Per-path failures, in discovery order
    pub failures: Vec<PathFailure>,
    /// Renames paired in this session
    pub renames: Vec<RenameLink>,
    /// Generations found without chain coverage
    pub pending: Vec<u32>,
}

impl SessionReport {
    /// Empty report for a mode
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            generation: None,
            manifest: None,
            status_counts: BTreeMap::new(),
            failures: Vec::new(),
            renames: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Count one classified path
    pub fn count(&mut self, status: EntryStatus) {
        *self.status_counts.entry(status.as_str()).or_insert(0) += 1;
    }

    /// Number of paths with a status
    pub fn count_of(&self, status: EntryStatus) -> usize {
        self.status_counts.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Whether no failure was recorded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Most severe failure kind, if any
    pub fn dominant_failure(&self) -> Option<FailureKind> {
        self.failures.iter().map(|f| f.kind).min_by_key(|k| k.rank())
    }

    /// Failures of one kind
    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &PathFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    /// Process exit code
    ///
    /// Pending generations only decide the code when nothing worse happened.
    pub fn exit_code(&self) -> i32 {
        match self.dominant_failure() {
            Some(kind) => kind.exit_code(),
            None if !self.pending.is_empty() => 33,
            None => 0,
        }
    }
}

#[derive(Debug)]
enum Sink {
    Stdout,
    Buffer(Arc<Mutex<Vec<u8>>>),
    Silent,
}

/// Explicit output context for sessions
#[derive(Debug)]
pub struct Reporter {
    verbose: bool,
    color: bool,
    sink: Mutex<Sink>,
}

impl Reporter {
    /// Print to stdout
    pub fn stdout(verbose: bool) -> Self {
        Self {
            verbose,
            color: true,
            sink: Mutex::new(Sink::Stdout),
        }
    }

    /// Collect lines in memory (uncolored); the returned handle reads them back
    pub fn buffered(verbose: bool) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reporter = Self {
            verbose,
            color: false,
            sink: Mutex::new(Sink::Buffer(Arc::clone(&buffer))),
        };
        (reporter, buffer)
    }

    /// Discard everything
    pub fn silent() -> Self {
        Self {
            verbose: false,
            color: false,
            sink: Mutex::new(Sink::Silent),
        }
    }

    /// Whether per-path OK lines are shown
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    fn emit(&self, line: &str) {
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Stdout => println!("{}", line),
            Sink::Buffer(buffer) => {
                let mut buffer = buffer.lock();
                // writing to a Vec cannot fail
                let _ = writeln!(buffer, "{}", line);
            }
            Sink::Silent => {}
        }
    }

    /// Line shown in verbose mode only
    pub fn detail(&self, line: impl AsRef<str>) {
        if self.verbose {
            self.emit(line.as_ref());
        }
    }

    /// Line always shown
    pub fn line(&self, line: impl AsRef<str>) {
        self.emit(line.as_ref());
    }

    /// `<subject>: OK`, verbose mode only
    pub fn ok(&self, subject: impl AsRef<str>) {
        if self.verbose {
            let tag = if self.color {
                "OK".green().to_string()
            } else {
                "OK".to_string()
            };
            self.emit(&format!("{}: {}", subject.as_ref(), tag));
        }
    }

    /// `ERROR: <kind> <detail>`, always shown
    pub fn failure(&self, failure: &PathFailure) {
        let tag = if self.color {
            "ERROR".red().bold().to_string()
        } else {
            "ERROR".to_string()
        };
        self.emit(&format!("{}: {} {}", tag, failure.kind, failure.detail));
    }

    /// `WARNING: <message>`, always shown
    pub fn warning(&self, message: impl AsRef<str>) {
        let tag = if self.color {
            "WARNING".yellow().bold().to_string()
        } else {
            "WARNING".to_string()
        };
        self.emit(&format!("{}: {}", tag, message.as_ref()));
    }
}

/// Read a buffered reporter's output
pub fn buffered_text(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&buffer.lock()).into_owned()
}
