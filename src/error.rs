//! Error types for the hashtrail library
//!
//! Errors in this module are *fatal*: they abort the whole operation because
//! the records the operation depends on can no longer be trusted (a manifest
//! that does not parse, a chain that no longer matches its manifests, a
//! history that does not exist).
//!
//! Per-path problems found while scanning a tree (a file whose digest changed,
//! a file that disappeared) are not errors. They are recorded as
//! [`FailureKind`](crate::report::FailureKind) values on the session report so
//! that one bad file never stops the traversal of its siblings.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the hashtrail library
pub type Result<T> = std::result::Result<T, HashTrailError>;

/// Main error type for all hashtrail operations
#[derive(Debug, Error)]
pub enum HashTrailError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Verification was requested for a root that has no generations
    #[error("No history found at {0:?}")]
    NoHistory(PathBuf),

    /// A manifest could not be decoded or violates the data model
    #[error("Malformed manifest {path:?}: {reason}")]
    MalformedManifest {
        /// Manifest file (or a placeholder for in-memory input)
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// The chain file could not be parsed
    #[error("Malformed chain file {path:?} (line {line}): {reason}")]
    MalformedChain {
        /// Chain file path
        path: PathBuf,
        /// 1-based line number of the offending record
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The recorded digest of a chained manifest no longer matches its bytes
    #[error("Chain tamper detected for generation {generation} ({manifest}): {reason}")]
    ChainTamper {
        /// Generation whose record was altered
        generation: u32,
        /// Manifest file name recorded in the chain
        manifest: String,
        /// Description of the mismatch
        reason: String,
    },

    /// A manifest exists that the chain does not cover yet
    #[error("Generation {generation} ({manifest}) is not covered by the chain")]
    PendingGeneration {
        /// The uncovered generation
        generation: u32,
        /// Its manifest file name
        manifest: String,
    },

    /// A missing path and a new path share a digest but rename detection is off
    #[error("Inconsistent rename: {missing} is missing and {new} is new with identical content; enable rename detection")]
    InconsistentRename {
        /// Path recorded in history but absent on disk
        missing: String,
        /// Path present on disk with the same digest
        new: String,
    },

    /// Unknown hash algorithm name
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Pattern parsing error
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for HashTrailError {
    fn from(err: globset::Error) -> Self {
        HashTrailError::InvalidPattern(err.to_string())
    }
}

impl HashTrailError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        HashTrailError::Internal(msg.into())
    }

    /// Create a malformed manifest error
    pub fn malformed_manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HashTrailError::MalformedManifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error means the stored records themselves were altered
    pub fn is_tamper_evidence(&self) -> bool {
        matches!(
            self,
            HashTrailError::ChainTamper { .. }
                | HashTrailError::MalformedManifest { .. }
                | HashTrailError::MalformedChain { .. }
        )
    }

    /// Process exit code communicated to scripting callers
    pub fn exit_code(&self) -> i32 {
        match self {
            HashTrailError::InconsistentRename { .. } => 15,
            HashTrailError::NoHistory(_) => 30,
            HashTrailError::ChainTamper { .. } => 31,
            HashTrailError::MalformedManifest { .. } | HashTrailError::MalformedChain { .. } => 32,
            HashTrailError::PendingGeneration { .. } => 33,
            _ => 1,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            HashTrailError::NoHistory(path) => {
                format!("No history found for {:?}. Run 'hashtrail create' first.", path)
            }
            HashTrailError::InconsistentRename { missing, new } => {
                format!(
                    "{} looks like a rename of {}. Re-run create with --detect-renames to record it.",
                    new, missing
                )
            }
            HashTrailError::PendingGeneration { generation, manifest } => {
                format!(
                    "Generation {} ({}) was written but never added to the chain. \
                     Inspect it with 'hashtrail info' before creating new generations.",
                    generation, manifest
                )
            }
            _ => self.to_string(),
        }
    }
}
