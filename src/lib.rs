//! # hashtrail - Tamper-evident generational hash records
//!
//! A library for keeping a verifiable, generational record of file content
//! digests and folder structure for a media archive, so that an auditor can
//! later prove whether a tree of files was altered since any past checkpoint
//! ("generation"), and tell content changes apart from structural ones.
//!
//! ## Overview
//!
//! hashtrail never stores file content. For every root folder it keeps:
//!
//! - one **manifest** per generation: every path's digests and a status tag
//!   (`new`, `unchanged`, `modified`, `renamed`, `missing`, `failed`), plus
//!   content and structure digests for every folder;
//! - one **chain** file: an append-only ledger holding the digest of every
//!   manifest's raw bytes, so edits to the records themselves are detectable.
//!
//! ## Architecture
//!
//! - **Traversal** ([`traverse`]): deterministic post-order walk with
//!   byte-order sorted children and ignore rules
//! - **History model** ([`history`]): all generations folded into a current
//!   state, with chain coverage per generation
//! - **Manifest codec** ([`manifest`]): byte-stable JSON encoding
//! - **Chain backend** ([`chain`]): append and re-verify manifest digests
//! - **Generation session** ([`session`]): classifies every path, computes
//!   folder digests and commits a new generation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hashtrail::{ArchiveBuilder, Reporter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let archive = ArchiveBuilder::new().build("/media/card01")?;
//!
//! // Record the current state as a new generation
//! let report = archive.create(&Reporter::stdout(false))?;
//! println!("generation {:?}", report.generation);
//!
//! // Later: check the tree against everything recorded so far
//! let report = archive.verify(&Reporter::stdout(true))?;
//! std::process::exit(report.exit_code());
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Operations return `Result<T, HashTrailError>`. Errors are reserved for
//! conditions that make the records untrustworthy or unusable (no history,
//! tampered chain, malformed manifest, an unrecorded rename). Per-path
//! problems found while scanning are collected in a [`SessionReport`]
//! instead, and never stop the traversal.
//!
//! ## Module Organization
//!
//! - [`archive`]: configuration, builder and the create/verify operations
//! - [`digest`]: the closed registry of digest algorithms
//! - [`report`]: per-path failures, exit codes and the reporting context
//! - [`error`]: error types and handling

// Public API modules
pub mod archive;
pub mod chain;
pub mod digest;
pub mod error;
pub mod history;
pub mod manifest;
pub mod report;
pub mod session;
pub mod traverse;

// Helpers shared with the command line front end
pub mod utils;

// Re-export main types for convenience
pub use archive::{Archive, ArchiveBuilder, ArchiveConfig};
pub use chain::{Chain, ChainEntry, EntryState};
pub use digest::{DigestToken, HashAlgorithm};
pub use error::{HashTrailError, Result};
pub use history::{History, StoredGeneration, Trust};
pub use manifest::{EntryKind, EntryStatus, Generation, HashEntry, RenameLink};
pub use report::{FailureKind, Reporter, SessionMode, SessionReport};
pub use session::{GenerationSession, SessionOptions};
