//! # hashtrail CLI - tamper-evident hash records for media archives
//!
//! ## Usage
//! ```bash
//! # Record the current state of a card as a new generation
//! hashtrail create /media/card01 -v
//!
//! # Check the card against every recorded generation
//! hashtrail verify /media/card01 -v --directory-hashes
//!
//! # Check a single file
//! hashtrail verify /media/card01 --single-file A/A1.txt
//!
//! # Record a rename instead of a missing + new pair
//! hashtrail create /media/card01 --detect-renames
//!
//! # Inspect generations, one path's history, or the chain
//! hashtrail info /media/card01
//! hashtrail info /media/card01 --single-file A/A1.txt
//! hashtrail chain /media/card01
//! ```
//!
//! The process exit code reports the most severe finding (see
//! `hashtrail --help`).

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use hashtrail::utils::format_bytes;
use hashtrail::{
    ArchiveBuilder, ArchiveConfig, Archive, EntryState, EntryStatus, HashAlgorithm, Reporter,
    Result, SessionReport, Trust,
};

const EXIT_CODES: &str = "\
Exit codes:
  0   success
  1   unexpected error
  11  content hash mismatch
  12  structure hash mismatch
  15  inconsistent rename (re-run create with --detect-renames)
  20  file listed in history is missing
  21  file on disk is not listed in history
  22  file could not be read
  30  no history found
  31  chain tamper detected
  32  malformed manifest or chain
  33  generation not covered by the chain";

/// hashtrail - generational, tamper-evident hash records for folders
#[derive(Parser)]
#[command(name = "hashtrail")]
#[command(version)]
#[command(about = "Tamper-evident generational hash records for media archives")]
#[command(after_help = EXIT_CODES)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new generation for a folder
    Create {
        #[command(flatten)]
        scan: ScanArgs,

        /// Comment stored with the generation
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// Check a folder against its history
    Verify {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Show the generations of a folder, or one file's history
    Info {
        /// Root folder
        root: PathBuf,

        /// Show the history of one file
        #[arg(short, long)]
        single_file: Option<PathBuf>,
    },

    /// Show every chain record and whether it still holds
    Chain {
        /// Root folder
        root: PathBuf,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Root folder
    root: PathBuf,

    /// Hash algorithm for fresh digests
    #[arg(short = 'a', long, value_enum)]
    hash_format: Option<HashFormat>,

    /// Report and check folder digests
    #[arg(long, visible_alias = "dh")]
    directory_hashes: bool,

    /// Pair vanished files with new files of identical content
    #[arg(long, visible_alias = "dr")]
    detect_renames: bool,

    /// Only look at these files (repeatable)
    #[arg(short, long)]
    single_file: Vec<PathBuf>,

    /// Glob patterns to skip (repeatable)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show a spinner while scanning
    #[arg(long)]
    progress: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum HashFormat {
    Md5,
    Sha1,
    Sha256,
    Xxh64,
    Xxh3,
    Xxh128,
    Blake3,
}

impl From<HashFormat> for HashAlgorithm {
    fn from(format: HashFormat) -> Self {
        match format {
            HashFormat::Md5 => HashAlgorithm::Md5,
            HashFormat::Sha1 => HashAlgorithm::Sha1,
            HashFormat::Sha256 => HashAlgorithm::Sha256,
            HashFormat::Xxh64 => HashAlgorithm::Xxh64,
            HashFormat::Xxh3 => HashAlgorithm::Xxh3,
            HashFormat::Xxh128 => HashAlgorithm::Xxh128,
            HashFormat::Blake3 => HashAlgorithm::Blake3,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e.user_message());
            std::process::exit(e.exit_code());
        }
    }
}

/// Main command runner, returns the process exit code
fn run(cli: Cli) -> Result<i32> {
    let verbose = cli.verbose;
    match cli.command {
        Commands::Create { scan, comment } => cmd_create(scan, comment, verbose),
        Commands::Verify { scan } => cmd_verify(scan, verbose),
        Commands::Info { root, single_file } => cmd_info(root, single_file, verbose),
        Commands::Chain { root } => cmd_chain(root),
    }
}

/// Open the archive described by the scan options
fn open_archive(scan: &ScanArgs, comment: Option<String>) -> Result<Archive> {
    let config = match &scan.config {
        Some(path) => ArchiveConfig::load(path)?,
        None => ArchiveConfig::default(),
    };

    let mut builder = ArchiveBuilder::from_config(config.clone())
        .ignore_patterns(scan.ignore.clone())
        .detect_renames(config.detect_renames || scan.detect_renames)
        .directory_hashes(config.directory_hashes || scan.directory_hashes);
    if let Some(format) = scan.hash_format {
        builder = builder.hash_algorithm(format.into());
    }
    if let Some(comment) = comment {
        builder = builder.comment(comment);
    }
    builder.build(scan.root.clone())
}

fn spinner(enabled: bool, message: &str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Write a new generation
fn cmd_create(scan: ScanArgs, comment: Option<String>, verbose: bool) -> Result<i32> {
    let archive = open_archive(&scan, comment)?;
    let reporter = Reporter::stdout(verbose);

    let start = Instant::now();
    let progress = spinner(scan.progress, "Hashing files...");

    let result = if scan.single_file.is_empty() {
        archive.create(&reporter)
    } else {
        archive.create_files(&scan.single_file, &reporter)
    };

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let report = result?;

    if let Some(manifest) = &report.manifest {
        println!(
            "{} Created generation {} ({})",
            "✓".green().bold(),
            format!("{:04}", report.generation.unwrap_or_default()).yellow().bold(),
            manifest.dimmed()
        );
    }
    print_summary(&report, start.elapsed());

    Ok(report.exit_code())
}

/// Check a folder (or single files) against history
fn cmd_verify(scan: ScanArgs, verbose: bool) -> Result<i32> {
    let archive = open_archive(&scan, None)?;
    let reporter = Reporter::stdout(verbose);

    let start = Instant::now();
    let progress = spinner(scan.progress, "Verifying files...");

    let result = if scan.single_file.is_empty() {
        archive.verify(&reporter)
    } else {
        archive.verify_files(&scan.single_file, &reporter)
    };

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let report = result?;

    if verbose {
        print_summary(&report, start.elapsed());
    }
    Ok(report.exit_code())
}

fn print_summary(report: &SessionReport, elapsed: Duration) {
    let counts: Vec<String> = report
        .status_counts
        .iter()
        .map(|(status, count)| format!("{}: {}", status, count))
        .collect();
    if !counts.is_empty() {
        println!("  Files: {}", counts.join(", ").cyan());
    }
    if !report.renames.is_empty() {
        println!("  Renames: {}", report.renames.len().to_string().yellow());
    }
    if !report.failures.is_empty() {
        println!("  Failures: {}", report.failures.len().to_string().red());
    }
    println!("  Time: {}", format_duration(round_millis(elapsed)).to_string().cyan());
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// Show generations or one file's history
fn cmd_info(root: PathBuf, single_file: Option<PathBuf>, verbose: bool) -> Result<i32> {
    let archive = ArchiveBuilder::new().build(root)?;
    let history = archive.history()?;
    if history.is_empty() {
        return Err(hashtrail::HashTrailError::NoHistory(archive.root().to_path_buf()));
    }

    if let Some(file) = single_file {
        let path = hashtrail::utils::resolve_in_root(archive.root(), &file)?;
        let records = history.path_history(&path);
        if records.is_empty() {
            println!("{} {}", "No records for".yellow(), path);
            return Ok(21);
        }

        println!("{} {}", "Info for".blue().bold(), path.yellow());
        for record in records {
            let entry = &record.entry;
            let digests: Vec<String> = entry
                .digests
                .iter()
                .map(|(alg, digest)| format!("{}: {}", alg, digest))
                .collect();
            println!(
                "  Generation {} {:<10} {} {}",
                record.generation,
                entry.status.to_string(),
                entry.path,
                digests.join(", ").dimmed()
            );
            if let Some(previous) = &entry.previous_path {
                println!("      renamed from {}", previous.cyan());
            }
            if verbose {
                if let Some(size) = entry.size {
                    println!("      size {}", format_bytes(size));
                }
                if let Some(modified) = entry.modified {
                    println!("      modified {}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
        }
        return Ok(0);
    }

    println!(
        "{} {}",
        "History of".blue().bold(),
        archive.root().display().to_string().cyan()
    );
    for stored in history.generations() {
        let generation = &stored.generation;
        let trust = match stored.trust {
            Trust::Trusted => "✓ chained".green(),
            Trust::Pending => "⚠ pending".yellow(),
        };
        println!(
            "\n  Generation {} {} {}",
            format!("{:04}", generation.generation).yellow().bold(),
            generation.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            trust
        );
        println!("    Manifest: {}", stored.file_name.dimmed());
        println!(
            "    Creator: {} {} on {}{}",
            generation.creator.tool,
            generation.creator.version,
            generation.creator.hostname,
            generation
                .creator
                .user
                .as_ref()
                .map(|u| format!(" ({})", u))
                .unwrap_or_default()
        );
        if let Some(comment) = &generation.creator.comment {
            println!("    Comment: {}", comment.cyan());
        }

        let statuses = [
            EntryStatus::New,
            EntryStatus::Unchanged,
            EntryStatus::Modified,
            EntryStatus::Renamed,
            EntryStatus::Missing,
            EntryStatus::Failed,
        ];
        let counts: Vec<String> = statuses
            .iter()
            .map(|s| (s, generation.count(*s)))
            .filter(|(_, n)| *n > 0)
            .map(|(s, n)| format!("{}: {}", s, n))
            .collect();
        println!("    Entries: {}", counts.join(", "));

        if verbose {
            if let Some(root) = &generation.root {
                for (alg, digest) in &root.structure {
                    println!("    Root structure {}: {}", alg, digest.dimmed());
                }
                for (alg, digest) in &root.content {
                    println!("    Root content {}: {}", alg, digest.dimmed());
                }
            }
        }
    }

    Ok(if history.pending().next().is_some() { 33 } else { 0 })
}

/// Show the chain and re-check every record
fn cmd_chain(root: PathBuf) -> Result<i32> {
    let archive = ArchiveBuilder::new().build(root)?;
    let chain = archive.chain()?;
    if chain.is_empty() {
        println!("{}", "Chain is empty".yellow());
        return Ok(0);
    }

    println!("{} {}", "Chain".blue().bold(), chain.path().display().to_string().dimmed());
    let mut exit_code = 0;
    for (entry, state) in chain.inspect()? {
        let verdict = match &state {
            EntryState::Intact => "✓ intact".green(),
            EntryState::Altered { .. } => "✗ altered".red(),
            EntryState::Absent => "✗ absent".red(),
        };
        println!(
            "  {} {} {} {}",
            format!("{:04}", entry.generation).yellow(),
            entry.manifest,
            entry.digest.to_string().dimmed(),
            verdict
        );
        if let EntryState::Altered { actual } = &state {
            println!("      now {}:{}", entry.digest.algorithm, actual);
        }
        if !state.is_intact() {
            exit_code = 31;
        }
    }

    Ok(exit_code)
}
