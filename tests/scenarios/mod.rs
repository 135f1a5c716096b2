//! Scenario tests for hashtrail
//!
//! Real-world offload situations: a card recorded once and then checked,
//! edited, renamed, re-hashed with another algorithm, and tampered with.

use ::hashtrail::report::buffered_text;
use ::hashtrail::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A root folder plus helpers to mutate it and run sessions
pub struct CardFixture {
    pub temp_dir: TempDir,
}

impl CardFixture {
    /// `{A/A1.txt, Stuff.txt}`
    pub fn simple() -> Self {
        let fixture = Self {
            temp_dir: TempDir::new().unwrap(),
        };
        fixture.write("A/A1.txt", "A1\n");
        fixture.write("Stuff.txt", "stuff\n");
        fixture
    }

    /// `{A/A1.txt, A/AA/AA1.txt, B/B1.txt, Stuff.txt}`
    pub fn nested() -> Self {
        let fixture = Self::simple();
        fixture.write("A/AA/AA1.txt", "AA1\n");
        fixture.write("B/B1.txt", "B1\n");
        fixture
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn append(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        let mut existing = fs::read(&path).unwrap();
        existing.extend_from_slice(content.as_bytes());
        fs::write(path, existing).unwrap();
    }

    pub fn rename(&self, from: &str, to: &str) {
        fs::rename(self.root().join(from), self.root().join(to)).unwrap();
    }

    pub fn archive(&self) -> Archive {
        ArchiveBuilder::new().build(self.root()).unwrap()
    }

    pub fn archive_with(&self, configure: impl FnOnce(ArchiveBuilder) -> ArchiveBuilder) -> Archive {
        configure(ArchiveBuilder::new()).build(self.root()).unwrap()
    }

    pub fn manifest_text(&self, report: &SessionReport) -> String {
        let name = report.manifest.as_ref().unwrap();
        fs::read_to_string(self.root().join("hashtrail").join(name)).unwrap()
    }
}

#[test]
fn test_create_then_verify_reports_in_order() {
    let card = CardFixture::simple();
    let archive = card.archive();
    archive.create(&Reporter::silent()).unwrap();

    let (reporter, buffer) = Reporter::buffered(true);
    let report = archive.verify(&reporter).unwrap();
    assert_eq!(report.exit_code(), 0);

    let text = buffered_text(&buffer);
    let first = text.find("verification (xxh64) of file A/A1.txt: OK").unwrap();
    let second = text.find("verification (xxh64) of file Stuff.txt: OK").unwrap();
    assert!(first < second);
}

#[test]
fn test_appended_bytes_fail_single_file_verify() {
    let card = CardFixture::simple();
    let archive = card.archive();
    archive.create(&Reporter::silent()).unwrap();

    card.append("A/A1.txt", "!!");

    let (reporter, buffer) = Reporter::buffered(true);
    let report = archive
        .verify_files(&[PathBuf::from("A/A1.txt")], &reporter)
        .unwrap();
    assert_eq!(report.exit_code(), 11);
    assert!(buffered_text(&buffer).contains("ERROR: content hash mismatch for A/A1.txt"));

    // the untouched sibling still verifies
    let report = archive
        .verify_files(&[PathBuf::from("Stuff.txt")], &Reporter::silent())
        .unwrap();
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn test_rename_requires_detection() {
    let card = CardFixture::nested();
    let archive = card.archive();
    archive.create(&Reporter::silent()).unwrap();

    card.rename("B/B1.txt", "B/B2.txt");

    let err = archive.create(&Reporter::silent()).unwrap_err();
    assert!(matches!(err, HashTrailError::InconsistentRename { .. }));
    assert_eq!(err.exit_code(), 15);
    assert_eq!(archive.history().unwrap().latest_number(), 1);

    let detecting = card.archive_with(|b| b.detect_renames(true));
    let report = detecting.create(&Reporter::silent()).unwrap();
    assert_eq!(report.generation, Some(2));
    assert_eq!(report.count_of(EntryStatus::Renamed), 1);
    assert_eq!(report.count_of(EntryStatus::Missing), 0);

    let manifest = card.manifest_text(&report);
    assert_eq!(manifest.matches("previous_path").count(), 2);
    assert!(manifest.contains("B/B1.txt"));
    assert!(manifest.contains("B/B2.txt"));

    // the new layout verifies cleanly afterwards
    assert_eq!(detecting.verify(&Reporter::silent()).unwrap().exit_code(), 0);
}

#[test]
fn test_idempotent_create() {
    let card = CardFixture::nested();
    let archive = card.archive();
    archive.create(&Reporter::silent()).unwrap();
    let report = archive.create(&Reporter::silent()).unwrap();
    assert_eq!(report.count_of(EntryStatus::Unchanged), 4);
    assert_eq!(report.status_counts.len(), 1);

    let history = archive.history().unwrap();
    let first = &history.generations()[0].generation;
    let second = &history.generations()[1].generation;
    assert!(second.entries.iter().all(|e| e.status == EntryStatus::Unchanged));
    assert_eq!(first.root, second.root);
    for folder in first.entries.iter().filter(|e| e.is_directory()) {
        assert_eq!(
            second.entry(&folder.path).unwrap().structure,
            folder.structure,
            "{}",
            folder.path
        );
    }
}

#[test]
fn test_content_edit_versus_rename() {
    let card = CardFixture::nested();
    let archive = card.archive_with(|b| b.directory_hashes(true));
    archive.create(&Reporter::silent()).unwrap();

    // editing bytes in place: content mismatch at the file only
    card.append("A/AA/AA1.txt", "!!");
    let report = archive.verify(&Reporter::silent()).unwrap();
    let paths: Vec<(&str, FailureKind)> = report
        .failures
        .iter()
        .map(|f| (f.path.as_str(), f.kind))
        .collect();
    assert_eq!(paths, vec![("A/AA/AA1.txt", FailureKind::ContentHashMismatch)]);
    assert_eq!(report.exit_code(), 11);

    // record the edit, then move a file without touching its bytes
    archive.create(&Reporter::silent()).unwrap();
    card.rename("B/B1.txt", "B/B2.txt");

    let detecting = card.archive_with(|b| b.directory_hashes(true).detect_renames(true));
    let report = detecting.verify(&Reporter::silent()).unwrap();
    assert_eq!(report.exit_code(), 12);
    assert!(report
        .failures_of(FailureKind::StructureHashMismatch)
        .any(|f| f.path == "B"));
    assert!(report.failures_of(FailureKind::ContentHashMismatch).next().is_none());

    // the moved file's content still matches at its new path
    let file = history_digest(&detecting, "B/B1.txt");
    assert_eq!(
        file,
        HashAlgorithm::Xxh64.hash_file(&card.root().join("B/B2.txt")).unwrap()
    );
}

fn history_digest(archive: &Archive, path: &str) -> String {
    archive
        .history()
        .unwrap()
        .current_entry(path)
        .unwrap()
        .digest(HashAlgorithm::Xxh64)
        .unwrap()
        .to_string()
}

#[test]
fn test_manifest_tamper_is_detected() {
    let card = CardFixture::simple();
    let archive = card.archive();
    let report = archive.create(&Reporter::silent()).unwrap();
    archive.create(&Reporter::silent()).unwrap();

    let path = card.root().join("hashtrail").join(report.manifest.unwrap());
    let mut bytes = fs::read(&path).unwrap();
    bytes.push(b' ');
    fs::write(&path, bytes).unwrap();

    match archive.verify_chain().unwrap_err() {
        HashTrailError::ChainTamper { generation, .. } => assert_eq!(generation, 1),
        other => panic!("unexpected error: {other}"),
    }
    // the tracked files are intact, the records are not
    assert_eq!(archive.verify(&Reporter::silent()).unwrap_err().exit_code(), 31);
}

#[test]
fn test_missing_and_unlisted_single_files() {
    let card = CardFixture::simple();
    let archive = card.archive();
    archive.create(&Reporter::silent()).unwrap();

    card.write("B/B1.txt", "B1\n");
    let report = archive
        .verify_files(&[PathBuf::from("B/B1.txt")], &Reporter::silent())
        .unwrap();
    assert_eq!(report.exit_code(), 21);

    let report = archive
        .verify_files(&[PathBuf::from("B/B2.txt")], &Reporter::silent())
        .unwrap();
    assert_eq!(report.exit_code(), 20);
}

#[test]
fn test_missing_file_in_full_verify() {
    let card = CardFixture::nested();
    let archive = card.archive();
    archive.create(&Reporter::silent()).unwrap();

    fs::remove_file(card.root().join("B/B1.txt")).unwrap();
    let report = archive.verify(&Reporter::silent()).unwrap();
    assert_eq!(report.exit_code(), 20);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "B/B1.txt");
}

#[test]
fn test_new_file_is_not_a_verify_failure() {
    let card = CardFixture::simple();
    let archive = card.archive();
    archive.create(&Reporter::silent()).unwrap();

    card.write("C/C1.txt", "C1\n");
    let report = archive.verify(&Reporter::silent()).unwrap();
    assert!(report.is_success());
    assert_eq!(report.count_of(EntryStatus::New), 1);
}

#[test]
fn test_algorithm_upgrade() {
    let card = CardFixture::simple();
    card.archive().create(&Reporter::silent()).unwrap();

    let sha = card.archive_with(|b| b.hash_algorithm(HashAlgorithm::Sha256));
    let report = sha.create(&Reporter::silent()).unwrap();
    assert_eq!(report.count_of(EntryStatus::Unchanged), 2);

    // verifying with the new algorithm now works directly
    let (reporter, buffer) = Reporter::buffered(true);
    assert_eq!(sha.verify(&reporter).unwrap().exit_code(), 0);
    assert!(buffered_text(&buffer).contains("verification (sha256) of file Stuff.txt: OK"));
}

#[test]
fn test_empty_history_verify() {
    let card = CardFixture::simple();
    let err = card
        .archive()
        .verify_files(&[PathBuf::from("Stuff.txt")], &Reporter::silent())
        .unwrap_err();
    assert!(matches!(err, HashTrailError::NoHistory(_)));
}
