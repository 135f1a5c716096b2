//! Main test module for hashtrail
//!
//! This module includes all test suites:
//! - Scenario tests for offload workflows
//! - Property-based tests for digest invariants
//! - Edge cases for unusual trees

pub mod property;
pub mod scenarios;

#[cfg(test)]
mod edge_cases {
    use ::hashtrail::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn latest(archive: &Archive) -> anyhow::Result<Generation> {
        let history = archive.history()?;
        let stored = history
            .generations()
            .last()
            .ok_or_else(|| anyhow::anyhow!("no generation written"))?;
        Ok(stored.generation.clone())
    }

    fn paths(generation: &Generation) -> Vec<&str> {
        generation.entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();

        let report = archive.create(&Reporter::silent()).unwrap();
        assert_eq!(report.generation, Some(1));
        assert!(report.status_counts.is_empty());

        let generation = latest(&archive).unwrap();
        assert!(generation.entries.is_empty());
        assert!(generation.root.is_some());

        // files arriving later are new, nothing goes missing
        fs::write(temp_dir.path().join("file.txt"), "content").unwrap();
        let report = archive.create(&Reporter::silent()).unwrap();
        assert_eq!(report.count_of(EntryStatus::New), 1);
        assert_eq!(report.count_of(EntryStatus::Missing), 0);
    }

    #[test]
    fn test_empty_subfolders_are_recorded() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("EMPTY/INNER")).unwrap();
        fs::write(temp_dir.path().join("zero.bin"), b"").unwrap();

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        archive.create(&Reporter::silent()).unwrap();

        let generation = latest(&archive).unwrap();
        assert_eq!(paths(&generation), vec!["EMPTY/INNER", "EMPTY", "zero.bin"]);
        assert_eq!(generation.entry("zero.bin").unwrap().size, Some(0));
        assert!(generation.entry("EMPTY/INNER").unwrap().is_directory());
    }

    #[test]
    fn test_metadata_folder_is_never_recorded() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("clip.mov"), "frames").unwrap();

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        archive.create(&Reporter::silent()).unwrap();
        archive.create(&Reporter::silent()).unwrap();

        let generation = latest(&archive).unwrap();
        assert_eq!(generation.generation, 2);
        assert_eq!(paths(&generation), vec!["clip.mov"]);
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let names = [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.multiple.dots.txt",
            "ファイル.txt",
            "café.txt",
            "Zebra.txt",
            "apple.txt",
        ];
        for name in names {
            fs::write(temp_dir.path().join(name), name).unwrap();
        }

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        let report = archive.create(&Reporter::silent()).unwrap();
        assert_eq!(report.count_of(EntryStatus::New), names.len());

        // byte order: uppercase before lowercase, ASCII before multi-byte
        let generation = latest(&archive).unwrap();
        let recorded = paths(&generation);
        let mut sorted = recorded.clone();
        sorted.sort();
        assert_eq!(recorded, sorted);
        assert_eq!(recorded.first(), Some(&"Zebra.txt"));
        assert_eq!(recorded.last(), Some(&"ファイル.txt"));

        assert_eq!(archive.verify(&Reporter::silent()).unwrap().exit_code(), 0);
    }

    #[test]
    fn test_absolute_single_file_paths() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("A")).unwrap();
        fs::write(temp_dir.path().join("A/A1.txt"), "A1\n").unwrap();

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        archive.create(&Reporter::silent()).unwrap();

        let absolute = temp_dir.path().join("A/A1.txt");
        let report = archive
            .verify_files(&[absolute], &Reporter::silent())
            .unwrap();
        assert_eq!(report.exit_code(), 0);

        let outside = TempDir::new().unwrap();
        let stray = outside.path().join("elsewhere.txt");
        fs::write(&stray, "x").unwrap();
        let err = archive.verify_files(&[stray], &Reporter::silent()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_corrupt_manifest_is_malformed() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("clip.mov"), "frames").unwrap();
        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        let report = archive.create(&Reporter::silent()).unwrap();

        let manifest = archive.metadata_dir().join(report.manifest.unwrap());
        fs::write(&manifest, "{ not json").unwrap();

        // the chain notices first, reading the history directly reports the damage
        assert_eq!(archive.verify(&Reporter::silent()).unwrap_err().exit_code(), 31);
        let err = archive.history().unwrap_err();
        assert!(matches!(err, HashTrailError::MalformedManifest { .. }));
        assert_eq!(err.exit_code(), 32);
    }

    #[test]
    fn test_touched_file_stays_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let clip = temp_dir.path().join("clip.mov");
        fs::write(&clip, "frames").unwrap();

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        archive.create(&Reporter::silent()).unwrap();
        let before = latest(&archive).unwrap().entry("clip.mov").unwrap().modified;

        // a copy tool resetting timestamps does not alter the content
        let past = filetime::FileTime::from_unix_time(946_684_800, 0);
        filetime::set_file_mtime(&clip, past).unwrap();

        let report = archive.create(&Reporter::silent()).unwrap();
        assert_eq!(report.count_of(EntryStatus::Unchanged), 1);

        let entry = latest(&archive).unwrap().entry("clip.mov").unwrap().clone();
        assert_ne!(entry.modified, before);
        assert_eq!(entry.modified.map(|m| m.timestamp()), Some(946_684_800));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_unreadable() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("real.txt"), "real").unwrap();
        symlink(Path::new("nowhere.txt"), temp_dir.path().join("broken.txt")).unwrap();

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        let report = archive.create(&Reporter::silent()).unwrap();
        assert_eq!(report.exit_code(), 22);
        assert_eq!(report.count_of(EntryStatus::Failed), 1);
        assert_eq!(report.count_of(EntryStatus::New), 1);

        let generation = latest(&archive).unwrap();
        assert_eq!(generation.entry("broken.txt").unwrap().status, EntryStatus::Failed);
    }

    #[cfg(unix)]
    #[test]
    fn test_backslash_in_file_name() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("ok.txt"), "ok").unwrap();
        fs::write(temp_dir.path().join("clip\\take1.mov"), "frames").unwrap();

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        let report = archive.create(&Reporter::silent()).unwrap();
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.count_of(EntryStatus::New), 2);

        let generation = latest(&archive).unwrap();
        assert!(generation.entry("clip\\take1.mov").is_some());

        let report = archive
            .verify_files(&[temp_dir.path().join("clip\\take1.mov")], &Reporter::silent())
            .unwrap();
        assert_eq!(report.exit_code(), 0);
        assert_eq!(archive.verify(&Reporter::silent()).unwrap().exit_code(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_reported_not_recorded() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("ok.txt"), "ok").unwrap();
        // both render to the same lossy text
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"clip\xff.mov")), "a").unwrap();
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"clip\xfe.mov")), "b").unwrap();

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        let report = archive.create(&Reporter::silent()).unwrap();
        assert_eq!(report.exit_code(), 22);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.kind == FailureKind::Unreadable && f.detail.contains("not valid UTF-8")));

        let generation = latest(&archive).unwrap();
        assert_eq!(paths(&generation), vec!["ok.txt"]);
        // the root listing is incomplete, so no root digests are claimed
        assert!(generation.root.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_folder_is_not_hashed() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("A")).unwrap();
        fs::write(temp_dir.path().join("A/A1.txt"), "A1\n").unwrap();
        symlink(temp_dir.path().join("A"), temp_dir.path().join("A_link")).unwrap();

        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        let report = archive.create(&Reporter::silent()).unwrap();
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.count_of(EntryStatus::Failed), 0);

        let generation = latest(&archive).unwrap();
        assert_eq!(paths(&generation), vec!["A/A1.txt", "A"]);
        assert!(generation.root.is_some());

        let (reporter, buffer) = Reporter::buffered(true);
        assert_eq!(archive.verify(&reporter).unwrap().exit_code(), 0);
        assert!(report::buffered_text(&buffer).contains("skipping symbolic link to folder A_link"));
    }
}
