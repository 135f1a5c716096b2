//! Property-based testing for hashtrail
//!
//! Uses proptest to check the digest and record invariants across
//! randomly generated trees and edits.

use ::hashtrail::manifest::parse_manifest_file_name;
use ::hashtrail::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Generate a relative file path of up to three folders deep
///
/// Folder names never carry an extension and file names always do, so a
/// path can never be both a file and a folder within one tree.
fn path_strategy() -> impl Strategy<Value = String> {
    let dirs = prop::collection::vec("[a-z]{1,6}", 0..=3);
    let file = prop_oneof!["[a-z]{1,6}\\.txt", "clip[0-9]{1,3}\\.bin"];
    (dirs, file).prop_map(|(dirs, file)| {
        let mut parts = dirs;
        parts.push(file);
        parts.join("/")
    })
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-zA-Z0-9 \n]{0,200}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 1..2048),
    ]
}

fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 1..12)
}

fn materialize(root: &Path, tree: &BTreeMap<String, Vec<u8>>) {
    for (path, content) in tree {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn latest(archive: &Archive) -> Generation {
    let history = archive.history().unwrap();
    history.generations().last().unwrap().generation.clone()
}

fn root_content(generation: &Generation) -> String {
    generation.root.as_ref().unwrap().content[&HashAlgorithm::Xxh64].clone()
}

fn root_structure(generation: &Generation) -> String {
    generation.root.as_ref().unwrap().structure[&HashAlgorithm::Xxh64].clone()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Recording an untouched tree twice changes nothing but the generation
    #[test]
    fn prop_repeat_create_is_unchanged(tree in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        materialize(temp_dir.path(), &tree);
        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();

        archive.create(&Reporter::silent()).unwrap();
        let first = latest(&archive);
        let report = archive.create(&Reporter::silent()).unwrap();
        let second = latest(&archive);

        prop_assert_eq!(report.count_of(EntryStatus::Unchanged), tree.len());
        prop_assert!(second.entries.iter().all(|e| e.status == EntryStatus::Unchanged));
        prop_assert_eq!(&first.root, &second.root);
        prop_assert_eq!(archive.verify(&Reporter::silent()).unwrap().exit_code(), 0);
    }

    /// Manifests written by a session decode to the same record and
    /// re-encode to the same bytes
    #[test]
    fn prop_written_manifest_is_byte_stable(tree in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        materialize(temp_dir.path(), &tree);
        let archive = ArchiveBuilder::new()
            .comment("prop")
            .build(temp_dir.path())
            .unwrap();

        let report = archive.create(&Reporter::silent()).unwrap();
        let name = report.manifest.unwrap();
        let bytes = fs::read(archive.metadata_dir().join(&name)).unwrap();

        let decoded = Generation::decode(&bytes).unwrap();
        prop_assert!(decoded.validate().is_ok());
        prop_assert_eq!(decoded.encode().unwrap(), bytes);
        prop_assert_eq!(parse_manifest_file_name(&name), Some(1));
    }

    /// Editing bytes moves content digests and never structure digests
    #[test]
    fn prop_content_edit_keeps_structure(
        tree in tree_strategy(),
        pick in any::<prop::sample::Index>(),
        extra in any::<u8>(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        materialize(temp_dir.path(), &tree);
        let archive = ArchiveBuilder::new().build(temp_dir.path()).unwrap();
        archive.create(&Reporter::silent()).unwrap();
        let before = latest(&archive);

        let (path, content) = tree.iter().nth(pick.index(tree.len())).unwrap();
        let mut edited = content.clone();
        edited.push(extra);
        fs::write(temp_dir.path().join(path), edited).unwrap();

        let report = archive.create(&Reporter::silent()).unwrap();
        let after = latest(&archive);

        prop_assert_eq!(report.count_of(EntryStatus::Modified), 1);
        prop_assert_ne!(root_content(&before), root_content(&after));
        prop_assert_eq!(root_structure(&before), root_structure(&after));
        for folder in before.entries.iter().filter(|e| e.is_directory()) {
            prop_assert_eq!(
                &after.entry(&folder.path).unwrap().structure,
                &folder.structure
            );
        }
    }

    /// Renaming a file moves structure digests and never content digests
    #[test]
    fn prop_rename_keeps_content(tree in tree_strategy(), pick in any::<prop::sample::Index>()) {
        let temp_dir = TempDir::new().unwrap();
        materialize(temp_dir.path(), &tree);
        let archive = ArchiveBuilder::new()
            .detect_renames(true)
            .build(temp_dir.path())
            .unwrap();
        archive.create(&Reporter::silent()).unwrap();
        let before = latest(&archive);

        let path = tree.keys().nth(pick.index(tree.len())).unwrap();
        let from = temp_dir.path().join(path);
        let to = from.with_file_name("moved.dat");
        fs::rename(&from, &to).unwrap();

        let report = archive.create(&Reporter::silent()).unwrap();
        let after = latest(&archive);

        prop_assert_eq!(report.count_of(EntryStatus::Renamed), 1);
        prop_assert_eq!(report.count_of(EntryStatus::Missing), 0);
        prop_assert_eq!(root_content(&before), root_content(&after));
        prop_assert_ne!(root_structure(&before), root_structure(&after));
        prop_assert_eq!(after.renames.len(), 1);
        prop_assert_eq!(&after.renames[0].previous_path, path);
    }

    /// Manifest file names carry the generation number they were written for
    #[test]
    fn prop_file_name_round_trips(generation in 1u32..10_000, root in "[A-Za-z0-9_]{1,12}") {
        let record = Generation {
            generation,
            ..Generation::decode(MINIMAL).unwrap()
        };
        let name = record.file_name(&root);
        prop_assert!(name.ends_with(".mhl"));
        prop_assert_eq!(parse_manifest_file_name(&name), Some(generation));
    }
}

const MINIMAL: &[u8] = br#"{
  "generation": 1,
  "created_at": "2026-01-01T00:00:00Z",
  "creator": {
    "tool": "hashtrail",
    "version": "0.1.0",
    "hostname": "host",
    "process": "create"
  },
  "entries": [],
  "renames": []
}"#;
