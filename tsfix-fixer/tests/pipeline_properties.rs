//! Batch pipeline properties over synthetic trees
//!
//! Idempotence, non-destruction, round-trip recovery, fallback determinism,
//! conflict reporting, atomic replacement and traversal edge cases.

mod helpers;

use helpers::{dataset_bytes, write_cleared_tree};
use std::fs;
use tempfile::TempDir;
use tsfix_common::catalog::{
    EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN, JPEG_2000_LOSSLESS, JPEG_BASELINE,
};
use tsfix_common::SyntaxCatalog;
use tsfix_common::ByteOrder;
use tsfix_fixer::element::Tag;
use tsfix_fixer::header::read_header;
use tsfix_fixer::synthetic::{DatasetWriter, SyntheticContainer, DEFAULT_STUDY_UID};
use tsfix_fixer::{BatchPipeline, Confidence, OutcomeStatus, PipelineOptions};

fn run_pipeline(root: &std::path::Path, dry_run: bool) -> tsfix_fixer::RunReport {
    BatchPipeline::new(
        SyntaxCatalog::global(),
        PipelineOptions {
            dry_run,
            ..Default::default()
        },
    )
    .run(root)
    .unwrap()
}

#[test]
fn test_cleared_declarations_are_recovered() {
    let temp = TempDir::new().unwrap();
    let fixtures = write_cleared_tree(temp.path());

    let report = run_pipeline(temp.path(), false);
    assert_eq!(report.summary.total, fixtures.len());
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.count(OutcomeStatus::Repaired), fixtures.len());

    for fixture in &fixtures {
        let header = read_header(&fixture.path).unwrap();
        assert_eq!(
            header.declared_syntax_uid, fixture.true_uid,
            "wrong syntax recovered for {}",
            fixture.path.display()
        );
        assert!(header.group_length_consistent);
    }
}

#[test]
fn test_second_run_is_a_fixed_point() {
    let temp = TempDir::new().unwrap();
    write_cleared_tree(temp.path());
    fs::write(temp.path().join("notes.txt"), b"not a container").unwrap();

    let first = run_pipeline(temp.path(), false);
    assert!(first.count(OutcomeStatus::Repaired) > 0);

    let second = run_pipeline(temp.path(), false);
    assert_eq!(second.count(OutcomeStatus::Repaired), 0);
    assert_eq!(second.summary, first.summary);
}

#[test]
fn test_dataset_bytes_survive_repair() {
    let temp = TempDir::new().unwrap();
    let fixtures = write_cleared_tree(temp.path());
    let before: Vec<Vec<u8>> = fixtures.iter().map(|f| dataset_bytes(&f.path)).collect();

    let report = run_pipeline(temp.path(), false);
    for outcome in report.outcomes.iter().filter(|o| o.status == OutcomeStatus::Repaired) {
        let index = fixtures.iter().position(|f| f.path == outcome.path).unwrap();
        assert_eq!(dataset_bytes(&outcome.path), before[index]);
        assert_eq!(dataset_bytes(&outcome.path), fixtures[index].container.dataset());
    }
}

#[test]
fn test_dry_run_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let fixtures = write_cleared_tree(temp.path());
    let originals: Vec<Vec<u8>> = fixtures.iter().map(|f| fs::read(&f.path).unwrap()).collect();

    let report = run_pipeline(temp.path(), true);
    assert_eq!(report.count(OutcomeStatus::WouldRepair), fixtures.len());
    assert_eq!(report.count(OutcomeStatus::Repaired), 0);
    for (fixture, original) in fixtures.iter().zip(&originals) {
        assert_eq!(&fs::read(&fixture.path).unwrap(), original);
    }
}

#[test]
fn test_unrecognizable_dataset_falls_back_to_default() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("opaque.dcm");
    SyntheticContainer::explicit_le_uncompressed()
        .without_declared_syntax()
        .with_dataset(vec![0xAB; 6])
        .write_to(&path)
        .unwrap();

    for _ in 0..2 {
        let report = run_pipeline(temp.path(), true);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.after_uid.as_deref(), Some(IMPLICIT_VR_LITTLE_ENDIAN));
        assert_eq!(outcome.confidence, Some(Confidence::HeuristicFallback));
    }
}

#[test]
fn test_conflicting_declaration_reported_with_evidence() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("mislabelled.dcm");
    let container = SyntheticContainer::jpeg_baseline().with_declared_syntax(EXPLICIT_VR_LITTLE_ENDIAN);
    container.write_to(&path).unwrap();

    let report = run_pipeline(temp.path(), false);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, OutcomeStatus::Unchanged);
    assert_eq!(outcome.confidence, Some(Confidence::HeuristicStrong));
    assert_eq!(outcome.conflict.as_deref(), Some(JPEG_BASELINE));
    assert!(!outcome.evidence.is_empty());
    assert_eq!(fs::read(&path).unwrap(), container.build());
}

#[test]
fn test_oversized_image_attributes_do_not_abort_the_run() {
    let temp = TempDir::new().unwrap();
    let dataset = DatasetWriter::new(true, ByteOrder::Little)
        .string(Tag::STUDY_INSTANCE_UID, b"UI", DEFAULT_STUDY_UID)
        .us(Tag::SAMPLES_PER_PIXEL, u16::MAX)
        .string(Tag::NUMBER_OF_FRAMES, b"IS", "4000000000")
        .us(Tag::ROWS, u16::MAX)
        .us(Tag::COLUMNS, u16::MAX)
        .us(Tag::BITS_ALLOCATED, u16::MAX)
        .element(Tag::PIXEL_DATA, b"OB", &[0x40; 16])
        .finish();
    SyntheticContainer::new("", dataset)
        .write_to(&temp.path().join("a-oversized.dcm"))
        .unwrap();
    SyntheticContainer::rle()
        .with_declared_syntax("")
        .write_to(&temp.path().join("b-rle.dcm"))
        .unwrap();

    let report = run_pipeline(temp.path(), true);
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.outcomes.len(), 2);

    let oversized = report
        .outcomes
        .iter()
        .find(|o| o.path.ends_with("a-oversized.dcm"))
        .unwrap();
    assert!(oversized.after_uid.is_some());
    let rle = report
        .outcomes
        .iter()
        .find(|o| o.path.ends_with("b-rle.dcm"))
        .unwrap();
    assert_eq!(rle.status, OutcomeStatus::WouldRepair);
}

#[test]
fn test_study_uid_captured() {
    let temp = TempDir::new().unwrap();
    write_cleared_tree(temp.path());
    let report = run_pipeline(temp.path(), true);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.study_instance_uid.as_deref() == Some(DEFAULT_STUDY_UID)));
}

#[cfg(unix)]
#[test]
fn test_repair_replaces_file_instead_of_truncating_it() {
    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("tree");
    let path = tree.join("image.dcm");
    let container = SyntheticContainer::rle().with_declared_syntax("");
    container.write_to(&path).unwrap();

    // A hard link outside the tree keeps the original inode reachable
    let link = temp.path().join("original-link");
    fs::hard_link(&path, &link).unwrap();

    let report = run_pipeline(&tree, false);
    assert_eq!(report.count(OutcomeStatus::Repaired), 1);

    // The original inode was never opened for writing
    assert_eq!(fs::read(&link).unwrap(), container.build());
    assert_ne!(fs::read(&path).unwrap(), container.build());
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_is_a_failed_outcome() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let locked = temp.path().join("locked");
    SyntheticContainer::rle()
        .with_declared_syntax("")
        .write_to(&locked.join("hidden.dcm"))
        .unwrap();
    SyntheticContainer::jpeg_baseline()
        .with_declared_syntax("")
        .write_to(&temp.path().join("open.dcm"))
        .unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Permission bits do not stop a privileged user
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let report = run_pipeline(temp.path(), true);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
    let failed = report
        .outcomes
        .iter()
        .find(|o| o.status == OutcomeStatus::Failed)
        .unwrap();
    assert_eq!(failed.path, locked);
    assert!(failed.evidence.last().unwrap().starts_with("Traversal failed"));
}

#[cfg(unix)]
#[test]
fn test_symlinked_container_is_repaired_through_the_link() {
    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("tree");
    let store = temp.path().join("store");
    fs::create_dir_all(&tree).unwrap();
    let real = store.join("image.dcm");
    SyntheticContainer::jpeg2000(true)
        .with_declared_syntax("")
        .write_to(&real)
        .unwrap();
    let link = tree.join("image.dcm");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let report = run_pipeline(&tree, false);
    assert_eq!(report.count(OutcomeStatus::Repaired), 1);
    assert_eq!(report.outcomes[0].path, link);
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(read_header(&real).unwrap().declared_syntax_uid, JPEG_2000_LOSSLESS);
}
