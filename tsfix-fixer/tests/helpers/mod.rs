//! Shared fixtures for fixer integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tsfix_fixer::header::read_header;
use tsfix_fixer::synthetic::SyntheticContainer;

/// One fixture file and the syntax it really uses
pub struct Fixture {
    pub path: PathBuf,
    pub container: SyntheticContainer,
    pub true_uid: String,
}

/// Every family the detector distinguishes, each written with a blank declaration
pub fn family_fixtures() -> Vec<(&'static str, SyntheticContainer)> {
    vec![
        ("explicit_le.dcm", SyntheticContainer::explicit_le_uncompressed()),
        ("implicit_le.dcm", SyntheticContainer::implicit_le_uncompressed()),
        ("explicit_be.dcm", SyntheticContainer::explicit_be_uncompressed()),
        ("jpeg_baseline.dcm", SyntheticContainer::jpeg_baseline()),
        ("jpeg_extended.dcm", SyntheticContainer::jpeg_extended()),
        ("j2k_lossless.dcm", SyntheticContainer::jpeg2000(true)),
        ("j2k_lossy.dcm", SyntheticContainer::jpeg2000(false)),
        ("rle.dcm", SyntheticContainer::rle()),
    ]
}

/// Write family fixtures under `root/series/` with their declarations cleared
pub fn write_cleared_tree(root: &Path) -> Vec<Fixture> {
    family_fixtures()
        .into_iter()
        .map(|(name, container)| {
            let true_uid = container.declared_syntax().unwrap_or_default().to_string();
            let cleared = container.with_declared_syntax("");
            let path = root.join("series").join(name);
            cleared.write_to(&path).unwrap();
            Fixture {
                path,
                container: cleared,
                true_uid,
            }
        })
        .collect()
}

/// Bytes from the first dataset element to end of file
pub fn dataset_bytes(path: &Path) -> Vec<u8> {
    let header = read_header(path).unwrap();
    let bytes = fs::read(path).unwrap();
    bytes[header.dataset_offset as usize..].to_vec()
}
