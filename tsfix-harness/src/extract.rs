//! Extract collaborator
//!
//! Unpacks zip and gzip-compressed tar archives into an isolated directory.
//! The format is detected from magic bytes first and the file name second;
//! entries that would escape the destination are rejected.

use crate::error::ExtractError;
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Supported archive containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Detect from leading bytes, falling back to the file name suffix
    pub fn detect(name: &str, bytes: &[u8]) -> Option<ArchiveKind> {
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
            return Some(ArchiveKind::Zip);
        }
        if bytes.starts_with(&[0x1F, 0x8B]) {
            return Some(ArchiveKind::TarGz);
        }
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Unpacks archive bytes into a directory
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `bytes` (named `name`) into `dest`; returns the number of files written
    fn extract(&self, name: &str, bytes: &[u8], dest: &Path) -> Result<usize, ExtractError>;
}

/// zip + tar.gz extractor
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardExtractor;

impl ArchiveExtractor for StandardExtractor {
    fn extract(&self, name: &str, bytes: &[u8], dest: &Path) -> Result<usize, ExtractError> {
        let kind = ArchiveKind::detect(name, bytes)
            .ok_or_else(|| ExtractError::UnsupportedFormat(name.to_string()))?;
        fs::create_dir_all(dest)?;

        let count = match kind {
            ArchiveKind::Zip => extract_zip(bytes, dest)?,
            ArchiveKind::TarGz => extract_tar_gz(bytes, dest)?,
        };
        debug!(archive = %name, kind = ?kind, files = count, dest = %dest.display(), "Extracted archive");
        Ok(count)
    }
}

/// Relative path with no root, prefix or parent components
fn safe_relative_path(raw: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

fn extract_zip(bytes: &[u8], dest: &Path) -> Result<usize, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Corrupt(e.to_string()))?;
    let mut count = 0;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?;
        let relative = entry
            .enclosed_name()
            .and_then(|p| safe_relative_path(p))
            .ok_or_else(|| ExtractError::UnsafePath(entry.name().to_string()))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        count += 1;
    }
    Ok(count)
}

fn extract_tar_gz(bytes: &[u8], dest: &Path) -> Result<usize, ExtractError> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));
    let mut count = 0;

    let entries = archive
        .entries()
        .map_err(|e| ExtractError::Corrupt(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ExtractError::Corrupt(e.to_string()))?;
        let raw_path = entry
            .path()
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?
            .into_owned();
        let relative = safe_relative_path(&raw_path)
            .ok_or_else(|| ExtractError::UnsafePath(raw_path.display().to_string()))?;
        let target = dest.join(relative);

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
            count += 1;
        }
        // Links and special entries are not needed for reference data
    }
    Ok(count)
}
