//! Repairer
//!
//! Rewrites the File Meta Information group with a new Transfer Syntax UID and
//! a recomputed group length. Everything from the start of the dataset onward
//! is copied byte-for-byte.
//!
//! **Write discipline:**
//! 1. Build a brand-new meta group from the parsed header (never patch the
//!    original buffer)
//! 2. Write preamble + marker + new meta + original dataset bytes to a
//!    temporary file in the same directory
//! 3. Flush and fsync the temporary file
//! 4. Atomically rename it over the original
//!
//! The original is never opened for writing, so an interrupted repair leaves
//! it untouched.

use crate::element::{Tag, Vr, MAGIC, META_START};
use crate::header::{read_header, ContainerHeader, HeaderError, MetaElement};
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use tsfix_common::catalog::normalize_uid;
use tsfix_common::SyntaxCatalog;

/// Repair errors
#[derive(Debug, Error)]
pub enum RepairError {
    /// Temp-file write or atomic replace failed; the original is untouched
    #[error("Write failed for {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    /// Refuse to write a UID the catalog does not know
    #[error("Unknown transfer syntax UID: {0}")]
    UnknownSyntax(String),
}

impl RepairError {
    fn write(path: &Path, source: io::Error) -> Self {
        RepairError::WriteError {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of a repair request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Declared UID already equals the requested one; nothing written
    Unchanged,
    /// Dry run: what would have been written
    WouldRepair { previous_uid: String, new_uid: String },
    /// File rewritten
    Repaired {
        previous_uid: String,
        new_uid: String,
        meta_len_before: u64,
        meta_len_after: u64,
    },
}

/// Encode one Explicit VR Little Endian element, padding odd values.
///
/// UI and binary VRs pad with NUL, text VRs with a space.
pub fn encode_meta_element(tag: Tag, vr: Vr, value: &[u8], out: &mut Vec<u8>) {
    let mut padded_len = value.len();
    let needs_pad = padded_len % 2 == 1;
    if needs_pad {
        padded_len += 1;
    }

    out.extend_from_slice(&tag.to_bytes(tsfix_common::ByteOrder::Little));
    out.extend_from_slice(&vr.0);
    if vr.has_long_length() {
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(padded_len as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&(padded_len as u16).to_le_bytes());
    }
    out.extend_from_slice(value);
    if needs_pad {
        let pad = if vr == Vr::UI || vr == Vr::OB { 0u8 } else { b' ' };
        out.push(pad);
    }
}

/// Builds a File Meta Information group independent of the original layout
#[derive(Debug, Clone, Default)]
pub struct MetaBuilder {
    elements: Vec<MetaElement>,
}

impl MetaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from every element of a parsed header except the group length
    pub fn from_header(header: &ContainerHeader) -> Self {
        let elements = header
            .elements
            .iter()
            .filter(|e| e.tag != Tag::META_GROUP_LENGTH)
            .cloned()
            .collect();
        Self { elements }
    }

    /// Insert or replace an element, keeping ascending tag order
    pub fn set(mut self, tag: Tag, vr: Vr, value: Vec<u8>) -> Self {
        let element = MetaElement {
            tag,
            vr,
            length: value.len() as u32,
            value,
        };
        match self.elements.binary_search_by_key(&tag, |e| e.tag) {
            Ok(index) => self.elements[index] = element,
            Err(index) => self.elements.insert(index, element),
        }
        self
    }

    /// Set (0002,0010); an empty UID produces a zero-length element
    pub fn with_transfer_syntax(self, uid: &str) -> Self {
        self.set(
            Tag::TRANSFER_SYNTAX_UID,
            Vr::UI,
            normalize_uid(uid).as_bytes().to_vec(),
        )
    }

    /// Encode the group: (0002,0000) first, then the remaining elements
    pub fn build(&self) -> Vec<u8> {
        let mut sorted = self.elements.clone();
        sorted.sort_by_key(|e| e.tag);

        let mut body = Vec::new();
        for element in &sorted {
            encode_meta_element(element.tag, element.vr, &element.value, &mut body);
        }

        let mut out = Vec::with_capacity(body.len() + 12);
        encode_meta_element(
            Tag::META_GROUP_LENGTH,
            Vr::UL,
            &(body.len() as u32).to_le_bytes(),
            &mut out,
        );
        out.extend_from_slice(&body);
        out
    }
}

/// Path the rewrite replaces: the link target when `path` is a symlink
fn resolve_link(path: &Path) -> io::Result<PathBuf> {
    if fs::symlink_metadata(path)?.file_type().is_symlink() {
        fs::canonicalize(path)
    } else {
        Ok(path.to_path_buf())
    }
}

/// Rewrite the meta group of `path` so that it declares `uid`.
///
/// `header` must be the freshly parsed header of `path`. Returns the length of
/// the new meta group. Used both for repair and for deliberately clearing a
/// declaration (empty `uid`). A symlink is left in place and its target is
/// replaced.
pub fn rewrite_transfer_syntax(
    path: &Path,
    header: &ContainerHeader,
    uid: &str,
) -> Result<u64, RepairError> {
    let meta = MetaBuilder::from_header(header).with_transfer_syntax(uid).build();
    let target = resolve_link(path).map_err(|e| RepairError::write(path, e))?;
    let path = target.as_path();

    let mut original = File::open(path).map_err(|e| RepairError::write(path, e))?;
    let original_len = original
        .metadata()
        .map_err(|e| RepairError::write(path, e))?
        .len();
    let permissions = fs::metadata(path)
        .map_err(|e| RepairError::write(path, e))?
        .permissions();

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| RepairError::write(path, e))?;

    let copied = {
        let mut writer = BufWriter::new(temp.as_file_mut());
        writer
            .write_all(&header.preamble)
            .and_then(|_| writer.write_all(MAGIC))
            .and_then(|_| writer.write_all(&meta))
            .map_err(|e| RepairError::write(path, e))?;

        original
            .seek(SeekFrom::Start(header.dataset_offset))
            .map_err(|e| RepairError::write(path, e))?;
        let copied = io::copy(&mut original, &mut writer).map_err(|e| RepairError::write(path, e))?;
        writer.flush().map_err(|e| RepairError::write(path, e))?;
        copied
    };

    let expected = original_len.saturating_sub(header.dataset_offset);
    if copied != expected {
        return Err(RepairError::write(
            path,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("copied {} dataset bytes, expected {}", copied, expected),
            ),
        ));
    }

    temp.as_file()
        .sync_all()
        .map_err(|e| RepairError::write(path, e))?;
    temp.as_file()
        .set_permissions(permissions)
        .map_err(|e| RepairError::write(path, e))?;

    // Dropping `temp` on any earlier error removes it; persist renames over the original
    temp.persist(path).map_err(|e| RepairError::write(path, e.error))?;

    debug!(
        file = %path.display(),
        meta_len = meta.len(),
        dataset_bytes = copied,
        "Meta group rewritten"
    );
    Ok(meta.len() as u64)
}

/// Applies detected Transfer Syntax UIDs to files
pub struct Repairer<'a> {
    catalog: &'a SyntaxCatalog,
}

impl<'a> Repairer<'a> {
    pub fn new(catalog: &'a SyntaxCatalog) -> Self {
        Self { catalog }
    }

    /// Make `path` declare `detected_uid`.
    ///
    /// No-op when the declaration already matches; dry run reports what would
    /// change without writing.
    pub fn repair(
        &self,
        path: &Path,
        detected_uid: &str,
        dry_run: bool,
    ) -> Result<RepairOutcome, RepairError> {
        let descriptor = self
            .catalog
            .lookup(detected_uid)
            .ok_or_else(|| RepairError::UnknownSyntax(detected_uid.to_string()))?;

        let header = read_header(path)?;
        let previous_uid = header.declared_syntax_uid.clone();

        if normalize_uid(&previous_uid) == descriptor.uid {
            return Ok(RepairOutcome::Unchanged);
        }

        if dry_run {
            return Ok(RepairOutcome::WouldRepair {
                previous_uid,
                new_uid: descriptor.uid.to_string(),
            });
        }

        let meta_len_before = header.dataset_offset - META_START as u64;
        let meta_len_after = rewrite_transfer_syntax(path, &header, descriptor.uid)?;

        Ok(RepairOutcome::Repaired {
            previous_uid,
            new_uid: descriptor.uid.to_string(),
            meta_len_before,
            meta_len_after,
        })
    }
}
