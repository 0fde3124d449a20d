//! Header Reader
//!
//! Parses the preamble, the `DICM` marker and the File Meta Information group
//! (group `0002`, always Explicit VR Little Endian) into a [`ContainerHeader`].
//! Pixel data is never read.
//!
//! [`parse_header`] is a total function over a byte slice; [`read_header`]
//! feeds it a growing prefix of the file until the meta group fits.

use crate::element::{
    read_u16, read_u32, value_to_string, Tag, Vr, MAGIC, META_START, PREAMBLE_LEN,
    UNDEFINED_LENGTH,
};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tsfix_common::ByteOrder;

/// Initial prefix read from disk; doubled until the meta group fits
const INITIAL_PREFIX_LEN: u64 = 8 * 1024;

/// Header read errors
#[derive(Debug, Error)]
pub enum HeaderError {
    /// Not a container at all (no magic marker); callers skip these files
    #[error("Not a DICOM container: {0}")]
    MalformedContainer(String),

    /// Metadata group ends before its declared or encoded length
    #[error("Truncated header at offset {offset}: {reason}")]
    TruncatedHeader { offset: usize, reason: String },

    /// Meta element that cannot be decoded as Explicit VR Little Endian
    #[error("Invalid meta element {tag} at offset {offset}: {reason}")]
    InvalidMetaElement {
        tag: Tag,
        offset: usize,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One File Meta Information element as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaElement {
    pub tag: Tag,
    pub vr: Vr,
    /// Value length as encoded (always even for well-formed files)
    pub length: u32,
    pub value: Vec<u8>,
}

impl MetaElement {
    pub fn value_string(&self) -> String {
        value_to_string(&self.value)
    }
}

/// Parsed container header
///
/// Never mutated after parse; the repairer builds a new meta group instead.
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub preamble: Vec<u8>,
    /// Preamble is all zero or carries a TIFF header (dual-personality file)
    pub preamble_valid: bool,
    /// Declared Transfer Syntax UID, empty when absent or blank
    pub declared_syntax_uid: String,
    /// Declared (0002,0000) value, or the walked group length when absent
    pub meta_group_length: u32,
    pub group_length_present: bool,
    /// Declared group length agrees with the walked extent of group 0002
    pub group_length_consistent: bool,
    pub elements: Vec<MetaElement>,
    /// File offset of the first dataset element (end of the meta group)
    pub dataset_offset: u64,
}

impl ContainerHeader {
    pub fn element(&self, tag: Tag) -> Option<&MetaElement> {
        self.elements.iter().find(|e| e.tag == tag)
    }

    pub fn has_declared_syntax(&self) -> bool {
        !self.declared_syntax_uid.is_empty()
    }

    /// Observations about the header worth keeping as detection evidence
    pub fn observations(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if !self.preamble_valid {
            notes.push("preamble is neither zero-filled nor a TIFF header".to_string());
        }
        if !self.group_length_present {
            notes.push("meta group has no (0002,0000) group length".to_string());
        } else if !self.group_length_consistent {
            notes.push(format!(
                "declared meta group length {} disagrees with walked length {}",
                self.meta_group_length,
                self.walked_meta_length()
            ));
        }
        notes
    }

    /// Length of group 0002 elements after the group length element
    fn walked_meta_length(&self) -> u64 {
        let group_length_element = self
            .element(Tag::META_GROUP_LENGTH)
            .map(|_| 12u64)
            .unwrap_or(0);
        self.dataset_offset - META_START as u64 - group_length_element
    }
}

/// True when `bytes` carries the container magic at offset 128
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.get(PREAMBLE_LEN..META_START) == Some(&MAGIC[..])
}

fn preamble_looks_valid(preamble: &[u8]) -> bool {
    preamble.iter().all(|b| *b == 0)
        || preamble.starts_with(b"II*\0")
        || preamble.starts_with(b"MM\0*")
}

/// Parse a container header from the start of a file.
///
/// `bytes` is treated as the whole file: running out of bytes inside an
/// element is `TruncatedHeader`.
pub fn parse_header(bytes: &[u8]) -> Result<ContainerHeader, HeaderError> {
    if bytes.len() < META_START {
        return Err(HeaderError::MalformedContainer(format!(
            "only {} bytes, shorter than preamble and marker",
            bytes.len()
        )));
    }
    if !has_magic(bytes) {
        return Err(HeaderError::MalformedContainer(
            "missing DICM marker at offset 128".to_string(),
        ));
    }

    let order = ByteOrder::Little;
    let mut elements = Vec::new();
    let mut group_length: Option<(u32, usize)> = None;
    let mut pos = META_START;

    // Walk group 0002 until the first element of another group
    while let Some(tag) = Tag::read(&bytes[pos..], order) {
        if tag.group != 0x0002 {
            break;
        }

        let vr_bytes: [u8; 2] = match bytes.get(pos + 4..pos + 6) {
            Some(raw) => [raw[0], raw[1]],
            None => {
                return Err(HeaderError::TruncatedHeader {
                    offset: pos,
                    reason: format!("element {} header cut off", tag),
                })
            }
        };
        let vr = Vr(vr_bytes);
        if !vr.is_known() {
            return Err(HeaderError::InvalidMetaElement {
                tag,
                offset: pos,
                reason: format!("unrecognized VR bytes {:02X?}", vr_bytes),
            });
        }

        let (length, header_len) = if vr.has_long_length() {
            match read_u32(bytes, pos + 8, order) {
                Some(len) => (len, 12),
                None => {
                    return Err(HeaderError::TruncatedHeader {
                        offset: pos,
                        reason: format!("element {} length cut off", tag),
                    })
                }
            }
        } else {
            match read_u16(bytes, pos + 6, order) {
                Some(len) => (len as u32, 8),
                None => {
                    return Err(HeaderError::TruncatedHeader {
                        offset: pos,
                        reason: format!("element {} length cut off", tag),
                    })
                }
            }
        };

        if length == UNDEFINED_LENGTH {
            return Err(HeaderError::InvalidMetaElement {
                tag,
                offset: pos,
                reason: "undefined length is not allowed in the meta group".to_string(),
            });
        }

        let value_start = pos + header_len;
        let value_end = value_start + length as usize;
        let value = match bytes.get(value_start..value_end) {
            Some(value) => value.to_vec(),
            None => {
                return Err(HeaderError::TruncatedHeader {
                    offset: pos,
                    reason: format!(
                        "element {} value of {} bytes runs past end of file",
                        tag, length
                    ),
                })
            }
        };

        if tag == Tag::META_GROUP_LENGTH {
            let declared = read_u32(&value, 0, order).ok_or_else(|| HeaderError::InvalidMetaElement {
                tag,
                offset: pos,
                reason: format!("group length value has {} bytes, expected 4", value.len()),
            })?;
            group_length = Some((declared, value_end));
        }

        elements.push(MetaElement {
            tag,
            vr,
            length,
            value,
        });
        pos = value_end;
    }

    let walked_end = pos;
    let (meta_group_length, group_length_present, group_length_consistent) = match group_length {
        Some((declared, after_length_element)) => {
            let declared_end = after_length_element + declared as usize;
            if declared_end > bytes.len() {
                return Err(HeaderError::TruncatedHeader {
                    offset: bytes.len(),
                    reason: format!(
                        "meta group declares {} bytes but file ends at offset {}",
                        declared,
                        bytes.len()
                    ),
                });
            }
            (declared, true, declared_end == walked_end)
        }
        None => ((walked_end - META_START) as u32, false, true),
    };

    let declared_syntax_uid = elements
        .iter()
        .find(|e| e.tag == Tag::TRANSFER_SYNTAX_UID)
        .map(|e| e.value_string())
        .unwrap_or_default();

    let preamble = bytes[..PREAMBLE_LEN].to_vec();
    Ok(ContainerHeader {
        preamble_valid: preamble_looks_valid(&preamble),
        preamble,
        declared_syntax_uid,
        meta_group_length,
        group_length_present,
        group_length_consistent,
        elements,
        dataset_offset: walked_end as u64,
    })
}

/// Read and parse the header of a file on disk.
///
/// Reads only as much of the file as the meta group needs.
pub fn read_header(path: &Path) -> Result<ContainerHeader, HeaderError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut prefix_len = INITIAL_PREFIX_LEN.min(file_len);

    loop {
        let mut prefix = Vec::with_capacity(prefix_len as usize);
        File::open(path)?.take(prefix_len).read_to_end(&mut prefix)?;
        let complete = prefix.len() as u64 >= file_len;

        match parse_header(&prefix) {
            Err(HeaderError::TruncatedHeader { .. }) if !complete => {}
            // The meta group may continue past the prefix boundary
            Ok(header) if !complete && header.dataset_offset + 8 > prefix.len() as u64 => {}
            result => return result,
        }

        prefix_len = (prefix_len * 2).min(file_len);
    }
}

/// Cheap magic check used before a full parse
pub fn is_container(path: &Path) -> bool {
    let mut prefix = Vec::with_capacity(META_START);
    match File::open(path).and_then(|f| f.take(META_START as u64).read_to_end(&mut prefix)) {
        Ok(_) => has_magic(&prefix),
        Err(_) => false,
    }
}
