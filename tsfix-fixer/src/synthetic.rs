//! Synthetic container builder
//!
//! Produces small, structurally valid containers for every syntax family the
//! detector recognizes, so the test suites of both crates need no binary
//! fixtures. Available to other crates through the `test-fixtures` feature.

use crate::element::{Tag, Vr, UNDEFINED_LENGTH};
use crate::repair::encode_meta_element;
use std::io;
use std::path::Path;
use tsfix_common::catalog::{
    EXPLICIT_VR_BIG_ENDIAN, EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN, JPEG_2000,
    JPEG_2000_LOSSLESS, JPEG_BASELINE, JPEG_EXTENDED, RLE_LOSSLESS,
};
use tsfix_common::ByteOrder;

pub const SECONDARY_CAPTURE_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.1.7";
pub const DEFAULT_STUDY_UID: &str = "1.2.826.0.1.3680043.8.498.1";

/// Encodes dataset elements under one encoding
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    explicit: bool,
    order: ByteOrder,
    bytes: Vec<u8>,
}

impl DatasetWriter {
    pub fn new(explicit: bool, order: ByteOrder) -> Self {
        Self {
            explicit,
            order,
            bytes: Vec::new(),
        }
    }

    fn put_u16(&mut self, value: u16) {
        match self.order {
            ByteOrder::Little => self.bytes.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => self.bytes.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_u32(&mut self, value: u32) {
        match self.order {
            ByteOrder::Little => self.bytes.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => self.bytes.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn header(&mut self, tag: Tag, vr: Vr, length: u32) {
        self.bytes.extend_from_slice(&tag.to_bytes(self.order));
        if tag.is_delimiter_group() {
            self.put_u32(length);
        } else if self.explicit {
            self.bytes.extend_from_slice(&vr.0);
            if vr.has_long_length() {
                self.bytes.extend_from_slice(&[0, 0]);
                self.put_u32(length);
            } else {
                self.put_u16(length as u16);
            }
        } else {
            self.put_u32(length);
        }
    }

    /// Element with a defined-length value (padded to even length)
    pub fn element(mut self, tag: Tag, vr: &[u8; 2], value: &[u8]) -> Self {
        let mut value = value.to_vec();
        if value.len() % 2 == 1 {
            value.push(if vr == b"UI" || vr == b"OB" { 0 } else { b' ' });
        }
        self.header(tag, Vr(*vr), value.len() as u32);
        self.bytes.extend_from_slice(&value);
        self
    }

    pub fn string(self, tag: Tag, vr: &[u8; 2], value: &str) -> Self {
        self.element(tag, vr, value.as_bytes())
    }

    pub fn us(self, tag: Tag, value: u16) -> Self {
        let raw = match self.order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.element(tag, b"US", &raw)
    }

    /// Undefined-length sequence holding undefined-length items
    pub fn sequence(mut self, tag: Tag, items: &[Vec<u8>]) -> Self {
        self.header(tag, Vr(*b"SQ"), UNDEFINED_LENGTH);
        for item in items {
            self.header(Tag::ITEM, Vr(*b"  "), UNDEFINED_LENGTH);
            self.bytes.extend_from_slice(item);
            self.header(Tag::ITEM_DELIMITATION, Vr(*b"  "), 0);
        }
        self.header(Tag::SEQUENCE_DELIMITATION, Vr(*b"  "), 0);
        self
    }

    /// Encapsulated pixel data: empty basic offset table, then one item per fragment
    pub fn encapsulated_pixel_data(mut self, fragments: &[Vec<u8>]) -> Self {
        self.header(Tag::PIXEL_DATA, Vr::OB, UNDEFINED_LENGTH);
        self.header(Tag::ITEM, Vr(*b"  "), 0);
        for fragment in fragments {
            let mut fragment = fragment.clone();
            if fragment.len() % 2 == 1 {
                fragment.push(0);
            }
            self.header(Tag::ITEM, Vr(*b"  "), fragment.len() as u32);
            self.bytes.extend_from_slice(&fragment);
        }
        self.header(Tag::SEQUENCE_DELIMITATION, Vr(*b"  "), 0);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Image header elements common to every synthetic dataset
fn image_prefix(
    explicit: bool,
    order: ByteOrder,
    geometry: (u16, u16, u16, u16),
    study_uid: &str,
) -> DatasetWriter {
    let (rows, columns, samples, bits) = geometry;
    DatasetWriter::new(explicit, order)
        .string(Tag::new(0x0008, 0x0005), b"CS", "ISO_IR 100")
        .string(Tag::new(0x0008, 0x0016), b"UI", SECONDARY_CAPTURE_SOP_CLASS)
        .string(Tag::new(0x0008, 0x0060), b"CS", "OT")
        .string(Tag::STUDY_INSTANCE_UID, b"UI", study_uid)
        .us(Tag::SAMPLES_PER_PIXEL, samples)
        .us(Tag::ROWS, rows)
        .us(Tag::COLUMNS, columns)
        .us(Tag::BITS_ALLOCATED, bits)
}

/// Minimal baseline JPEG stream: SOI, APP0, DQT, SOFn, DHT, SOS, entropy bytes, EOI
pub fn jpeg_stream(sof_marker: u8, precision: u8) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    // APP0 JFIF
    out.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
    out.extend_from_slice(b"JFIF\0");
    out.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
    // DQT with one 8-bit table
    out.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
    out.extend_from_slice(&[1u8; 64]);
    // SOFn: 4x4, one component
    out.extend_from_slice(&[
        0xFF, sof_marker, 0x00, 0x0B, precision, 0x00, 0x04, 0x00, 0x04, 0x01, 0x01, 0x11, 0x00,
    ]);
    // DHT (tiny)
    out.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x00]);
    out.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    out.push(0x00);
    // SOS
    out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
    out.extend_from_slice(&[0x12, 0x34, 0x56, 0x78]);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// Minimal JPEG-LS stream (SOF55) with the given NEAR parameter
pub fn jpeg_ls_stream(near: u8) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    out.extend_from_slice(&[
        0xFF, 0xF7, 0x00, 0x0B, 0x08, 0x00, 0x04, 0x00, 0x04, 0x01, 0x01, 0x11, 0x00,
    ]);
    // SOS: Ns=1, (C1, Tm=0), NEAR, ILV=0, Al/Ah=0
    out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, near, 0x00, 0x00]);
    out.extend_from_slice(&[0x00, 0x11, 0xFF, 0xD9]);
    out
}

/// Minimal JPEG 2000 codestream: SOC, SIZ, COD, QCD, SOT header
pub fn j2k_codestream(reversible: bool, part2: bool) -> Vec<u8> {
    let rsiz: u16 = if part2 { 0x8000 } else { 0x0000 };
    let mut out = vec![0xFF, 0x4F];
    // SIZ: Lsiz=41 for one component
    out.extend_from_slice(&[0xFF, 0x51, 0x00, 0x29]);
    out.extend_from_slice(&rsiz.to_be_bytes());
    for value in [4u32, 4, 0, 0, 4, 4, 0, 0] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out.extend_from_slice(&[0x00, 0x01, 0x07, 0x01, 0x01]);
    // COD: Scod, progression, layers(2), MCT, levels, cbw, cbh, cbstyle, transform
    out.extend_from_slice(&[0xFF, 0x52, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x01, 0x00]);
    out.extend_from_slice(&[0x05, 0x04, 0x04, 0x00, if reversible { 0x01 } else { 0x00 }]);
    // QCD
    out.extend_from_slice(&[0xFF, 0x5C, 0x00, 0x04, 0x40, 0x48]);
    // SOT
    out.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x00, 0x01]);
    out.extend_from_slice(&[0xFF, 0x93, 0x80, 0x80, 0xFF, 0xD9]);
    out
}

/// RLE fragment: 64-byte header with one segment, then a literal run
pub fn rle_fragment() -> Vec<u8> {
    let mut out = vec![0u8; 64];
    out[0..4].copy_from_slice(&1u32.to_le_bytes());
    out[4..8].copy_from_slice(&64u32.to_le_bytes());
    // Literal run of 16 bytes
    out.push(15);
    out.extend_from_slice(&[0x10; 16]);
    out
}

/// File Meta Information layout knobs
#[derive(Debug, Clone)]
pub struct MetaSpec {
    pub include_group_length: bool,
    /// Write this group length instead of the computed one
    pub group_length_override: Option<u32>,
    pub media_storage_sop_class: String,
    pub media_storage_sop_instance: String,
    pub implementation_class_uid: String,
}

impl Default for MetaSpec {
    fn default() -> Self {
        Self {
            include_group_length: true,
            group_length_override: None,
            media_storage_sop_class: SECONDARY_CAPTURE_SOP_CLASS.to_string(),
            media_storage_sop_instance: "1.2.826.0.1.3680043.8.498.2".to_string(),
            implementation_class_uid: "1.2.826.0.1.3680043.8.498.3".to_string(),
        }
    }
}

/// A complete synthetic container: preamble, marker, meta group and dataset
#[derive(Debug, Clone)]
pub struct SyntheticContainer {
    meta: MetaSpec,
    /// None omits (0002,0010) entirely
    declared_syntax: Option<String>,
    dataset: Vec<u8>,
}

impl SyntheticContainer {
    pub fn new(declared_syntax: &str, dataset: Vec<u8>) -> Self {
        Self {
            meta: MetaSpec::default(),
            declared_syntax: Some(declared_syntax.to_string()),
            dataset,
        }
    }

    /// 4x4 8-bit monochrome image, Explicit VR Little Endian
    pub fn explicit_le_uncompressed() -> Self {
        let dataset = image_prefix(true, ByteOrder::Little, (4, 4, 1, 8), DEFAULT_STUDY_UID)
            .element(Tag::PIXEL_DATA, b"OB", &[0x40; 16])
            .finish();
        Self::new(EXPLICIT_VR_LITTLE_ENDIAN, dataset)
    }

    /// 4x4 8-bit monochrome image, Implicit VR Little Endian
    pub fn implicit_le_uncompressed() -> Self {
        let dataset = image_prefix(false, ByteOrder::Little, (4, 4, 1, 8), DEFAULT_STUDY_UID)
            .element(Tag::PIXEL_DATA, b"OW", &[0x40; 16])
            .finish();
        Self::new(IMPLICIT_VR_LITTLE_ENDIAN, dataset)
    }

    /// 4x4 16-bit monochrome image, Explicit VR Big Endian
    pub fn explicit_be_uncompressed() -> Self {
        let dataset = image_prefix(true, ByteOrder::Big, (4, 4, 1, 16), DEFAULT_STUDY_UID)
            .element(Tag::PIXEL_DATA, b"OW", &[0x01; 32])
            .finish();
        Self::new(EXPLICIT_VR_BIG_ENDIAN, dataset)
    }

    /// Explicit VR Little Endian image whose pixel data is encapsulated `fragment`
    pub fn encapsulated(declared_syntax: &str, fragment: Vec<u8>) -> Self {
        let dataset = image_prefix(true, ByteOrder::Little, (4, 4, 1, 8), DEFAULT_STUDY_UID)
            .encapsulated_pixel_data(&[fragment])
            .finish();
        Self::new(declared_syntax, dataset)
    }

    pub fn jpeg_baseline() -> Self {
        Self::encapsulated(JPEG_BASELINE, jpeg_stream(0xC0, 8))
    }

    pub fn jpeg_extended() -> Self {
        Self::encapsulated(JPEG_EXTENDED, jpeg_stream(0xC1, 12))
    }

    pub fn jpeg2000(lossless: bool) -> Self {
        let uid = if lossless { JPEG_2000_LOSSLESS } else { JPEG_2000 };
        Self::encapsulated(uid, j2k_codestream(lossless, false))
    }

    pub fn rle() -> Self {
        Self::encapsulated(RLE_LOSSLESS, rle_fragment())
    }

    pub fn with_declared_syntax(mut self, uid: &str) -> Self {
        self.declared_syntax = Some(uid.to_string());
        self
    }

    pub fn without_declared_syntax(mut self) -> Self {
        self.declared_syntax = None;
        self
    }

    pub fn with_meta(mut self, meta: MetaSpec) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_dataset(mut self, dataset: Vec<u8>) -> Self {
        self.dataset = dataset;
        self
    }

    pub fn declared_syntax(&self) -> Option<&str> {
        self.declared_syntax.as_deref()
    }

    pub fn dataset(&self) -> &[u8] {
        &self.dataset
    }

    fn encode_meta(&self) -> Vec<u8> {
        let mut body = Vec::new();
        encode_meta_element(Tag::new(0x0002, 0x0001), Vr::OB, &[0x00, 0x01], &mut body);
        encode_meta_element(
            Tag::new(0x0002, 0x0002),
            Vr::UI,
            self.meta.media_storage_sop_class.as_bytes(),
            &mut body,
        );
        encode_meta_element(
            Tag::new(0x0002, 0x0003),
            Vr::UI,
            self.meta.media_storage_sop_instance.as_bytes(),
            &mut body,
        );
        if let Some(uid) = &self.declared_syntax {
            encode_meta_element(Tag::TRANSFER_SYNTAX_UID, Vr::UI, uid.as_bytes(), &mut body);
        }
        encode_meta_element(
            Tag::new(0x0002, 0x0012),
            Vr::UI,
            self.meta.implementation_class_uid.as_bytes(),
            &mut body,
        );

        let mut out = Vec::new();
        if self.meta.include_group_length {
            let length = self
                .meta
                .group_length_override
                .unwrap_or(body.len() as u32);
            encode_meta_element(Tag::META_GROUP_LENGTH, Vr::UL, &length.to_le_bytes(), &mut out);
        }
        out.extend_from_slice(&body);
        out
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        out.extend_from_slice(&self.encode_meta());
        out.extend_from_slice(&self.dataset);
        out
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.build())
    }
}
