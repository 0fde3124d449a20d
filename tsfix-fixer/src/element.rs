//! Data element primitives: tags, value representations, byte-order reads
//!
//! Slice-based helpers shared by the header reader, the dataset sampler and
//! the detector probes. Nothing here allocates except VR display.

use std::fmt;
use tsfix_common::ByteOrder;

/// Fixed preamble length before the `DICM` marker
pub const PREAMBLE_LEN: usize = 128;
/// Container magic marker, found at offset 128
pub const MAGIC: &[u8; 4] = b"DICM";
/// Offset of the first File Meta Information element
pub const META_START: usize = PREAMBLE_LEN + MAGIC.len();
/// Length value meaning "undefined, terminated by a delimiter"
pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// Group/element pair identifying a data element
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    pub const META_GROUP_LENGTH: Tag = Tag::new(0x0002, 0x0000);
    pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
    pub const SAMPLES_PER_PIXEL: Tag = Tag::new(0x0028, 0x0002);
    pub const NUMBER_OF_FRAMES: Tag = Tag::new(0x0028, 0x0008);
    pub const ROWS: Tag = Tag::new(0x0028, 0x0010);
    pub const COLUMNS: Tag = Tag::new(0x0028, 0x0011);
    pub const BITS_ALLOCATED: Tag = Tag::new(0x0028, 0x0100);
    pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
    pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);
    pub const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
    pub const ITEM_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE00D);
    pub const SEQUENCE_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE0DD);

    /// Item and delimiter tags carry no VR in any encoding
    pub fn is_delimiter_group(&self) -> bool {
        self.group == 0xFFFE
    }

    /// Read a tag from the first four bytes of `bytes`
    pub fn read(bytes: &[u8], order: ByteOrder) -> Option<Tag> {
        Some(Tag::new(read_u16(bytes, 0, order)?, read_u16(bytes, 2, order)?))
    }

    pub fn to_bytes(self, order: ByteOrder) -> [u8; 4] {
        let (g, e) = match order {
            ByteOrder::Little => (self.group.to_le_bytes(), self.element.to_le_bytes()),
            ByteOrder::Big => (self.group.to_be_bytes(), self.element.to_be_bytes()),
        };
        [g[0], g[1], e[0], e[1]]
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

/// Two-letter Value Representation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vr(pub [u8; 2]);

/// Every VR code the standard defines
const KNOWN_VRS: [&[u8; 2]; 34] = [
    b"AE", b"AS", b"AT", b"CS", b"DA", b"DS", b"DT", b"FD", b"FL", b"IS", b"LO", b"LT", b"OB",
    b"OD", b"OF", b"OL", b"OV", b"OW", b"PN", b"SH", b"SL", b"SQ", b"SS", b"ST", b"SV", b"TM",
    b"UC", b"UI", b"UL", b"UN", b"UR", b"US", b"UT", b"UV",
];

impl Vr {
    pub const OB: Vr = Vr(*b"OB");
    pub const UI: Vr = Vr(*b"UI");
    pub const UL: Vr = Vr(*b"UL");

    pub fn is_known(&self) -> bool {
        KNOWN_VRS.iter().any(|known| **known == self.0)
    }

    /// VRs encoded with two reserved bytes and a 32-bit length in Explicit VR
    pub fn has_long_length(&self) -> bool {
        matches!(
            &self.0,
            b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN"
                | b"UR" | b"UT" | b"UV"
        )
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

#[inline]
pub fn read_u16(bytes: &[u8], offset: usize, order: ByteOrder) -> Option<u16> {
    let raw: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(match order {
        ByteOrder::Little => u16::from_le_bytes(raw),
        ByteOrder::Big => u16::from_be_bytes(raw),
    })
}

#[inline]
pub fn read_u32(bytes: &[u8], offset: usize, order: ByteOrder) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(match order {
        ByteOrder::Little => u32::from_le_bytes(raw),
        ByteOrder::Big => u32::from_be_bytes(raw),
    })
}

/// Big-endian u16, the byte order of JPEG and JPEG 2000 marker segments
#[inline]
pub fn read_be_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    read_u16(bytes, offset, ByteOrder::Big)
}

/// Decode a UI/CS/IS style string value, dropping padding
pub fn value_to_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches(&['\0', ' '][..])
        .trim()
        .to_string()
}
