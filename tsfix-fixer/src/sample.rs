//! Dataset sampler
//!
//! Collects the bounded evidence window the detector works on:
//! - the first bytes of the dataset (element layout, VR presence, byte order)
//! - image geometry and Study Instance UID
//! - the head of the pixel-data value (for encapsulated pixel data, the head
//!   of the first fragment after the basic offset table)
//!
//! Element headers are walked and values skipped with seeks, so a large
//! dataset costs a handful of small reads. Structural surprises stop the walk
//! and are recorded; only genuine I/O errors are returned as errors.

use crate::detector::probes::{classify_byte_order, classify_vr_encoding, VrEncoding};
use crate::element::{read_u16, read_u32, value_to_string, Tag, Vr, UNDEFINED_LENGTH};
use crate::header::ContainerHeader;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tsfix_common::config::FixerConfig;
use tsfix_common::ByteOrder;

/// Largest value read for geometry/study elements
const SMALL_VALUE_LIMIT: u32 = 64;
/// Nesting limit for undefined-length sequences
const MAX_DEPTH: usize = 16;
/// Element count limit for a single walk
const MAX_ELEMENTS: usize = 100_000;

/// Window sizes handed to the detector
#[derive(Debug, Clone, Copy)]
pub struct SampleLimits {
    pub head_bytes: usize,
    pub pixel_bytes: usize,
}

impl Default for SampleLimits {
    fn default() -> Self {
        Self {
            head_bytes: 512,
            pixel_bytes: 4096,
        }
    }
}

impl From<&FixerConfig> for SampleLimits {
    fn from(config: &FixerConfig) -> Self {
        Self {
            head_bytes: config.sample_head_bytes.max(16),
            pixel_bytes: config.sample_pixel_bytes.max(16),
        }
    }
}

/// Image attributes needed to size native pixel data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageGeometry {
    pub rows: Option<u16>,
    pub columns: Option<u16>,
    pub samples_per_pixel: Option<u16>,
    pub bits_allocated: Option<u16>,
    pub number_of_frames: Option<u32>,
}

impl ImageGeometry {
    /// rows × columns × samples × bytes per sample × frames, if known.
    ///
    /// None when an attribute is missing or the product does not fit in u64.
    pub fn expected_native_len(&self) -> Option<u64> {
        let rows = u64::from(self.rows?);
        let columns = u64::from(self.columns?);
        let samples = u64::from(self.samples_per_pixel.unwrap_or(1));
        let frames = u64::from(self.number_of_frames.unwrap_or(1).max(1));
        let bits = u64::from(self.bits_allocated?);

        let values = rows
            .checked_mul(columns)?
            .checked_mul(samples)?
            .checked_mul(frames)?;
        if bits == 1 {
            // Bit-packed single-bit data
            return Some(values.div_ceil(8));
        }
        values.checked_mul(bits.div_ceil(8))
    }
}

/// What the sampler found for (7FE0,0010)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelDataSample {
    /// Defined length: native pixel data (or a non-standard stream)
    Defined { length: u32, head: Vec<u8> },
    /// Undefined length: item-encapsulated fragments
    Encapsulated {
        /// First item was an (FFFE,E000) basic offset table
        items_valid: bool,
        offset_table_len: u32,
        first_fragment_len: Option<u32>,
        /// Head of the first fragment (or raw value bytes when items are invalid)
        fragment_head: Vec<u8>,
    },
}

/// Outcome of looking for pixel data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelDataPresence {
    Present(PixelDataSample),
    /// Dataset walked to its end without a pixel-data element
    Absent,
    /// Walk stopped before pixel data could be located
    NotReached(String),
}

/// Bounded evidence window for one file
#[derive(Debug, Clone)]
pub struct DatasetSample {
    /// Bytes from the first dataset element to end of file
    pub dataset_len: u64,
    pub head: Vec<u8>,
    pub geometry: ImageGeometry,
    pub study_instance_uid: Option<String>,
    pub pixel_data: PixelDataPresence,
}

impl DatasetSample {
    /// Sample over an in-memory dataset (everything after the meta group)
    pub fn from_dataset_bytes(dataset: &[u8], limits: SampleLimits) -> io::Result<Self> {
        sample_from_reader(io::Cursor::new(dataset), 0, dataset.len() as u64, limits)
    }
}

/// Sample the dataset of a file on disk
pub fn sample_dataset(
    path: &Path,
    header: &ContainerHeader,
    limits: SampleLimits,
) -> io::Result<DatasetSample> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let dataset_len = file_len.saturating_sub(header.dataset_offset);
    sample_from_reader(BufReader::new(file), header.dataset_offset, dataset_len, limits)
}

/// Sample a dataset starting at `offset` in any seekable reader
pub fn sample_from_reader<R: Read + Seek>(
    mut reader: R,
    offset: u64,
    dataset_len: u64,
    limits: SampleLimits,
) -> io::Result<DatasetSample> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut head = Vec::with_capacity(limits.head_bytes);
    (&mut reader)
        .take(limits.head_bytes.min(dataset_len as usize) as u64)
        .read_to_end(&mut head)?;

    let mut sample = DatasetSample {
        dataset_len,
        head,
        geometry: ImageGeometry::default(),
        study_instance_uid: None,
        pixel_data: PixelDataPresence::NotReached("dataset encoding undetermined".to_string()),
    };

    let explicit = match classify_vr_encoding(&sample.head, dataset_len) {
        Some(encoding) => encoding == VrEncoding::Explicit,
        None => return Ok(sample),
    };
    let order = match classify_byte_order(&sample.head, dataset_len, explicit) {
        Some(order) => order,
        None => return Ok(sample),
    };

    reader.seek(SeekFrom::Start(offset))?;
    let mut walker = Walker {
        reader,
        explicit,
        order,
        pos: 0,
        end: dataset_len,
        pixel_limit: limits.pixel_bytes,
        elements_seen: 0,
    };

    match walker.walk_top_level(&mut sample) {
        Ok(presence) => sample.pixel_data = presence,
        Err(WalkIssue::Structure(reason)) => {
            sample.pixel_data = PixelDataPresence::NotReached(reason)
        }
        Err(WalkIssue::Io(e)) => return Err(e),
    }
    Ok(sample)
}

enum WalkIssue {
    Io(io::Error),
    Structure(String),
}

impl From<io::Error> for WalkIssue {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WalkIssue::Structure("dataset ends inside an element".to_string())
        } else {
            WalkIssue::Io(e)
        }
    }
}

struct ElementHeader {
    tag: Tag,
    length: u32,
}

struct Walker<R> {
    reader: R,
    explicit: bool,
    order: ByteOrder,
    /// Position relative to the dataset start
    pos: u64,
    end: u64,
    pixel_limit: usize,
    elements_seen: usize,
}

impl<R: Read + Seek> Walker<R> {
    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>, WalkIssue> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        self.pos += len as u64;
        Ok(buf)
    }

    fn skip(&mut self, len: u64) -> Result<(), WalkIssue> {
        if self.pos + len > self.end {
            return Err(WalkIssue::Structure(format!(
                "value of {} bytes at offset {} runs past end of dataset",
                len, self.pos
            )));
        }
        self.reader.seek(SeekFrom::Current(len as i64))?;
        self.pos += len;
        Ok(())
    }

    /// Read the next element header; None at a clean end of dataset
    fn next_header(&mut self) -> Result<Option<ElementHeader>, WalkIssue> {
        if self.pos >= self.end {
            return Ok(None);
        }
        self.elements_seen += 1;
        if self.elements_seen > MAX_ELEMENTS {
            return Err(WalkIssue::Structure("element limit exceeded".to_string()));
        }

        let start = self.pos;
        let tag_bytes = self.read_exact_vec(4)?;
        let tag = Tag::read(&tag_bytes, self.order)
            .ok_or_else(|| WalkIssue::Structure("short tag".to_string()))?;

        let length = if tag.is_delimiter_group() || !self.explicit {
            let raw = self.read_exact_vec(4)?;
            read_u32(&raw, 0, self.order).unwrap_or(0)
        } else {
            let vr_bytes = self.read_exact_vec(2)?;
            let vr = Vr([vr_bytes[0], vr_bytes[1]]);
            if !vr.is_known() {
                return Err(WalkIssue::Structure(format!(
                    "unrecognized VR {:02X?} for {} at offset {}",
                    vr_bytes, tag, start
                )));
            }
            if vr.has_long_length() {
                let raw = self.read_exact_vec(6)?;
                read_u32(&raw, 2, self.order).unwrap_or(0)
            } else {
                let raw = self.read_exact_vec(2)?;
                read_u16(&raw, 0, self.order).unwrap_or(0) as u32
            }
        };

        Ok(Some(ElementHeader { tag, length }))
    }

    fn walk_top_level(&mut self, sample: &mut DatasetSample) -> Result<PixelDataPresence, WalkIssue> {
        while let Some(element) = self.next_header()? {
            if element.tag == Tag::PIXEL_DATA {
                return self.capture_pixel_data(element.length).map(PixelDataPresence::Present);
            }
            if element.tag > Tag::PIXEL_DATA {
                // Trailing padding or private groups after the image
                return Ok(PixelDataPresence::Absent);
            }
            if element.tag.is_delimiter_group() {
                return Err(WalkIssue::Structure(format!(
                    "unexpected delimiter {} at top level",
                    element.tag
                )));
            }

            if element.length == UNDEFINED_LENGTH {
                self.skip_sequence(1)?;
            } else if is_sampled_tag(element.tag) && element.length <= SMALL_VALUE_LIMIT {
                let value = self.read_exact_vec(element.length as usize)?;
                self.record_value(sample, element.tag, &value);
            } else {
                self.skip(element.length as u64)?;
            }
        }
        Ok(PixelDataPresence::Absent)
    }

    /// Skip items until the sequence delimiter
    fn skip_sequence(&mut self, depth: usize) -> Result<(), WalkIssue> {
        if depth > MAX_DEPTH {
            return Err(WalkIssue::Structure("sequence nesting too deep".to_string()));
        }
        loop {
            let element = self.next_header()?.ok_or_else(|| {
                WalkIssue::Structure("dataset ends inside a sequence".to_string())
            })?;
            match element.tag {
                Tag::SEQUENCE_DELIMITATION => return Ok(()),
                Tag::ITEM if element.length == UNDEFINED_LENGTH => self.skip_item(depth)?,
                Tag::ITEM => self.skip(element.length as u64)?,
                other => {
                    return Err(WalkIssue::Structure(format!(
                        "expected item in sequence, found {}",
                        other
                    )))
                }
            }
        }
    }

    /// Skip elements of an undefined-length item until the item delimiter
    fn skip_item(&mut self, depth: usize) -> Result<(), WalkIssue> {
        loop {
            let element = self.next_header()?.ok_or_else(|| {
                WalkIssue::Structure("dataset ends inside an item".to_string())
            })?;
            if element.tag == Tag::ITEM_DELIMITATION {
                return Ok(());
            }
            if element.length == UNDEFINED_LENGTH {
                self.skip_sequence(depth + 1)?;
            } else {
                self.skip(element.length as u64)?;
            }
        }
    }

    fn capture_pixel_data(&mut self, length: u32) -> Result<PixelDataSample, WalkIssue> {
        if length != UNDEFINED_LENGTH {
            let available = (self.end - self.pos).min(length as u64);
            let take = available.min(self.pixel_limit as u64) as usize;
            let head = self.read_exact_vec(take)?;
            return Ok(PixelDataSample::Defined { length, head });
        }

        // Basic offset table item
        let remaining = self.end - self.pos;
        if remaining < 8 {
            let head = self.read_exact_vec(remaining as usize)?;
            return Ok(PixelDataSample::Encapsulated {
                items_valid: false,
                offset_table_len: 0,
                first_fragment_len: None,
                fragment_head: head,
            });
        }
        let item = self.read_exact_vec(8)?;
        let tag = Tag::read(&item, self.order);
        if tag != Some(Tag::ITEM) {
            let rest = (self.end - self.pos).min(self.pixel_limit as u64) as usize;
            let mut head = item;
            head.extend(self.read_exact_vec(rest)?);
            return Ok(PixelDataSample::Encapsulated {
                items_valid: false,
                offset_table_len: 0,
                first_fragment_len: None,
                fragment_head: head,
            });
        }
        let offset_table_len = read_u32(&item, 4, self.order).unwrap_or(0);
        self.skip(offset_table_len as u64)?;

        // First fragment, if any
        let fragment = match self.next_header()? {
            Some(element) if element.tag == Tag::ITEM => element.length,
            _ => {
                return Ok(PixelDataSample::Encapsulated {
                    items_valid: true,
                    offset_table_len,
                    first_fragment_len: None,
                    fragment_head: Vec::new(),
                })
            }
        };
        let take = (self.end - self.pos)
            .min(fragment as u64)
            .min(self.pixel_limit as u64) as usize;
        let fragment_head = self.read_exact_vec(take)?;
        Ok(PixelDataSample::Encapsulated {
            items_valid: true,
            offset_table_len,
            first_fragment_len: Some(fragment),
            fragment_head,
        })
    }

    fn record_value(&self, sample: &mut DatasetSample, tag: Tag, value: &[u8]) {
        let us = || read_u16(value, 0, self.order);
        match tag {
            Tag::ROWS => sample.geometry.rows = us(),
            Tag::COLUMNS => sample.geometry.columns = us(),
            Tag::SAMPLES_PER_PIXEL => sample.geometry.samples_per_pixel = us(),
            Tag::BITS_ALLOCATED => sample.geometry.bits_allocated = us(),
            Tag::NUMBER_OF_FRAMES => {
                sample.geometry.number_of_frames = value_to_string(value).parse().ok()
            }
            Tag::STUDY_INSTANCE_UID => {
                let uid = value_to_string(value);
                if !uid.is_empty() {
                    sample.study_instance_uid = Some(uid);
                }
            }
            _ => {}
        }
    }
}

fn is_sampled_tag(tag: Tag) -> bool {
    matches!(
        tag,
        Tag::ROWS
            | Tag::COLUMNS
            | Tag::SAMPLES_PER_PIXEL
            | Tag::BITS_ALLOCATED
            | Tag::NUMBER_OF_FRAMES
            | Tag::STUDY_INSTANCE_UID
    )
}
