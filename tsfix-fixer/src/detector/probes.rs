//! Detection probes
//!
//! Each probe is a pure function from sampled bytes to an optional finding
//! plus human-readable evidence. The detector runs them in [`PROBE_CHAIN`]
//! order and combines the findings; nothing here touches the filesystem.

use super::signatures::{classify_j2k, classify_jpeg, rle_segment_count, JP2_SIGNATURE_BOX};
use crate::element::{read_u16, read_u32, Tag, Vr, UNDEFINED_LENGTH};
use crate::header::ContainerHeader;
use crate::sample::{DatasetSample, PixelDataPresence, PixelDataSample};
use tsfix_common::catalog::RLE_LOSSLESS;
use tsfix_common::ByteOrder;

/// Elements walked when scoring a byte-order interpretation
const SCORE_WINDOW: usize = 16;

/// How dataset elements carry their VR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrEncoding {
    Explicit,
    Implicit,
}

/// What the pixel-data probe concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelVerdict {
    /// A compression signature identified this syntax
    Compressed {
        uid: &'static str,
        /// Signature matched but something about it warrants a second look
        needs_review: bool,
    },
    /// Pixel data is native (defined length, no compressed stream)
    Native,
    /// Dataset carries no pixel data
    NoPixelData,
    /// Pixel data could not be examined
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    VrEncoding(VrEncoding),
    ByteOrder(ByteOrder),
    Pixel(PixelVerdict),
}

/// One probe's verdict and the evidence behind it
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub finding: Option<Finding>,
    pub evidence: Vec<String>,
}

impl Observation {
    fn found(finding: Finding, evidence: impl Into<String>) -> Self {
        Self {
            finding: Some(finding),
            evidence: vec![evidence.into()],
        }
    }

    fn nothing(evidence: impl Into<String>) -> Self {
        Self {
            finding: None,
            evidence: vec![evidence.into()],
        }
    }
}

/// Inputs shared by every probe
#[derive(Debug, Clone, Copy)]
pub struct ProbeInput<'a> {
    pub header: &'a ContainerHeader,
    pub sample: &'a DatasetSample,
}

pub type Probe = fn(&ProbeInput<'_>) -> Observation;

/// Probes in evaluation order
pub const PROBE_CHAIN: [(&str, Probe); 3] = [
    ("pixel-signature", pixel_signature_probe),
    ("vr-encoding", vr_encoding_probe),
    ("byte-order", byte_order_probe),
];

fn plausible_group(group: u16) -> bool {
    (0x0004..=0x7FE0).contains(&group) || group == 0xFFFC
}

/// Explicit when the two bytes after the first tag are a known VR code;
/// implicit when they are not but the first element still parses with a
/// 32-bit length; None when neither reading holds.
pub fn classify_vr_encoding(head: &[u8], dataset_len: u64) -> Option<VrEncoding> {
    let vr = Vr(head.get(4..6)?.try_into().ok()?);
    if vr.is_known() {
        return Some(VrEncoding::Explicit);
    }
    let implicit_fits = [ByteOrder::Little, ByteOrder::Big].into_iter().any(|order| {
        let group = read_u16(head, 0, order).unwrap_or(0);
        plausible_group(group)
            && read_u32(head, 4, order).is_some_and(|length| {
                length == UNDEFINED_LENGTH || length as u64 + 8 <= dataset_len
            })
    });
    implicit_fits.then_some(VrEncoding::Implicit)
}

/// Count consecutive well-formed, ascending elements under one interpretation
pub fn structure_score(head: &[u8], dataset_len: u64, explicit: bool, order: ByteOrder) -> usize {
    let mut pos = 0usize;
    let mut score = 0usize;
    let mut previous: Option<Tag> = None;

    while score < SCORE_WINDOW {
        let Some(tag) = Tag::read(&head[pos.min(head.len())..], order) else {
            break;
        };
        if !plausible_group(tag.group) || previous.is_some_and(|p| tag <= p) {
            break;
        }
        let (length, header_len) = if explicit {
            let Some(vr_bytes) = head.get(pos + 4..pos + 6) else {
                break;
            };
            let vr = Vr([vr_bytes[0], vr_bytes[1]]);
            if !vr.is_known() {
                break;
            }
            if vr.has_long_length() {
                match read_u32(head, pos + 8, order) {
                    Some(length) => (length, 12usize),
                    None => break,
                }
            } else {
                match read_u16(head, pos + 6, order) {
                    Some(length) => (length as u32, 8usize),
                    None => break,
                }
            }
        } else {
            match read_u32(head, pos + 4, order) {
                Some(length) => (length, 8usize),
                None => break,
            }
        };

        if length == UNDEFINED_LENGTH {
            // Sequence or encapsulated value; the walk cannot go further here
            score += 1;
            break;
        }
        let next = pos as u64 + header_len as u64 + length as u64;
        if next > dataset_len {
            break;
        }
        score += 1;
        previous = Some(tag);
        if next as usize >= head.len() {
            break;
        }
        pos = next as usize;
    }
    score
}

/// Choose the byte order whose element walk is longer; ties go to the
/// reading with the smaller first group, which is where datasets begin.
pub fn classify_byte_order(head: &[u8], dataset_len: u64, explicit: bool) -> Option<ByteOrder> {
    let little = structure_score(head, dataset_len, explicit, ByteOrder::Little);
    let big = structure_score(head, dataset_len, explicit, ByteOrder::Big);
    match little.cmp(&big) {
        std::cmp::Ordering::Greater => Some(ByteOrder::Little),
        std::cmp::Ordering::Less => Some(ByteOrder::Big),
        std::cmp::Ordering::Equal if little == 0 => None,
        std::cmp::Ordering::Equal => {
            let le_group = read_u16(head, 0, ByteOrder::Little)?;
            let be_group = read_u16(head, 0, ByteOrder::Big)?;
            Some(if le_group <= be_group {
                ByteOrder::Little
            } else {
                ByteOrder::Big
            })
        }
    }
}

/// Presence of a known VR code after the first dataset tag
pub fn vr_encoding_probe(input: &ProbeInput<'_>) -> Observation {
    let sample = input.sample;
    if sample.head.len() < 8 {
        return Observation::nothing(format!(
            "dataset is {} bytes, too short to read an element header",
            sample.head.len()
        ));
    }
    match classify_vr_encoding(&sample.head, sample.dataset_len) {
        Some(VrEncoding::Explicit) => Observation::found(
            Finding::VrEncoding(VrEncoding::Explicit),
            format!(
                "first dataset element carries VR '{}'",
                String::from_utf8_lossy(&sample.head[4..6])
            ),
        ),
        Some(VrEncoding::Implicit) => Observation::found(
            Finding::VrEncoding(VrEncoding::Implicit),
            format!(
                "bytes {:02X?} after the first tag are not a VR code; implicit VR layout",
                &sample.head[4..6]
            ),
        ),
        None => Observation::nothing("first dataset element parses as neither explicit nor implicit VR"),
    }
}

/// Group plausibility of the dataset element walk under each byte order
pub fn byte_order_probe(input: &ProbeInput<'_>) -> Observation {
    let sample = input.sample;
    let Some(encoding) = classify_vr_encoding(&sample.head, sample.dataset_len) else {
        return Observation::nothing("byte order not assessed without a VR layout");
    };
    let explicit = encoding == VrEncoding::Explicit;

    let mut evidence = Vec::new();
    if input.header.group_length_present {
        evidence.push(format!(
            "meta group length {} reads consistently as little endian",
            input.header.meta_group_length
        ));
    }

    let little = structure_score(&sample.head, sample.dataset_len, explicit, ByteOrder::Little);
    let big = structure_score(&sample.head, sample.dataset_len, explicit, ByteOrder::Big);
    evidence.push(format!(
        "element walk: {} elements as little endian, {} as big endian",
        little, big
    ));

    let finding = classify_byte_order(&sample.head, sample.dataset_len, explicit);
    match finding {
        Some(order) => {
            if little == big {
                evidence.push(format!(
                    "tie broken by first group: {:?} endian reads the lower group",
                    order
                ));
            }
            Observation {
                finding: Some(Finding::ByteOrder(order)),
                evidence,
            }
        }
        None => {
            evidence.push("no byte order yields a plausible element".to_string());
            Observation {
                finding: None,
                evidence,
            }
        }
    }
}

/// Compression signatures and native-size checks on the pixel-data window
pub fn pixel_signature_probe(input: &ProbeInput<'_>) -> Observation {
    let sample = input.sample;
    match &sample.pixel_data {
        PixelDataPresence::NotReached(reason) => Observation::found(
            Finding::Pixel(PixelVerdict::Inconclusive),
            format!("pixel data not reached: {}", reason),
        ),
        PixelDataPresence::Absent => Observation::found(
            Finding::Pixel(PixelVerdict::NoPixelData),
            "dataset has no pixel data element",
        ),
        PixelDataPresence::Present(PixelDataSample::Defined { length, head }) => {
            defined_length_verdict(sample, *length, head)
        }
        PixelDataPresence::Present(PixelDataSample::Encapsulated {
            items_valid,
            first_fragment_len,
            fragment_head,
            ..
        }) => encapsulated_verdict(*items_valid, *first_fragment_len, fragment_head),
    }
}

fn defined_length_verdict(sample: &DatasetSample, length: u32, head: &[u8]) -> Observation {
    if length == 0 {
        return Observation::found(
            Finding::Pixel(PixelVerdict::Native),
            "pixel data is empty; treated as native",
        );
    }

    let expected = sample.geometry.expected_native_len();
    let size_matches = expected.map(|e| matches!(u64::from(length).checked_sub(e), Some(0 | 1)));
    let size_note = match (expected, size_matches) {
        (Some(e), Some(true)) => format!(
            "defined-length pixel data of {} bytes matches rows x columns x samples x bytes x frames = {}",
            length, e
        ),
        (Some(e), _) => format!(
            "defined-length pixel data of {} bytes differs from expected native size {}",
            length, e
        ),
        (None, _) => format!(
            "defined-length pixel data of {} bytes; image geometry incomplete",
            length
        ),
    };

    if size_matches != Some(true) {
        if let Some(jpeg) = classify_jpeg(head) {
            let mut evidence = vec![size_note];
            evidence.extend(jpeg.evidence);
            evidence.push("defined-length value holds a JPEG stream (non-standard encoding)".to_string());
            return Observation {
                finding: Some(Finding::Pixel(PixelVerdict::Compressed {
                    uid: jpeg.uid,
                    needs_review: true,
                })),
                evidence,
            };
        }
    }

    Observation::found(Finding::Pixel(PixelVerdict::Native), size_note)
}

fn encapsulated_verdict(
    items_valid: bool,
    first_fragment_len: Option<u32>,
    fragment: &[u8],
) -> Observation {
    let mut evidence = vec!["pixel data has undefined length (encapsulated)".to_string()];
    if !items_valid {
        evidence.push("encapsulated value does not start with an item tag".to_string());
    }

    if let Some(jpeg) = classify_jpeg(fragment) {
        evidence.extend(jpeg.evidence);
        if jpeg.needs_review {
            evidence.push("JPEG structure incomplete within the window; flag for manual review".to_string());
        }
        return Observation {
            finding: Some(Finding::Pixel(PixelVerdict::Compressed {
                uid: jpeg.uid,
                needs_review: jpeg.needs_review || !items_valid,
            })),
            evidence,
        };
    }

    if fragment.starts_with(&[0xFF, 0x4F]) || fragment.starts_with(&JP2_SIGNATURE_BOX) {
        let j2k = classify_j2k(fragment);
        evidence.extend(j2k.evidence);
        return Observation {
            finding: Some(Finding::Pixel(PixelVerdict::Compressed {
                uid: j2k.uid,
                needs_review: j2k.needs_review || !items_valid,
            })),
            evidence,
        };
    }

    match first_fragment_len {
        None => evidence.push("encapsulated pixel data has no fragments".to_string()),
        Some(_) => match rle_segment_count(fragment) {
            Some(segments) => evidence.push(format!(
                "first fragment carries a valid RLE header with {} segment(s)",
                segments
            )),
            None => evidence.push(format!(
                "first fragment starts {:02X?} with no JPEG or JPEG 2000 marker",
                &fragment[..fragment.len().min(4)]
            )),
        },
    }
    let needs_review = rle_segment_count(fragment).is_none();
    evidence.push("encapsulation without codec markers implies RLE Lossless".to_string());
    Observation {
        finding: Some(Finding::Pixel(PixelVerdict::Compressed {
            uid: RLE_LOSSLESS,
            needs_review,
        })),
        evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_header;
    use crate::sample::SampleLimits;
    use crate::synthetic::{j2k_codestream, jpeg_ls_stream, jpeg_stream, SyntheticContainer};
    use tsfix_common::catalog::{
        JPEG_2000, JPEG_2000_LOSSLESS, JPEG_BASELINE, JPEG_EXTENDED, JPEG_LS_NEAR_LOSSLESS,
    };

    fn run(container: &SyntheticContainer, probe: Probe) -> Observation {
        let header = parse_header(&container.build()).unwrap();
        let sample =
            DatasetSample::from_dataset_bytes(container.dataset(), SampleLimits::default()).unwrap();
        probe(&ProbeInput {
            header: &header,
            sample: &sample,
        })
    }

    fn pixel_uid(observation: &Observation) -> Option<&'static str> {
        match observation.finding {
            Some(Finding::Pixel(PixelVerdict::Compressed { uid, .. })) => Some(uid),
            _ => None,
        }
    }

    #[test]
    fn test_vr_encoding_explicit_and_implicit() {
        let explicit = run(&SyntheticContainer::explicit_le_uncompressed(), vr_encoding_probe);
        assert_eq!(explicit.finding, Some(Finding::VrEncoding(VrEncoding::Explicit)));

        let implicit = run(&SyntheticContainer::implicit_le_uncompressed(), vr_encoding_probe);
        assert_eq!(implicit.finding, Some(Finding::VrEncoding(VrEncoding::Implicit)));
    }

    #[test]
    fn test_byte_order_both_orders() {
        let le = run(&SyntheticContainer::explicit_le_uncompressed(), byte_order_probe);
        assert_eq!(le.finding, Some(Finding::ByteOrder(ByteOrder::Little)));

        let be = run(&SyntheticContainer::explicit_be_uncompressed(), byte_order_probe);
        assert_eq!(be.finding, Some(Finding::ByteOrder(ByteOrder::Big)));

        let implicit = run(&SyntheticContainer::implicit_le_uncompressed(), byte_order_probe);
        assert_eq!(implicit.finding, Some(Finding::ByteOrder(ByteOrder::Little)));
    }

    #[test]
    fn test_structure_score_prefers_true_order() {
        let container = SyntheticContainer::explicit_le_uncompressed();
        let dataset = container.dataset();
        let len = dataset.len() as u64;
        let little = structure_score(dataset, len, true, ByteOrder::Little);
        let big = structure_score(dataset, len, true, ByteOrder::Big);
        assert!(little > big, "little {} should beat big {}", little, big);
    }

    #[test]
    fn test_native_pixel_data() {
        let observation = run(&SyntheticContainer::explicit_le_uncompressed(), pixel_signature_probe);
        assert_eq!(observation.finding, Some(Finding::Pixel(PixelVerdict::Native)));
        assert!(observation.evidence[0].contains("matches"));
    }

    #[test]
    fn test_jpeg_signatures() {
        let baseline = run(&SyntheticContainer::jpeg_baseline(), pixel_signature_probe);
        assert_eq!(pixel_uid(&baseline), Some(JPEG_BASELINE));

        let extended = run(&SyntheticContainer::jpeg_extended(), pixel_signature_probe);
        assert_eq!(pixel_uid(&extended), Some(JPEG_EXTENDED));

        let twelve_bit_sof0 = SyntheticContainer::encapsulated(JPEG_BASELINE, jpeg_stream(0xC0, 12));
        let observation = run(&twelve_bit_sof0, pixel_signature_probe);
        assert_eq!(pixel_uid(&observation), Some(JPEG_EXTENDED));
    }

    #[test]
    fn test_jpeg_ls_near_lossless() {
        let container = SyntheticContainer::encapsulated(JPEG_BASELINE, jpeg_ls_stream(2));
        let observation = run(&container, pixel_signature_probe);
        assert_eq!(pixel_uid(&observation), Some(JPEG_LS_NEAR_LOSSLESS));
    }

    #[test]
    fn test_j2k_signatures() {
        let lossless = run(&SyntheticContainer::jpeg2000(true), pixel_signature_probe);
        assert_eq!(pixel_uid(&lossless), Some(JPEG_2000_LOSSLESS));

        let lossy = run(&SyntheticContainer::jpeg2000(false), pixel_signature_probe);
        assert_eq!(pixel_uid(&lossy), Some(JPEG_2000));

        let mut jp2 = JP2_SIGNATURE_BOX.to_vec();
        jp2.extend_from_slice(&[0x0D, 0x0A, 0x87, 0x0A]);
        jp2.extend(j2k_codestream(true, false));
        let boxed = run(&SyntheticContainer::encapsulated(JPEG_2000, jp2), pixel_signature_probe);
        assert_eq!(pixel_uid(&boxed), Some(JPEG_2000_LOSSLESS));
    }

    #[test]
    fn test_rle_signature() {
        let observation = run(&SyntheticContainer::rle(), pixel_signature_probe);
        assert_eq!(
            observation.finding,
            Some(Finding::Pixel(PixelVerdict::Compressed {
                uid: RLE_LOSSLESS,
                needs_review: false
            }))
        );
    }

    #[test]
    fn test_unknown_fragment_defaults_to_rle_with_review() {
        let container = SyntheticContainer::encapsulated(RLE_LOSSLESS, vec![0x11; 32]);
        let observation = run(&container, pixel_signature_probe);
        assert_eq!(
            observation.finding,
            Some(Finding::Pixel(PixelVerdict::Compressed {
                uid: RLE_LOSSLESS,
                needs_review: true
            }))
        );
    }

    #[test]
    fn test_empty_dataset_observations() {
        let container = SyntheticContainer::explicit_le_uncompressed().with_dataset(Vec::new());
        assert!(run(&container, vr_encoding_probe).finding.is_none());
        assert!(run(&container, byte_order_probe).finding.is_none());
        assert_eq!(
            run(&container, pixel_signature_probe).finding,
            Some(Finding::Pixel(PixelVerdict::Inconclusive))
        );
    }
}
