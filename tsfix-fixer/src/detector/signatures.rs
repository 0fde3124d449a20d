//! Codec signature parsers for JPEG, JPEG-LS, JPEG 2000 and RLE
//!
//! Marker segments are walked only as far as needed to tell the processes
//! apart; entropy-coded data is never touched.

use crate::element::{read_be_u16, read_u32};
use tsfix_common::catalog::{
    JPEG_2000, JPEG_2000_LOSSLESS, JPEG_2000_PART2, JPEG_2000_PART2_LOSSLESS, JPEG_BASELINE,
    JPEG_EXTENDED, JPEG_LOSSLESS_SV1, JPEG_LS_LOSSLESS, JPEG_LS_NEAR_LOSSLESS,
};
use tsfix_common::ByteOrder;

const SOI: [u8; 2] = [0xFF, 0xD8];
const SOF55: u8 = 0xF7;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;

/// JPEG 2000 codestream start: SOC followed by SIZ
const J2K_CODESTREAM: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];
/// JP2 file-format signature box header
pub const JP2_SIGNATURE_BOX: [u8; 8] = [0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20];

const COD: u8 = 0x52;
const SOT: u8 = 0x90;
const SOD: u8 = 0x93;

/// A recognized codec stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub uid: &'static str,
    pub needs_review: bool,
    pub evidence: Vec<String>,
}

fn is_sof(marker: u8) -> bool {
    (matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)) || marker == SOF55
}

/// Identify a JPEG-family stream (DCT, lossless or JPEG-LS) by its frame header
pub fn classify_jpeg(bytes: &[u8]) -> Option<Signature> {
    if !bytes.starts_with(&SOI) {
        return None;
    }

    let mut i = 2usize;
    let mut sof: Option<(u8, Option<u8>)> = None;
    let mut near: Option<u8> = None;
    let mut complete = false;

    while i + 1 < bytes.len() {
        if bytes[i] != 0xFF {
            break;
        }
        let marker = bytes[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        if marker == EOI {
            complete = true;
            break;
        }
        if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
            i += 2;
            continue;
        }
        let Some(length) = read_be_u16(bytes, i + 2) else {
            break;
        };
        if length < 2 {
            break;
        }
        if is_sof(marker) {
            sof = Some((marker, bytes.get(i + 4).copied()));
        }
        if marker == SOS {
            if let Some(&components) = bytes.get(i + 4) {
                near = bytes.get(i + 5 + 2 * components as usize).copied();
            }
            complete = true;
            break;
        }
        i += 2 + length as usize;
    }

    let mut evidence = vec!["fragment starts with JPEG SOI marker FFD8".to_string()];
    let Some((marker, precision)) = sof else {
        evidence.push("no frame header within the window; assuming JPEG Baseline".to_string());
        return Some(Signature {
            uid: JPEG_BASELINE,
            needs_review: true,
            evidence,
        });
    };

    let precision_note = precision
        .map(|p| format!("{}-bit", p))
        .unwrap_or_else(|| "unknown-precision".to_string());
    let (uid, needs_review) = match marker {
        0xC0 if precision == Some(8) => (JPEG_BASELINE, false),
        0xC0 => (JPEG_EXTENDED, precision.is_none()),
        0xC1 | 0xC2 => (JPEG_EXTENDED, false),
        0xC3 => (JPEG_LOSSLESS_SV1, false),
        0xC7 | 0xCB | 0xCF => (JPEG_LOSSLESS_SV1, true),
        SOF55 => match near {
            Some(0) => (JPEG_LS_LOSSLESS, false),
            Some(_) => (JPEG_LS_NEAR_LOSSLESS, false),
            None => (JPEG_LS_LOSSLESS, true),
        },
        _ => (JPEG_EXTENDED, true),
    };

    evidence.push(format!(
        "frame header SOF marker FF{:02X} with {} precision",
        marker, precision_note
    ));
    if marker == SOF55 {
        match near {
            Some(n) => evidence.push(format!("JPEG-LS scan NEAR parameter is {}", n)),
            None => evidence.push("JPEG-LS scan header not within the window".to_string()),
        }
    }
    if !complete {
        evidence.push("marker segments run past the sampled window".to_string());
    }

    Some(Signature {
        uid,
        needs_review,
        evidence,
    })
}

/// Identify a JPEG 2000 codestream (raw or inside a JP2 wrapper)
pub fn classify_j2k(bytes: &[u8]) -> Signature {
    let mut evidence = Vec::new();
    if bytes.starts_with(&JP2_SIGNATURE_BOX) {
        evidence.push("fragment starts with the JP2 signature box".to_string());
    }

    let Some(start) = bytes
        .windows(J2K_CODESTREAM.len())
        .position(|w| w == J2K_CODESTREAM)
    else {
        evidence.push("no SOC/SIZ codestream header within the window".to_string());
        return Signature {
            uid: JPEG_2000,
            needs_review: true,
            evidence,
        };
    };
    evidence.push(format!("JPEG 2000 SOC+SIZ markers at fragment offset {}", start));

    let rsiz = read_be_u16(bytes, start + 6).unwrap_or(0);
    let part2 = rsiz & 0x8000 != 0;
    if part2 {
        evidence.push(format!("SIZ capabilities 0x{:04X} declare Part 2 extensions", rsiz));
    }

    let mut transform: Option<u8> = None;
    let mut i = start + 4 + read_be_u16(bytes, start + 4).unwrap_or(0) as usize;
    while i + 3 < bytes.len() && bytes[i] == 0xFF {
        let marker = bytes[i + 1];
        if matches!(marker, SOT | SOD | EOI) {
            break;
        }
        if marker == COD {
            transform = bytes.get(i + 13).copied();
            break;
        }
        match read_be_u16(bytes, i + 2) {
            Some(length) if length >= 2 => i += 2 + length as usize,
            _ => break,
        }
    }

    let reversible = match transform {
        Some(1) => {
            evidence.push("COD selects the reversible 5/3 wavelet".to_string());
            Some(true)
        }
        Some(0) => {
            evidence.push("COD selects the irreversible 9/7 wavelet".to_string());
            Some(false)
        }
        Some(other) => {
            evidence.push(format!("COD transform value {} is not standard", other));
            None
        }
        None => {
            evidence.push("COD marker not within the window".to_string());
            None
        }
    };

    let uid = match (part2, reversible.unwrap_or(false)) {
        (false, true) => JPEG_2000_LOSSLESS,
        (false, false) => JPEG_2000,
        (true, true) => JPEG_2000_PART2_LOSSLESS,
        (true, false) => JPEG_2000_PART2,
    };
    Signature {
        uid,
        needs_review: reversible.is_none(),
        evidence,
    }
}

/// Segment count of a valid RLE header: 1..=15 segments, the first at
/// offset 64, later offsets strictly increasing
pub fn rle_segment_count(fragment: &[u8]) -> Option<u32> {
    if fragment.len() < 64 {
        return None;
    }
    let segments = read_u32(fragment, 0, ByteOrder::Little)?;
    if !(1..=15).contains(&segments) {
        return None;
    }
    let mut previous = read_u32(fragment, 4, ByteOrder::Little)?;
    if previous != 64 {
        return None;
    }
    for index in 1..segments as usize {
        let offset = read_u32(fragment, 4 + index * 4, ByteOrder::Little)?;
        if offset <= previous {
            return None;
        }
        previous = offset;
    }
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{j2k_codestream, jpeg_ls_stream, jpeg_stream, rle_fragment};

    #[test]
    fn test_jpeg_processes() {
        assert_eq!(classify_jpeg(&jpeg_stream(0xC0, 8)).unwrap().uid, JPEG_BASELINE);
        assert_eq!(classify_jpeg(&jpeg_stream(0xC1, 12)).unwrap().uid, JPEG_EXTENDED);
        assert_eq!(classify_jpeg(&jpeg_stream(0xC2, 8)).unwrap().uid, JPEG_EXTENDED);
        assert_eq!(classify_jpeg(&jpeg_stream(0xC3, 16)).unwrap().uid, JPEG_LOSSLESS_SV1);
        assert!(classify_jpeg(&[0x00, 0x01]).is_none());
    }

    #[test]
    fn test_jpeg_ls_near_parameter() {
        assert_eq!(classify_jpeg(&jpeg_ls_stream(0)).unwrap().uid, JPEG_LS_LOSSLESS);
        assert_eq!(classify_jpeg(&jpeg_ls_stream(3)).unwrap().uid, JPEG_LS_NEAR_LOSSLESS);
    }

    #[test]
    fn test_truncated_jpeg_needs_review() {
        let stream = jpeg_stream(0xC0, 8);
        let signature = classify_jpeg(&stream[..10]).unwrap();
        assert_eq!(signature.uid, JPEG_BASELINE);
        assert!(signature.needs_review);
    }

    #[test]
    fn test_j2k_variants() {
        assert_eq!(classify_j2k(&j2k_codestream(true, false)).uid, JPEG_2000_LOSSLESS);
        assert_eq!(classify_j2k(&j2k_codestream(false, false)).uid, JPEG_2000);
        assert_eq!(classify_j2k(&j2k_codestream(true, true)).uid, JPEG_2000_PART2_LOSSLESS);
        assert_eq!(classify_j2k(&j2k_codestream(false, true)).uid, JPEG_2000_PART2);
        assert!(!classify_j2k(&j2k_codestream(true, false)).needs_review);
    }

    #[test]
    fn test_j2k_without_cod_needs_review() {
        let stream = j2k_codestream(true, false);
        // SOC + SIZ only
        let signature = classify_j2k(&stream[..2 + 2 + 41]);
        assert_eq!(signature.uid, JPEG_2000);
        assert!(signature.needs_review);
    }

    #[test]
    fn test_rle_header() {
        assert_eq!(rle_segment_count(&rle_fragment()), Some(1));

        let mut three = vec![0u8; 80];
        three[0..4].copy_from_slice(&3u32.to_le_bytes());
        three[4..8].copy_from_slice(&64u32.to_le_bytes());
        three[8..12].copy_from_slice(&70u32.to_le_bytes());
        three[12..16].copy_from_slice(&76u32.to_le_bytes());
        assert_eq!(rle_segment_count(&three), Some(3));

        three[12..16].copy_from_slice(&70u32.to_le_bytes());
        assert_eq!(rle_segment_count(&three), None);
        assert_eq!(rle_segment_count(&[0u8; 63]), None);
    }
}
