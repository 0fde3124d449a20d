//! Syntax Catalog
//!
//! Read-only registry of the public Transfer Syntaxes the fixer understands.
//! The registry is built once on first use and shared by reference with every
//! component that needs lookups.
//!
//! # Usage
//!
//! ```rust
//! use tsfix_common::catalog::{SyntaxCatalog, EXPLICIT_VR_LITTLE_ENDIAN};
//!
//! let catalog = SyntaxCatalog::global();
//! let descriptor = catalog.lookup(EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
//! assert!(descriptor.vr_explicit);
//! assert_eq!(catalog.default_syntax().uid, "1.2.840.10008.1.2");
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
pub const JPEG_EXTENDED: &str = "1.2.840.10008.1.2.4.51";
pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";
pub const JPEG_LS_LOSSLESS: &str = "1.2.840.10008.1.2.4.80";
pub const JPEG_LS_NEAR_LOSSLESS: &str = "1.2.840.10008.1.2.4.81";
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
pub const JPEG_2000: &str = "1.2.840.10008.1.2.4.91";
pub const JPEG_2000_PART2_LOSSLESS: &str = "1.2.840.10008.1.2.4.92";
pub const JPEG_2000_PART2: &str = "1.2.840.10008.1.2.4.93";
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";

/// Byte order of the dataset encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

/// Compression family of a Transfer Syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompressionFamily {
    Uncompressed,
    JPEGBaseline,
    JPEGExtended,
    JPEG2000,
    RLELossless,
    Other,
}

impl fmt::Display for CompressionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionFamily::Uncompressed => "Uncompressed",
            CompressionFamily::JPEGBaseline => "JPEG Baseline",
            CompressionFamily::JPEGExtended => "JPEG Extended",
            CompressionFamily::JPEG2000 => "JPEG 2000",
            CompressionFamily::RLELossless => "RLE Lossless",
            CompressionFamily::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Structural properties of one Transfer Syntax
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxDescriptor {
    pub uid: &'static str,
    pub name: &'static str,
    pub vr_explicit: bool,
    pub byte_order: ByteOrder,
    pub family: CompressionFamily,
}

impl SyntaxDescriptor {
    const fn new(
        uid: &'static str,
        name: &'static str,
        vr_explicit: bool,
        byte_order: ByteOrder,
        family: CompressionFamily,
    ) -> Self {
        Self {
            uid,
            name,
            vr_explicit,
            byte_order,
            family,
        }
    }

    /// True when both descriptors describe the same dataset encoding.
    ///
    /// A Baseline stream is valid under a declared Extended syntax, so that
    /// pairing is treated as compatible.
    pub fn is_compatible_with(&self, other: &SyntaxDescriptor) -> bool {
        if self.vr_explicit != other.vr_explicit || self.byte_order != other.byte_order {
            return false;
        }
        match (self.family, other.family) {
            (a, b) if a == b => true,
            (CompressionFamily::JPEGExtended, CompressionFamily::JPEGBaseline) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyntaxDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uid, self.name)
    }
}

const KNOWN_SYNTAXES: [SyntaxDescriptor; 13] = [
    SyntaxDescriptor::new(
        IMPLICIT_VR_LITTLE_ENDIAN,
        "Implicit VR Little Endian",
        false,
        ByteOrder::Little,
        CompressionFamily::Uncompressed,
    ),
    SyntaxDescriptor::new(
        EXPLICIT_VR_LITTLE_ENDIAN,
        "Explicit VR Little Endian",
        true,
        ByteOrder::Little,
        CompressionFamily::Uncompressed,
    ),
    SyntaxDescriptor::new(
        EXPLICIT_VR_BIG_ENDIAN,
        "Explicit VR Big Endian",
        true,
        ByteOrder::Big,
        CompressionFamily::Uncompressed,
    ),
    SyntaxDescriptor::new(
        JPEG_BASELINE,
        "JPEG Baseline (Process 1)",
        true,
        ByteOrder::Little,
        CompressionFamily::JPEGBaseline,
    ),
    SyntaxDescriptor::new(
        JPEG_EXTENDED,
        "JPEG Extended (Process 2 & 4)",
        true,
        ByteOrder::Little,
        CompressionFamily::JPEGExtended,
    ),
    SyntaxDescriptor::new(
        JPEG_LOSSLESS_SV1,
        "JPEG Lossless, Non-Hierarchical, First-Order Prediction (Process 14)",
        true,
        ByteOrder::Little,
        CompressionFamily::Other,
    ),
    SyntaxDescriptor::new(
        JPEG_LS_LOSSLESS,
        "JPEG-LS Lossless Image Compression",
        true,
        ByteOrder::Little,
        CompressionFamily::Other,
    ),
    SyntaxDescriptor::new(
        JPEG_LS_NEAR_LOSSLESS,
        "JPEG-LS Lossy (Near-Lossless) Image Compression",
        true,
        ByteOrder::Little,
        CompressionFamily::Other,
    ),
    SyntaxDescriptor::new(
        JPEG_2000_LOSSLESS,
        "JPEG 2000 Image Compression (Lossless Only)",
        true,
        ByteOrder::Little,
        CompressionFamily::JPEG2000,
    ),
    SyntaxDescriptor::new(
        JPEG_2000,
        "JPEG 2000 Image Compression",
        true,
        ByteOrder::Little,
        CompressionFamily::JPEG2000,
    ),
    SyntaxDescriptor::new(
        JPEG_2000_PART2_LOSSLESS,
        "JPEG 2000 Part 2 Multi-component Image Compression (Lossless Only)",
        true,
        ByteOrder::Little,
        CompressionFamily::JPEG2000,
    ),
    SyntaxDescriptor::new(
        JPEG_2000_PART2,
        "JPEG 2000 Part 2 Multi-component Image Compression",
        true,
        ByteOrder::Little,
        CompressionFamily::JPEG2000,
    ),
    SyntaxDescriptor::new(
        RLE_LOSSLESS,
        "RLE Lossless",
        true,
        ByteOrder::Little,
        CompressionFamily::RLELossless,
    ),
];

static CATALOG: Lazy<SyntaxCatalog> = Lazy::new(|| SyntaxCatalog::from_descriptors(&KNOWN_SYNTAXES));

/// Registry of known Transfer Syntaxes keyed by UID
#[derive(Debug)]
pub struct SyntaxCatalog {
    by_uid: BTreeMap<&'static str, SyntaxDescriptor>,
}

impl SyntaxCatalog {
    /// Process-wide catalog, initialized on first access and never mutated
    pub fn global() -> &'static SyntaxCatalog {
        &CATALOG
    }

    fn from_descriptors(descriptors: &[SyntaxDescriptor]) -> Self {
        let by_uid = descriptors
            .iter()
            .map(|descriptor| (descriptor.uid, descriptor.clone()))
            .collect();
        Self { by_uid }
    }

    /// Look up a descriptor by UID.
    ///
    /// Trailing NUL and space padding (as stored in UI elements) is ignored.
    pub fn lookup(&self, uid: &str) -> Option<&SyntaxDescriptor> {
        self.by_uid.get(normalize_uid(uid))
    }

    /// Implicit VR Little Endian: the conservative fallback every reader must accept
    pub fn default_syntax(&self) -> &SyntaxDescriptor {
        &self.by_uid[IMPLICIT_VR_LITTLE_ENDIAN]
    }

    /// Uncompressed syntax with the given VR explicitness and byte order, if one exists
    pub fn uncompressed(&self, vr_explicit: bool, byte_order: ByteOrder) -> Option<&SyntaxDescriptor> {
        self.by_uid.values().find(|d| {
            d.family == CompressionFamily::Uncompressed
                && d.vr_explicit == vr_explicit
                && d.byte_order == byte_order
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyntaxDescriptor> {
        self.by_uid.values()
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }
}

/// Strip UI value padding (trailing NUL or space) and surrounding whitespace
pub fn normalize_uid(uid: &str) -> &str {
    uid.trim_end_matches(&['\0', ' '][..]).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_holds_all_known_syntaxes() {
        let catalog = SyntaxCatalog::global();
        assert_eq!(catalog.len(), 13);
        for descriptor in KNOWN_SYNTAXES.iter() {
            assert_eq!(catalog.lookup(descriptor.uid), Some(descriptor));
        }
    }

    #[test]
    fn test_default_is_implicit_little_endian_uncompressed() {
        let default = SyntaxCatalog::global().default_syntax();
        assert_eq!(default.uid, IMPLICIT_VR_LITTLE_ENDIAN);
        assert!(!default.vr_explicit);
        assert_eq!(default.byte_order, ByteOrder::Little);
        assert_eq!(default.family, CompressionFamily::Uncompressed);
    }

    #[test]
    fn test_lookup_ignores_ui_padding() {
        let catalog = SyntaxCatalog::global();
        assert!(catalog.lookup("1.2.840.10008.1.2.1\0").is_some());
        assert!(catalog.lookup("1.2.840.10008.1.2.5 ").is_some());
        assert!(catalog.lookup("").is_none());
        assert!(catalog.lookup("1.2.3.4").is_none());
    }

    #[test]
    fn test_uncompressed_by_structure() {
        let catalog = SyntaxCatalog::global();
        assert_eq!(
            catalog.uncompressed(true, ByteOrder::Big).map(|d| d.uid),
            Some(EXPLICIT_VR_BIG_ENDIAN)
        );
        assert_eq!(
            catalog.uncompressed(false, ByteOrder::Little).map(|d| d.uid),
            Some(IMPLICIT_VR_LITTLE_ENDIAN)
        );
        // Implicit VR Big Endian was never a public syntax
        assert!(catalog.uncompressed(false, ByteOrder::Big).is_none());
    }

    #[test]
    fn test_compatibility() {
        let catalog = SyntaxCatalog::global();
        let baseline = catalog.lookup(JPEG_BASELINE).unwrap();
        let extended = catalog.lookup(JPEG_EXTENDED).unwrap();
        let explicit = catalog.lookup(EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let j2k = catalog.lookup(JPEG_2000).unwrap();
        let j2k_lossless = catalog.lookup(JPEG_2000_LOSSLESS).unwrap();

        assert!(extended.is_compatible_with(baseline));
        assert!(!baseline.is_compatible_with(extended));
        assert!(!explicit.is_compatible_with(baseline));
        assert!(j2k.is_compatible_with(j2k_lossless));
    }
}
