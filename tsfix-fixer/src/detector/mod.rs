//! Heuristic Detector
//!
//! Infers the true Transfer Syntax of a dataset from its bytes, cross-checks
//! any declared UID, and reports a confidence level with the evidence used.
//!
//! Decision order:
//! 1. A compression signature in the pixel data decides the syntax outright
//! 2. Otherwise the VR layout and byte order pick an uncompressed syntax
//! 3. If neither gives a verdict, the catalog default is returned with
//!    [`Confidence::HeuristicFallback`]
//!
//! A declared UID found in the catalog wins unless a signature contradicts it.
//! Contradictions are reported as conflicts and never corrected silently.

pub mod probes;
pub mod signatures;

use crate::header::ContainerHeader;
use crate::sample::DatasetSample;
use probes::{Finding, PixelVerdict, ProbeInput, VrEncoding, PROBE_CHAIN};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::trace;
use tsfix_common::catalog::normalize_uid;
use tsfix_common::{ByteOrder, SyntaxCatalog, SyntaxDescriptor};

/// How the reported UID was arrived at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Confidence {
    /// Declared UID present, in the catalog, and not contradicted
    Declared,
    /// A structural signature decided the UID (or contradicted the declaration)
    HeuristicStrong,
    /// Nothing matched; catalog default returned
    HeuristicFallback,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Confidence::Declared => "declared",
            Confidence::HeuristicStrong => "heuristic-strong",
            Confidence::HeuristicFallback => "heuristic-fallback",
        };
        f.write_str(text)
    }
}

/// Detector output for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    pub detected_uid: String,
    pub confidence: Confidence,
    /// UID the signatures point at when it contradicts the declared one
    pub conflict: Option<String>,
    pub evidence: Vec<String>,
}

/// Internal detection failure, resolved to the default syntax
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("No structural signature matched: {0}")]
    AmbiguousSignature(String),
}

/// Findings gathered from the probe chain
#[derive(Debug, Default)]
struct Findings {
    vr: Option<VrEncoding>,
    order: Option<ByteOrder>,
    pixel: Option<PixelVerdict>,
}

/// Transfer Syntax detector over a shared catalog
pub struct Detector<'a> {
    catalog: &'a SyntaxCatalog,
}

impl<'a> Detector<'a> {
    pub fn new(catalog: &'a SyntaxCatalog) -> Self {
        Self { catalog }
    }

    /// Determine the Transfer Syntax of one file.
    ///
    /// Always returns a catalog UID.
    pub fn detect(&self, header: &ContainerHeader, sample: &DatasetSample) -> DetectionResult {
        let mut evidence = header.observations();
        let inferred = self.infer(header, sample, &mut evidence);
        let declared = normalize_uid(&header.declared_syntax_uid);

        if !declared.is_empty() {
            match self.catalog.lookup(declared) {
                Some(descriptor) => {
                    return self.cross_check(descriptor, inferred, evidence);
                }
                None => evidence.push(format!(
                    "declared UID '{}' is not in the catalog; using inferred syntax",
                    declared
                )),
            }
        } else {
            evidence.push("no Transfer Syntax UID declared".to_string());
        }

        match inferred {
            Ok(descriptor) => DetectionResult {
                detected_uid: descriptor.uid.to_string(),
                confidence: Confidence::HeuristicStrong,
                conflict: None,
                evidence,
            },
            Err(err) => {
                let default = self.catalog.default_syntax();
                evidence.push(err.to_string());
                evidence.push(format!("defaulting to {}", default));
                DetectionResult {
                    detected_uid: default.uid.to_string(),
                    confidence: Confidence::HeuristicFallback,
                    conflict: None,
                    evidence,
                }
            }
        }
    }

    fn cross_check(
        &self,
        declared: &'a SyntaxDescriptor,
        inferred: Result<&'a SyntaxDescriptor, DetectError>,
        mut evidence: Vec<String>,
    ) -> DetectionResult {
        match inferred {
            Ok(signature) if !declared.is_compatible_with(signature) => {
                evidence.push(format!(
                    "declared {} contradicts dataset signature {}; reported, not corrected",
                    declared, signature
                ));
                DetectionResult {
                    detected_uid: declared.uid.to_string(),
                    confidence: Confidence::HeuristicStrong,
                    conflict: Some(signature.uid.to_string()),
                    evidence,
                }
            }
            Ok(signature) => {
                if signature.uid == declared.uid {
                    evidence.push(format!("declared {} agrees with the dataset", declared));
                } else {
                    evidence.push(format!(
                        "declared {} is compatible with signature {}",
                        declared, signature.uid
                    ));
                }
                DetectionResult {
                    detected_uid: declared.uid.to_string(),
                    confidence: Confidence::Declared,
                    conflict: None,
                    evidence,
                }
            }
            Err(err) => {
                evidence.push(format!("declared {} not cross-checked: {}", declared, err));
                DetectionResult {
                    detected_uid: declared.uid.to_string(),
                    confidence: Confidence::Declared,
                    conflict: None,
                    evidence,
                }
            }
        }
    }

    /// Run the probe chain and map its findings to a catalog descriptor
    fn infer(
        &self,
        header: &ContainerHeader,
        sample: &DatasetSample,
        evidence: &mut Vec<String>,
    ) -> Result<&'a SyntaxDescriptor, DetectError> {
        let input = ProbeInput { header, sample };
        let mut findings = Findings::default();

        for (name, probe) in PROBE_CHAIN {
            let observation = probe(&input);
            trace!(probe = name, finding = ?observation.finding, "Probe evaluated");
            evidence.extend(observation.evidence);
            match observation.finding {
                Some(Finding::VrEncoding(vr)) => findings.vr = Some(vr),
                Some(Finding::ByteOrder(order)) => findings.order = Some(order),
                Some(Finding::Pixel(verdict)) => findings.pixel = Some(verdict),
                None => {}
            }
        }

        if let Some(PixelVerdict::Compressed { uid, needs_review }) = findings.pixel {
            let descriptor = self.catalog.lookup(uid).ok_or_else(|| {
                DetectError::AmbiguousSignature(format!("signature {} is not in the catalog", uid))
            })?;
            if findings.vr == Some(VrEncoding::Implicit) {
                evidence.push(
                    "implicit VR layout conflicts with encapsulated pixel data; trusting the signature"
                        .to_string(),
                );
            }
            if findings.order == Some(ByteOrder::Big) {
                evidence.push(
                    "big endian layout conflicts with encapsulated pixel data; trusting the signature"
                        .to_string(),
                );
            }
            if needs_review {
                evidence.push(format!("{} chosen with reservations; review manually", uid));
            }
            return Ok(descriptor);
        }

        let (vr, order) = match (findings.vr, findings.order) {
            (Some(vr), Some(order)) => (vr, order),
            _ => {
                return Err(DetectError::AmbiguousSignature(
                    "dataset layout undetermined and no compression signature".to_string(),
                ))
            }
        };

        self.catalog
            .uncompressed(vr == VrEncoding::Explicit, order)
            .ok_or_else(|| {
                DetectError::AmbiguousSignature(format!(
                    "{:?} VR with {:?} endian matches no public syntax",
                    vr, order
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_header;
    use crate::sample::SampleLimits;
    use crate::element::Tag;
    use crate::synthetic::{DatasetWriter, SyntheticContainer, DEFAULT_STUDY_UID};
    use tsfix_common::ByteOrder;
    use tsfix_common::catalog::{
        EXPLICIT_VR_BIG_ENDIAN, EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN,
        JPEG_2000_LOSSLESS, JPEG_BASELINE, JPEG_EXTENDED, RLE_LOSSLESS,
    };

    fn detect(container: &SyntheticContainer) -> DetectionResult {
        let header = parse_header(&container.build()).unwrap();
        let sample =
            DatasetSample::from_dataset_bytes(container.dataset(), SampleLimits::default()).unwrap();
        Detector::new(SyntaxCatalog::global()).detect(&header, &sample)
    }

    #[test]
    fn test_missing_declaration_inferred_per_family() {
        let cases = [
            (SyntheticContainer::explicit_le_uncompressed(), EXPLICIT_VR_LITTLE_ENDIAN),
            (SyntheticContainer::implicit_le_uncompressed(), IMPLICIT_VR_LITTLE_ENDIAN),
            (SyntheticContainer::explicit_be_uncompressed(), EXPLICIT_VR_BIG_ENDIAN),
            (SyntheticContainer::jpeg_baseline(), JPEG_BASELINE),
            (SyntheticContainer::jpeg_extended(), JPEG_EXTENDED),
            (SyntheticContainer::jpeg2000(true), JPEG_2000_LOSSLESS),
            (SyntheticContainer::rle(), RLE_LOSSLESS),
        ];
        for (container, expected) in cases {
            let result = detect(&container.without_declared_syntax());
            assert_eq!(result.detected_uid, expected);
            assert_eq!(result.confidence, Confidence::HeuristicStrong);
            assert!(result.conflict.is_none());
        }
    }

    #[test]
    fn test_declared_and_agreeing() {
        let result = detect(&SyntheticContainer::jpeg2000(true));
        assert_eq!(result.detected_uid, JPEG_2000_LOSSLESS);
        assert_eq!(result.confidence, Confidence::Declared);
        assert!(result.conflict.is_none());
    }

    #[test]
    fn test_baseline_stream_under_extended_declaration_is_compatible() {
        let container = SyntheticContainer::jpeg_baseline().with_declared_syntax(JPEG_EXTENDED);
        let result = detect(&container);
        assert_eq!(result.detected_uid, JPEG_EXTENDED);
        assert_eq!(result.confidence, Confidence::Declared);
    }

    #[test]
    fn test_conflicting_declaration_is_reported_not_corrected() {
        let container =
            SyntheticContainer::jpeg_baseline().with_declared_syntax(EXPLICIT_VR_LITTLE_ENDIAN);
        let result = detect(&container);
        assert_eq!(result.detected_uid, EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(result.confidence, Confidence::HeuristicStrong);
        assert_eq!(result.conflict.as_deref(), Some(JPEG_BASELINE));
    }

    #[test]
    fn test_empty_dataset_falls_back_to_default() {
        let container = SyntheticContainer::explicit_le_uncompressed()
            .without_declared_syntax()
            .with_dataset(Vec::new());
        let result = detect(&container);
        assert_eq!(result.detected_uid, IMPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(result.confidence, Confidence::HeuristicFallback);

        // Deterministic across calls
        assert_eq!(detect(&container), result);
    }

    /// 4x4 8-bit explicit little endian image with a zero-length pixel data element
    fn empty_pixel_data(declared: Option<&str>) -> SyntheticContainer {
        let dataset = DatasetWriter::new(true, ByteOrder::Little)
            .string(Tag::STUDY_INSTANCE_UID, b"UI", DEFAULT_STUDY_UID)
            .us(Tag::SAMPLES_PER_PIXEL, 1)
            .us(Tag::ROWS, 4)
            .us(Tag::COLUMNS, 4)
            .us(Tag::BITS_ALLOCATED, 8)
            .element(Tag::PIXEL_DATA, b"OB", &[])
            .finish();
        let container = SyntheticContainer::new("", dataset);
        match declared {
            Some(uid) => container.with_declared_syntax(uid),
            None => container.without_declared_syntax(),
        }
    }

    #[test]
    fn test_empty_pixel_data_is_native() {
        let result = detect(&empty_pixel_data(None));
        assert_eq!(result.detected_uid, EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(result.confidence, Confidence::HeuristicStrong);
        assert!(result.conflict.is_none());
        assert!(result
            .evidence
            .iter()
            .any(|line| line.contains("pixel data is empty")));
    }

    #[test]
    fn test_empty_pixel_data_agrees_with_native_declaration() {
        let result = detect(&empty_pixel_data(Some(EXPLICIT_VR_LITTLE_ENDIAN)));
        assert_eq!(result.detected_uid, EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(result.confidence, Confidence::Declared);
        assert!(result.conflict.is_none());
    }

    #[test]
    fn test_unknown_declared_uid_uses_inferred_syntax() {
        let container = SyntheticContainer::explicit_le_uncompressed()
            .with_declared_syntax("1.2.3.4.5.999");
        let result = detect(&container);
        assert_eq!(result.detected_uid, EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(result.confidence, Confidence::HeuristicStrong);
        assert!(result
            .evidence
            .iter()
            .any(|line| line.contains("not in the catalog")));
    }

    #[test]
    fn test_padded_declared_uid_is_normalized() {
        let container = SyntheticContainer::explicit_le_uncompressed()
            .with_declared_syntax("1.2.840.10008.1.2.1 ");
        let result = detect(&container);
        assert_eq!(result.detected_uid, EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(result.confidence, Confidence::Declared);
    }
}
