//! # tsfix Fixer
//!
//! Detects the real Transfer Syntax of DICOM files whose declaration is
//! missing, blank or wrong, and rewrites only the declaration.
//!
//! Per-file flow: [`header`] → [`sample`] → [`detector`] → [`repair`];
//! [`pipeline`] runs that flow over a directory tree found by [`scanner`].
//! `synthetic` builds reference containers for tests; it is compiled only
//! for this crate's tests or with the `test-fixtures` feature.

pub mod detector;
pub mod element;
pub mod header;
pub mod pipeline;
pub mod repair;
pub mod sample;
pub mod scanner;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod synthetic;

pub use detector::{Confidence, DetectionResult, Detector};
pub use header::{read_header, ContainerHeader, HeaderError};
pub use pipeline::{BatchPipeline, FileOutcome, OutcomeStatus, PipelineError, PipelineOptions, RunReport, RunSummary};
pub use repair::{RepairError, RepairOutcome, Repairer};
pub use sample::{sample_dataset, DatasetSample, SampleLimits};
