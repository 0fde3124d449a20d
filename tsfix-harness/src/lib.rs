//! # tsfix Validation Harness
//!
//! Measures how well the fixer recovers Transfer Syntax declarations:
//! reference archives with known-correct declarations are fetched, unpacked,
//! stripped of their declaration and repaired, and the recovered UIDs are
//! compared with the originals.
//!
//! Collaborators sit behind traits (`ArchiveFetcher`, `ArchiveExtractor`,
//! `ReportRenderer`) so runs can be driven without network access.

pub mod corrupt;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod listing;
pub mod report;
pub mod validate;

pub use error::{ExtractError, FetchError, HarnessError};
pub use extract::{ArchiveExtractor, StandardExtractor};
pub use fetch::{ArchiveFetcher, HttpFetcher};
pub use listing::{discover_archives, discover_from_index};
pub use report::{HtmlRenderer, ReportPaths, ReportRenderer};
pub use validate::{ArchiveResult, HarnessOptions, HarnessRecord, ValidationHarness, ValidationRun};
