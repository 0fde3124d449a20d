//! Batch Pipeline
//!
//! Walks a directory tree and runs header read → sample → detect → repair on
//! every regular file. Files are independent, so they are processed on a
//! bounded rayon pool; the summary is a fold over the finished outcomes,
//! computed once after all files are done.

use crate::detector::{Confidence, Detector};
use crate::header::{read_header, HeaderError};
use crate::repair::{RepairOutcome, Repairer};
use crate::sample::{sample_dataset, SampleLimits};
use crate::scanner::{FileScanner, ScanError};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tsfix_common::config::FixerConfig;
use tsfix_common::{CompressionFamily, SyntaxCatalog};

/// Errors that abort a whole run (configuration problems only)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid root directory: {0}")]
    InvalidRoot(#[from] ScanError),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(String),
}

/// Per-run options
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Detect and report without writing
    pub dry_run: bool,
    /// Log every evidence line at info instead of debug
    pub verbose_evidence: bool,
    /// Worker threads; None uses one per CPU
    pub workers: Option<usize>,
    pub limits: SampleLimits,
}

impl From<&FixerConfig> for PipelineOptions {
    fn from(config: &FixerConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            verbose_evidence: config.verbose_evidence,
            workers: config.workers,
            limits: SampleLimits::from(config),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutcomeStatus {
    /// Declaration already correct; nothing written
    Unchanged,
    /// Declaration rewritten
    Repaired,
    /// Dry run: a rewrite would have happened
    WouldRepair,
    /// Header, sampling or write failure; the file was not modified
    Failed,
    /// Not a container; never parsed
    Skipped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of processing one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub study_instance_uid: Option<String>,
    /// Declared UID as read (empty string when blank or absent)
    pub before_uid: Option<String>,
    /// Declared UID of the deliberately cleared copy; harness only
    pub during_uid: Option<String>,
    /// Catalog UID the file declares after processing
    pub after_uid: Option<String>,
    pub status: OutcomeStatus,
    pub confidence: Option<Confidence>,
    pub conflict: Option<String>,
    pub evidence: Vec<String>,
}

impl FileOutcome {
    fn skipped(path: &Path, reason: String) -> Self {
        Self {
            path: path.to_path_buf(),
            study_instance_uid: None,
            before_uid: None,
            during_uid: None,
            after_uid: None,
            status: OutcomeStatus::Skipped,
            confidence: None,
            conflict: None,
            evidence: vec![reason],
        }
    }

    fn failed(path: &Path, before_uid: Option<String>, mut evidence: Vec<String>, message: String) -> Self {
        evidence.push(message);
        Self {
            path: path.to_path_buf(),
            study_instance_uid: None,
            before_uid,
            during_uid: None,
            after_uid: None,
            status: OutcomeStatus::Failed,
            confidence: None,
            conflict: None,
            evidence,
        }
    }

    pub fn with_during_uid(mut self, uid: Option<String>) -> Self {
        self.during_uid = uid;
        self
    }

    /// Processed without error (including dry-run would-repairs)
    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Unchanged | OutcomeStatus::Repaired | OutcomeStatus::WouldRepair
        )
    }
}

/// Aggregate counts over a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Files that were containers (skipped files excluded)
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub per_family_counts: BTreeMap<CompressionFamily, usize>,
    pub per_syntax_counts: BTreeMap<String, usize>,
}

impl RunSummary {
    /// Recompute the summary from the complete outcome set
    pub fn from_outcomes(outcomes: &[FileOutcome], catalog: &SyntaxCatalog) -> Self {
        outcomes.iter().fold(RunSummary::default(), |mut summary, outcome| {
            match outcome.status {
                OutcomeStatus::Skipped => summary.skipped += 1,
                OutcomeStatus::Failed => {
                    summary.total += 1;
                    summary.failed += 1;
                }
                _ => {
                    summary.total += 1;
                    summary.succeeded += 1;
                }
            }
            if let Some(uid) = &outcome.after_uid {
                *summary.per_syntax_counts.entry(uid.clone()).or_insert(0) += 1;
                let family = catalog
                    .lookup(uid)
                    .map(|d| d.family)
                    .unwrap_or(CompressionFamily::Other);
                *summary.per_family_counts.entry(family).or_insert(0) += 1;
            }
            summary
        })
    }
}

/// Outcomes of one run plus their summary
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub root: PathBuf,
    pub dry_run: bool,
    pub summary: RunSummary,
    pub outcomes: Vec<FileOutcome>,
}

impl RunReport {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let catalog = SyntaxCatalog::global();
        writeln!(f, "Statistics for {}", self.root.display())?;
        writeln!(f, "  Containers processed: {}", self.summary.total)?;
        if self.dry_run {
            writeln!(f, "  Would repair:         {}", self.count(OutcomeStatus::WouldRepair))?;
        } else {
            writeln!(f, "  Repaired:             {}", self.count(OutcomeStatus::Repaired))?;
        }
        writeln!(f, "  Unchanged:            {}", self.count(OutcomeStatus::Unchanged))?;
        writeln!(f, "  Failed:               {}", self.summary.failed)?;
        writeln!(f, "  Skipped (non-DICOM):  {}", self.summary.skipped)?;

        if !self.summary.per_family_counts.is_empty() {
            writeln!(f, "  By family:")?;
            for (family, count) in &self.summary.per_family_counts {
                writeln!(f, "    {:<16} {}", family.to_string(), count)?;
            }
        }
        if !self.summary.per_syntax_counts.is_empty() {
            writeln!(f, "  Transfer syntaxes found:")?;
            for (uid, count) in &self.summary.per_syntax_counts {
                let name = catalog.lookup(uid).map(|d| d.name).unwrap_or("unknown");
                writeln!(f, "    {} {} ({})", count, uid, name)?;
            }
        }
        Ok(())
    }
}

/// Runs detection and repair over a directory tree
pub struct BatchPipeline<'a> {
    catalog: &'a SyntaxCatalog,
    detector: Detector<'a>,
    repairer: Repairer<'a>,
    options: PipelineOptions,
}

impl<'a> BatchPipeline<'a> {
    pub fn new(catalog: &'a SyntaxCatalog, options: PipelineOptions) -> Self {
        Self {
            catalog,
            detector: Detector::new(catalog),
            repairer: Repairer::new(catalog),
            options,
        }
    }

    /// Process every regular file under `root`.
    ///
    /// Only an invalid root or a worker pool failure is an error; per-file
    /// problems are recorded in the outcomes.
    pub fn run(&self, root: &Path) -> Result<RunReport, PipelineError> {
        let scan = FileScanner::new().scan(root)?;
        info!(
            root = %root.display(),
            files = scan.files.len(),
            bytes = scan.total_size,
            dry_run = self.options.dry_run,
            "Starting batch run"
        );

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(workers) = self.options.workers {
            builder = builder.num_threads(workers.max(1));
        }
        let pool = builder
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

        let mut outcomes: Vec<FileOutcome> = pool.install(|| {
            scan.files
                .par_iter()
                .map(|path| self.process_file(path))
                .collect()
        });
        // Unreadable directories and entries are per-path failures too
        outcomes.extend(scan.errors.into_iter().map(|issue| {
            FileOutcome::failed(
                &issue.path,
                None,
                Vec::new(),
                format!("Traversal failed: {}", issue.message),
            )
        }));

        let summary = RunSummary::from_outcomes(&outcomes, self.catalog);
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Batch run complete"
        );

        Ok(RunReport {
            root: root.to_path_buf(),
            dry_run: self.options.dry_run,
            summary,
            outcomes,
        })
    }

    /// Read, detect and (unless dry run) repair one file
    pub fn process_file(&self, path: &Path) -> FileOutcome {
        let header = match read_header(path) {
            Ok(header) => header,
            Err(HeaderError::MalformedContainer(reason)) => {
                debug!(file = %path.display(), "Skipping: {}", reason);
                return FileOutcome::skipped(path, reason);
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Header read failed");
                return FileOutcome::failed(path, None, Vec::new(), e.to_string());
            }
        };
        let before_uid = Some(header.declared_syntax_uid.clone());

        let sample = match sample_dataset(path, &header, self.options.limits) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Dataset sampling failed");
                return FileOutcome::failed(path, before_uid, Vec::new(), e.to_string());
            }
        };

        let detection = self.detector.detect(&header, &sample);
        for line in &detection.evidence {
            if self.options.verbose_evidence {
                info!(file = %path.display(), "  {}", line);
            } else {
                debug!(file = %path.display(), "  {}", line);
            }
        }
        if let Some(conflict) = &detection.conflict {
            warn!(
                file = %path.display(),
                declared = %detection.detected_uid,
                signature = %conflict,
                "Declared syntax contradicts dataset signature"
            );
        }

        let status = match self
            .repairer
            .repair(path, &detection.detected_uid, self.options.dry_run)
        {
            Ok(RepairOutcome::Unchanged) => OutcomeStatus::Unchanged,
            Ok(RepairOutcome::WouldRepair { previous_uid, new_uid }) => {
                info!(file = %path.display(), from = %previous_uid, to = %new_uid, "Would repair");
                OutcomeStatus::WouldRepair
            }
            Ok(RepairOutcome::Repaired {
                previous_uid,
                new_uid,
                meta_len_before,
                meta_len_after,
            }) => {
                info!(
                    file = %path.display(),
                    from = %previous_uid,
                    to = %new_uid,
                    meta_len_before,
                    meta_len_after,
                    confidence = %detection.confidence,
                    "Repaired"
                );
                OutcomeStatus::Repaired
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "Repair failed");
                return FileOutcome::failed(path, before_uid, detection.evidence, e.to_string());
            }
        };

        // For a dry run this is the UID the file would declare
        FileOutcome {
            path: path.to_path_buf(),
            study_instance_uid: sample.study_instance_uid,
            before_uid,
            during_uid: None,
            after_uid: Some(detection.detected_uid),
            status,
            confidence: Some(detection.confidence),
            conflict: detection.conflict,
            evidence: detection.evidence,
        }
    }
}
