//! Validation Harness
//!
//! **Protocol per archive:**
//! 1. Fetch (cached in `<work>/downloads`)
//! 2. Extract into `<work>/<stem>-<key>/pristine`
//! 3. Record ground truth and clear the declaration in `<work>/<stem>-<key>/work`
//! 4. Run the Batch Pipeline (writing) over the cleared copy
//! 5. Compare each file's after-UID with its ground truth
//!
//! `<key>` is a digest of the source URL, so archives that share a file name
//! never share a directory. Archives are processed concurrently up to the
//! configured bound. A fetch or extract failure is recorded against its
//! archive and the run continues.

use crate::corrupt::{prepare_working_copy, PreparedFile};
use crate::error::HarnessError;
use crate::extract::ArchiveExtractor;
use crate::fetch::{archive_file_name, fetch_cached, source_key, ArchiveFetcher};
use crate::listing::apply_limit;
use crate::report::{write_reports, ReportPaths, ReportRenderer};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, warn};
use tsfix_common::config::TomlConfig;
use tsfix_common::SyntaxCatalog;
use tsfix_fixer::{BatchPipeline, FileOutcome, OutcomeStatus, PipelineOptions};

/// Harness run options
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Maximum archives to process (0 = all)
    pub limit: usize,
    pub report_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Archives in flight at once
    pub concurrency: usize,
    /// Pipeline settings; `dry_run` is always forced off
    pub pipeline: PipelineOptions,
}

impl From<&TomlConfig> for HarnessOptions {
    fn from(config: &TomlConfig) -> Self {
        Self {
            limit: config.harness.archive_limit,
            report_dir: config.harness.resolved_report_directory(),
            work_dir: config.harness.resolved_work_directory(),
            concurrency: config.harness.concurrency,
            pipeline: PipelineOptions::from(&config.fixer),
        }
    }
}

/// Comparison of one recovered file against its ground truth
#[derive(Debug, Clone, Serialize)]
pub struct HarnessRecord {
    pub archive_id: String,
    pub relative_path: PathBuf,
    pub expected_uid: Option<String>,
    /// Pipeline outcome for the cleared copy (None if it never ran)
    pub outcome: Option<FileOutcome>,
    pub matched: bool,
    /// Harness-level failure, distinct from a detection mismatch
    pub failure: Option<String>,
}

impl HarnessRecord {
    pub fn after_uid(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(|o| o.after_uid.as_deref())
    }

    pub fn during_uid(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(|o| o.during_uid.as_deref())
    }

    pub fn study_instance_uid(&self) -> Option<&str> {
        self.outcome
            .as_ref()
            .and_then(|o| o.study_instance_uid.as_deref())
    }
}

/// Everything recorded for one archive source
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveResult {
    pub archive_id: String,
    pub url: String,
    /// Fetch or extract failure; the archive contributes no records
    pub error: Option<String>,
    pub records: Vec<HarnessRecord>,
}

impl ArchiveResult {
    fn failed(archive_id: String, url: &str, error: String) -> Self {
        Self {
            archive_id,
            url: url.to_string(),
            error: Some(error),
            records: Vec::new(),
        }
    }

    pub fn matched(&self) -> usize {
        self.records.iter().filter(|r| r.matched).count()
    }
}

/// Result set of one harness run
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRun {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub matched: usize,
    /// Records that failed before comparison was possible
    pub harness_failures: usize,
    /// matched / total as a percentage; 0 when nothing was compared
    pub success_rate: f64,
    pub archives: Vec<ArchiveResult>,
}

impl ValidationRun {
    /// Aggregate computed once from the complete archive list
    pub fn from_archives(archives: Vec<ArchiveResult>) -> Self {
        let records = || archives.iter().flat_map(|a| a.records.iter());
        let total = records().count();
        let matched = records().filter(|r| r.matched).count();
        let harness_failures = records().filter(|r| r.failure.is_some()).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            matched as f64 / total as f64 * 100.0
        };

        Self {
            generated_at: Utc::now(),
            total,
            matched,
            harness_failures,
            success_rate,
            archives,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &HarnessRecord> {
        self.archives.iter().flat_map(|a| a.records.iter())
    }
}

/// Drives fetch, extract, corrupt, repair and compare over a set of archives
pub struct ValidationHarness {
    fetcher: Arc<dyn ArchiveFetcher>,
    extractor: Arc<dyn ArchiveExtractor>,
    options: HarnessOptions,
}

impl ValidationHarness {
    pub fn new(
        fetcher: Arc<dyn ArchiveFetcher>,
        extractor: Arc<dyn ArchiveExtractor>,
        options: HarnessOptions,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            options,
        }
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    /// Run the protocol over `sources` and write the three reports.
    ///
    /// Only an unusable report or work directory is an error.
    pub async fn validate(
        &self,
        sources: Vec<String>,
        renderer: &dyn ReportRenderer,
    ) -> Result<(ValidationRun, ReportPaths), HarnessError> {
        ensure_report_dir(&self.options.report_dir)?;
        let run = self.run(sources).await?;
        let paths = write_reports(&run, &self.options.report_dir, renderer)?;
        info!(
            total = run.total,
            matched = run.matched,
            success_rate = run.success_rate,
            report = %paths.markdown.display(),
            "Validation complete"
        );
        Ok((run, paths))
    }

    /// Run the protocol without writing reports
    pub async fn run(&self, sources: Vec<String>) -> Result<ValidationRun, HarnessError> {
        let work_dir = &self.options.work_dir;
        fs::create_dir_all(work_dir.join("downloads")).map_err(|source| {
            HarnessError::WorkDirectory {
                path: work_dir.clone(),
                source,
            }
        })?;

        let mut seen = HashSet::new();
        let sources: Vec<String> = sources
            .into_iter()
            .filter(|url| seen.insert(url.clone()))
            .collect();
        let sources = apply_limit(sources, self.options.limit);
        info!(
            archives = sources.len(),
            concurrency = self.options.concurrency,
            "Starting validation"
        );

        let mut results: Vec<(usize, ArchiveResult)> = stream::iter(sources.into_iter().enumerate())
            .map(|(index, url)| async move { (index, self.process_archive(&url).await) })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        Ok(ValidationRun::from_archives(
            results.into_iter().map(|(_, result)| result).collect(),
        ))
    }

    async fn process_archive(&self, url: &str) -> ArchiveResult {
        let archive_id = archive_file_name(url).unwrap_or_else(|| url.to_string());
        let downloads = self.options.work_dir.join("downloads");

        let bytes = match fetch_cached(self.fetcher.as_ref(), url, &downloads).await {
            Ok((_, bytes)) => bytes,
            Err(e) => {
                warn!(archive = %archive_id, error = %e, "Archive fetch failed");
                return ArchiveResult::failed(archive_id, url, format!("Fetch failed: {}", e));
            }
        };

        let extractor = Arc::clone(&self.extractor);
        let archive_dir = archive_work_dir(&self.options.work_dir, url);
        let mut pipeline_options = self.options.pipeline;
        pipeline_options.dry_run = false;
        let id = archive_id.clone();

        let task = tokio::task::spawn_blocking(move || {
            check_archive(extractor.as_ref(), &id, &bytes, &archive_dir, pipeline_options)
        });

        match task.await {
            Ok(Ok(records)) => {
                let matched = records.iter().filter(|r| r.matched).count();
                info!(archive = %archive_id, files = records.len(), matched, "Archive validated");
                ArchiveResult {
                    archive_id,
                    url: url.to_string(),
                    error: None,
                    records,
                }
            }
            Ok(Err(message)) => {
                warn!(archive = %archive_id, error = %message, "Archive validation failed");
                ArchiveResult::failed(archive_id, url, message)
            }
            Err(e) => ArchiveResult::failed(archive_id, url, format!("Worker task failed: {}", e)),
        }
    }
}

/// Blocking part of the protocol for one archive
fn check_archive(
    extractor: &dyn ArchiveExtractor,
    archive_id: &str,
    bytes: &[u8],
    archive_dir: &Path,
    options: PipelineOptions,
) -> Result<Vec<HarnessRecord>, String> {
    let pristine = archive_dir.join("pristine");
    let work = archive_dir.join("work");
    if archive_dir.exists() {
        fs::remove_dir_all(archive_dir)
            .map_err(|e| format!("Cannot reset {}: {}", archive_dir.display(), e))?;
    }

    extractor
        .extract(archive_id, bytes, &pristine)
        .map_err(|e| format!("Extraction failed: {}", e))?;
    let prepared = prepare_working_copy(&pristine, &work)
        .map_err(|e| format!("Working copy failed: {}", e))?;

    let report = BatchPipeline::new(SyntaxCatalog::global(), options)
        .run(&work)
        .map_err(|e| format!("Pipeline failed: {}", e))?;

    Ok(compare(archive_id, prepared, report.outcomes))
}

/// Pair pipeline outcomes with prepared files and decide matches
pub fn compare(
    archive_id: &str,
    prepared: Vec<PreparedFile>,
    outcomes: Vec<FileOutcome>,
) -> Vec<HarnessRecord> {
    let mut by_path: HashMap<PathBuf, FileOutcome> =
        outcomes.into_iter().map(|o| (o.path.clone(), o)).collect();

    prepared
        .into_iter()
        .map(|file| {
            let outcome = by_path
                .remove(&file.work_path)
                .map(|o| o.with_during_uid(file.during_uid.clone()));

            let failure = file.failure.clone().or_else(|| match &outcome {
                None => Some("Not processed by the pipeline".to_string()),
                Some(o) if o.status == OutcomeStatus::Failed => Some(format!(
                    "Header read failed: {}",
                    o.evidence.last().map(String::as_str).unwrap_or("unknown error")
                )),
                Some(o) if o.status == OutcomeStatus::Skipped => {
                    Some("Cleared copy is no longer a container".to_string())
                }
                Some(_) => None,
            });

            let matched = failure.is_none()
                && outcome.as_ref().and_then(|o| o.after_uid.as_deref()) == file.expected_uid.as_deref();

            HarnessRecord {
                archive_id: archive_id.to_string(),
                relative_path: file.relative_path,
                expected_uid: file.expected_uid,
                outcome,
                matched,
                failure,
            }
        })
        .collect()
}

/// Per-archive directory under `work_dir`: `<stem>-<source key>`
pub fn archive_work_dir(work_dir: &Path, url: &str) -> PathBuf {
    let archive_id = archive_file_name(url).unwrap_or_else(|| url.to_string());
    work_dir.join(format!("{}-{}", archive_stem(&archive_id), source_key(url)))
}

/// Archive file name without its archive suffix
fn archive_stem(archive_id: &str) -> String {
    let lower = archive_id.to_ascii_lowercase();
    [".tar.gz", ".tgz", ".zip"]
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map(|suffix| archive_id[..archive_id.len() - suffix.len()].to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| archive_id.to_string())
}

/// Fail fast if reports could not be written
fn ensure_report_dir(dir: &Path) -> Result<(), HarnessError> {
    let to_error = |source| HarnessError::ReportDirectory {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(to_error)?;
    NamedTempFile::new_in(dir).map_err(to_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsfix_common::catalog::{JPEG_2000_LOSSLESS, JPEG_BASELINE};

    fn outcome(path: &str, status: OutcomeStatus, after: Option<&str>) -> FileOutcome {
        FileOutcome {
            path: PathBuf::from(path),
            study_instance_uid: None,
            before_uid: Some(String::new()),
            during_uid: None,
            after_uid: after.map(str::to_string),
            status,
            confidence: None,
            conflict: None,
            evidence: vec!["truncated meta group".to_string()],
        }
    }

    fn prepared(relative: &str, expected: Option<&str>) -> PreparedFile {
        PreparedFile {
            relative_path: PathBuf::from(relative),
            pristine_path: PathBuf::from("/p").join(relative),
            work_path: PathBuf::from("/w").join(relative),
            expected_uid: expected.map(str::to_string),
            during_uid: Some(String::new()),
            failure: None,
        }
    }

    #[test]
    fn test_compare_match_mismatch_and_failure() {
        let records = compare(
            "set.zip",
            vec![
                prepared("a.dcm", Some(JPEG_2000_LOSSLESS)),
                prepared("b.dcm", Some(JPEG_2000_LOSSLESS)),
                prepared("c.dcm", Some(JPEG_BASELINE)),
            ],
            vec![
                outcome("/w/a.dcm", OutcomeStatus::Repaired, Some(JPEG_2000_LOSSLESS)),
                outcome("/w/b.dcm", OutcomeStatus::Repaired, Some(JPEG_BASELINE)),
                outcome("/w/c.dcm", OutcomeStatus::Failed, None),
            ],
        );

        assert!(records[0].matched);
        assert_eq!(records[0].during_uid(), Some(""));
        assert!(!records[1].matched);
        assert!(records[1].failure.is_none());
        assert!(!records[2].matched);
        assert!(records[2].failure.as_deref().unwrap().starts_with("Header read failed"));
    }

    #[test]
    fn test_run_aggregates() {
        let records = compare(
            "set.zip",
            vec![
                prepared("a.dcm", Some(JPEG_2000_LOSSLESS)),
                prepared("b.dcm", Some(JPEG_2000_LOSSLESS)),
            ],
            vec![outcome("/w/a.dcm", OutcomeStatus::Repaired, Some(JPEG_2000_LOSSLESS))],
        );
        let run = ValidationRun::from_archives(vec![
            ArchiveResult {
                archive_id: "set.zip".to_string(),
                url: "https://host/set.zip".to_string(),
                error: None,
                records,
            },
            ArchiveResult::failed("gone.zip".to_string(), "https://host/gone.zip", "404".to_string()),
        ]);

        assert_eq!(run.total, 2);
        assert_eq!(run.matched, 1);
        assert_eq!(run.harness_failures, 1);
        assert!((run.success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_run_rate_is_zero() {
        let run = ValidationRun::from_archives(Vec::new());
        assert_eq!(run.total, 0);
        assert_eq!(run.success_rate, 0.0);
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(archive_stem("MR-heart.zip"), "MR-heart");
        assert_eq!(archive_stem("CT.Tar.Gz"), "CT");
        assert_eq!(archive_stem("us.tgz"), "us");
        assert_eq!(archive_stem("plain"), "plain");
    }

    #[test]
    fn test_work_dirs_differ_per_url() {
        let work = Path::new("/work");
        let ct = archive_work_dir(work, "https://host/ct/data.zip");
        let mr = archive_work_dir(work, "https://host/mr/data.zip");
        assert_ne!(ct, mr);
        assert!(ct.file_name().unwrap().to_string_lossy().starts_with("data-"));
    }
}
