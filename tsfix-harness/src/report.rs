//! Report writers
//!
//! Three synchronized views of one `ValidationRun`:
//! - `results.json`: the full result set (serde)
//! - `report.md`: human-readable summary with a per-archive breakdown
//! - `report.html`: the summary rendered through a `ReportRenderer`

use crate::error::HarnessError;
use crate::validate::{HarnessRecord, ValidationRun};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const JSON_REPORT: &str = "results.json";
pub const MARKDOWN_REPORT: &str = "report.md";
pub const HTML_REPORT: &str = "report.html";

/// Files shown per archive before the remainder is summarized
const FILES_PER_ARCHIVE: usize = 10;
const MISSING: &str = "(missing/empty)";

/// Turns the summary document into its rendered view
pub trait ReportRenderer {
    fn render(&self, markdown: &str) -> String;
}

/// Standalone HTML page with the escaped summary in a `<pre>` block
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlRenderer;

impl ReportRenderer for HtmlRenderer {
    fn render(&self, markdown: &str) -> String {
        format!(
            concat!(
                "<!doctype html>\n<html><head><meta charset=\"utf-8\">",
                "<title>Transfer Syntax Validation Report</title>\n<style>",
                "body{{font-family:system-ui,Segoe UI,Arial;max-width:980px;margin:24px auto;line-height:1.5}} ",
                "pre{{background:#f6f8fa;padding:12px;border-radius:6px;overflow:auto}}",
                "</style></head>\n<body><pre>{}</pre></body></html>\n"
            ),
            escape_html(markdown)
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Where the three reports of a run were written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
    pub html: PathBuf,
}

fn rate_color(rate: f64) -> &'static str {
    if rate >= 90.0 {
        "green"
    } else if rate >= 60.0 {
        "orange"
    } else {
        "red"
    }
}

fn or_missing(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => MISSING,
    }
}

fn record_verdict(record: &HarnessRecord) -> String {
    match (&record.failure, record.matched) {
        (Some(failure), _) => format!("FAILED: {}", failure),
        (None, true) => "matched".to_string(),
        (None, false) => "MISMATCH".to_string(),
    }
}

/// Human-readable summary document
pub fn render_markdown(run: &ValidationRun) -> Result<String, HarnessError> {
    let mut md = String::new();
    write_summary(&mut md, run)
        .map_err(|e| HarnessError::Report(format!("Cannot format summary: {}", e)))?;
    Ok(md)
}

fn write_summary(md: &mut String, run: &ValidationRun) -> std::fmt::Result {
    writeln!(md, "# Transfer Syntax Validation Report")?;
    writeln!(md)?;
    writeln!(md, "Generated: {}", run.generated_at.to_rfc3339())?;
    writeln!(md)?;
    writeln!(md, "- Total files: **{}**", run.total)?;
    writeln!(md, "- Matched: **{}**", run.matched)?;
    writeln!(md, "- Harness failures: **{}**", run.harness_failures)?;
    writeln!(
        md,
        "- Success rate: <span style=\"color:{};font-weight:bold\">{:.2}%</span>",
        rate_color(run.success_rate),
        run.success_rate
    )?;

    for archive in &run.archives {
        writeln!(md)?;
        writeln!(md, "## Archive: `{}`", archive.archive_id)?;
        writeln!(md)?;
        writeln!(md, "- Source: {}", archive.url)?;
        if let Some(error) = &archive.error {
            writeln!(md, "- Error: {}", error)?;
            continue;
        }
        writeln!(
            md,
            "- Files: {}, matched: {}",
            archive.records.len(),
            archive.matched()
        )?;

        for record in archive.records.iter().take(FILES_PER_ARCHIVE) {
            writeln!(
                md,
                "- `{}` ({})",
                record.relative_path.display(),
                record_verdict(record)
            )?;
            writeln!(md, "  - StudyInstanceUID: {}", or_missing(record.study_instance_uid()))?;
            // Before is the pristine declaration, i.e. the ground truth
            writeln!(md, "  - Before TS: {}", or_missing(record.expected_uid.as_deref()))?;
            writeln!(md, "  - During TS: {}", or_missing(record.during_uid()))?;
            writeln!(md, "  - After TS: {}", or_missing(record.after_uid()))?;
        }
        if archive.records.len() > FILES_PER_ARCHIVE {
            writeln!(
                md,
                "- ...and {} more files",
                archive.records.len() - FILES_PER_ARCHIVE
            )?;
        }
    }

    writeln!(md)?;
    writeln!(md, "---")?;
    writeln!(
        md,
        "tsfix-harness v{} (git {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    )?;
    Ok(())
}

/// Write `results.json`, `report.md` and `report.html` into `dir`
pub fn write_reports(
    run: &ValidationRun,
    dir: &Path,
    renderer: &dyn ReportRenderer,
) -> Result<ReportPaths, HarnessError> {
    let paths = ReportPaths {
        json: dir.join(JSON_REPORT),
        markdown: dir.join(MARKDOWN_REPORT),
        html: dir.join(HTML_REPORT),
    };

    let json = serde_json::to_string_pretty(run)
        .map_err(|e| HarnessError::Report(format!("Cannot serialize results: {}", e)))?;
    let markdown = render_markdown(run)?;
    let html = renderer.render(&markdown);

    for (path, contents) in [
        (&paths.json, json),
        (&paths.markdown, markdown),
        (&paths.html, html),
    ] {
        fs::write(path, contents)
            .map_err(|e| HarnessError::Report(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Report written");
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ArchiveResult;
    use tempfile::TempDir;
    use tsfix_common::catalog::JPEG_2000_LOSSLESS;
    use tsfix_fixer::{FileOutcome, OutcomeStatus};

    fn record(index: usize, matched: bool) -> HarnessRecord {
        HarnessRecord {
            archive_id: "set.zip".to_string(),
            relative_path: PathBuf::from(format!("img{:02}.dcm", index)),
            expected_uid: Some(JPEG_2000_LOSSLESS.to_string()),
            outcome: Some(FileOutcome {
                path: PathBuf::from(format!("/w/img{:02}.dcm", index)),
                study_instance_uid: Some("1.2.3.4".to_string()),
                before_uid: Some(String::new()),
                during_uid: Some(String::new()),
                after_uid: Some(JPEG_2000_LOSSLESS.to_string()),
                status: OutcomeStatus::Repaired,
                confidence: None,
                conflict: None,
                evidence: Vec::new(),
            }),
            matched,
            failure: None,
        }
    }

    fn run_with(records: Vec<HarnessRecord>) -> ValidationRun {
        ValidationRun::from_archives(vec![
            ArchiveResult {
                archive_id: "set.zip".to_string(),
                url: "https://host/set.zip".to_string(),
                error: None,
                records,
            },
            ArchiveResult {
                archive_id: "gone.tgz".to_string(),
                url: "https://host/gone.tgz".to_string(),
                error: Some("Fetch failed: HTTP 404".to_string()),
                records: Vec::new(),
            },
        ])
    }

    #[test]
    fn test_markdown_truncates_per_archive() {
        let md = render_markdown(&run_with((0..12).map(|i| record(i, true)).collect())).unwrap();
        assert!(md.contains("- Total files: **12**"));
        assert!(md.contains("color:green"));
        assert!(md.contains("## Archive: `set.zip`"));
        assert!(md.contains("- Source: https://host/set.zip"));
        assert!(md.contains("img09.dcm"));
        assert!(!md.contains("img10.dcm"));
        assert!(md.contains("- ...and 2 more files"));
        assert!(md.contains("- During TS: (missing/empty)"));
        assert!(md.contains("- Error: Fetch failed: HTTP 404"));
    }

    #[test]
    fn test_rate_colors() {
        assert_eq!(rate_color(100.0), "green");
        assert_eq!(rate_color(75.0), "orange");
        assert_eq!(rate_color(10.0), "red");
        let md = render_markdown(&run_with(vec![record(0, true), record(1, false)])).unwrap();
        assert!(md.contains("color:red"));
        assert!(md.contains("(MISMATCH)"));
    }

    #[test]
    fn test_html_escapes_summary() {
        let html = HtmlRenderer.render("<span> & `code`");
        assert!(html.contains("<pre>&lt;span&gt; &amp; `code`</pre>"));
        assert!(html.starts_with("<!doctype html>"));
    }

    #[test]
    fn test_write_reports() {
        let temp = TempDir::new().unwrap();
        let run = run_with(vec![record(0, true)]);
        let paths = write_reports(&run, temp.path(), &HtmlRenderer).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.json).unwrap()).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["matched"], 1);
        assert_eq!(json["archives"][0]["records"][0]["matched"], true);
        assert!(fs::read_to_string(&paths.markdown).unwrap().contains("Success rate"));
        assert!(fs::read_to_string(&paths.html).unwrap().contains("&lt;span"));
    }

    #[test]
    fn test_write_failure_is_a_report_error() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "in the way").unwrap();

        let result = write_reports(&run_with(vec![record(0, true)]), &blocker, &HtmlRenderer);
        assert!(matches!(result, Err(HarnessError::Report(_))));
    }
}
