//! Archive discovery from an index page
//!
//! Collects every `href` that ends in `.zip`, `.tar.gz` or `.tgz`, resolves
//! it against the page URL, and returns the de-duplicated, sorted set.

use crate::error::{FetchError, HarnessError};
use crate::fetch::HttpFetcher;
use reqwest::Url;
use std::collections::BTreeSet;
use tracing::debug;

const ARCHIVE_SUFFIXES: [&str; 3] = [".zip", ".tar.gz", ".tgz"];

fn is_archive_link(link: &str) -> bool {
    let path = link.split(&['?', '#'][..]).next().unwrap_or(link);
    let lower = path.to_ascii_lowercase();
    ARCHIVE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Values of every `href="..."` / `href='...'` attribute in `html`
fn href_values(html: &str) -> Vec<&str> {
    let mut values = Vec::new();
    let lower = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(found) = lower[search_from..].find("href") {
        let mut pos = search_from + found + 4;
        search_from = pos;

        let rest = &html[pos..];
        let trimmed = rest.trim_start();
        pos += rest.len() - trimmed.len();
        if !trimmed.starts_with('=') {
            continue;
        }
        pos += 1;
        let rest = &html[pos..];
        let trimmed = rest.trim_start();
        pos += rest.len() - trimmed.len();

        let Some(quote) = trimmed.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let value_start = pos + 1;
        if let Some(len) = html[value_start..].find(quote) {
            values.push(&html[value_start..value_start + len]);
            search_from = value_start + len + 1;
        }
    }
    values
}

/// Archive URLs linked from `html`, resolved against `base_url`
pub fn discover_archives(html: &str, base_url: &str) -> Result<Vec<String>, FetchError> {
    let base = Url::parse(base_url).map_err(|_| FetchError::InvalidUrl(base_url.to_string()))?;

    let links: BTreeSet<String> = href_values(html)
        .into_iter()
        .map(str::trim)
        .filter(|link| is_archive_link(link))
        .filter_map(|link| base.join(link).ok())
        .map(|url| url.to_string())
        .collect();

    Ok(links.into_iter().collect())
}

/// Fetch the index page and list the archives it links
pub async fn discover_from_index(
    fetcher: &HttpFetcher,
    index_url: &str,
) -> Result<Vec<String>, HarnessError> {
    let page = fetcher.fetch_text(index_url).await?;
    let urls = discover_archives(&page, index_url)?;
    debug!(index = %index_url, archives = urls.len(), "Archive index parsed");
    Ok(urls)
}

/// Apply the archive limit; 0 keeps everything
pub fn apply_limit(mut urls: Vec<String>, limit: usize) -> Vec<String> {
    if limit > 0 {
        urls.truncate(limit);
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <a href="MR-heart.zip">heart</a>
        <a HREF = 'ct/head.tar.gz'>head</a>
        <a href="https://mirror.example.org/files/us.tgz">us</a>
        <a href="MR-heart.zip">duplicate</a>
        <a href="readme.html">readme</a>
        <a href="notes.ZIP?dl=1">notes</a>
        </body></html>
    "#;

    #[test]
    fn test_discover_resolves_dedupes_and_sorts() {
        let urls = discover_archives(PAGE, "https://www.example.com/dicom_files/").unwrap();
        assert_eq!(
            urls,
            vec![
                "https://mirror.example.org/files/us.tgz".to_string(),
                "https://www.example.com/dicom_files/MR-heart.zip".to_string(),
                "https://www.example.com/dicom_files/ct/head.tar.gz".to_string(),
                "https://www.example.com/dicom_files/notes.ZIP?dl=1".to_string(),
            ]
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            discover_archives(PAGE, "not a url"),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_limit_zero_keeps_all() {
        let urls = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(apply_limit(urls.clone(), 0).len(), 3);
        assert_eq!(apply_limit(urls.clone(), 2), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(apply_limit(urls, 10).len(), 3);
    }
}
