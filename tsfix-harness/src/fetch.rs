//! Fetch collaborator
//!
//! **HTTP discipline:**
//! - Per-request timeout on the shared client
//! - Transient failures (connect, timeout, 5xx, 429) retried with exponential
//!   backoff; client errors (4xx) fail immediately
//! - Downloads are cached in the work directory under the file name,
//!   prefixed with a digest of the full URL

use crate::error::FetchError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("tsfix-harness/", env!("CARGO_PKG_VERSION"));
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8_000;

/// Retrieves archive bytes for a URL
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher with timeout and retry
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: u32,
    initial_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, retries: u32) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            retries,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        })
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let network = |e: reqwest::Error| {
            if e.is_builder() {
                FetchError::InvalidUrl(url.to_string())
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(network)?;
        Ok(bytes.to_vec())
    }

    /// Fetch a page as text (archive index listing)
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0u32;
        let mut backoff = self.initial_backoff;

        loop {
            attempt += 1;
            if attempt > 1 {
                debug!(url = %url, attempt, "Retrying fetch");
            }

            match self.fetch_once(url).await {
                Ok(bytes) => {
                    info!(url = %url, bytes = bytes.len(), attempt, "Fetched archive");
                    return Ok(bytes);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt > self.retries => {
                    warn!(url = %url, attempt, error = %e, "Fetch failed: retries exhausted");
                    return Err(FetchError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        url = %url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(MAX_BACKOFF_MS));
                }
            }
        }
    }
}

/// File name an archive URL is cached under
pub fn archive_file_name(url: &str) -> Option<String> {
    let path = url.split(&['?', '#'][..]).next()?;
    let name = path.rsplit('/').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Short hex digest of the full URL; same-named archives at different URLs differ
pub fn source_key(url: &str) -> String {
    let mut key = format!("{:x}", Sha256::digest(url.as_bytes()));
    key.truncate(12);
    key
}

/// Cache file name for `url`: `<source key>-<file name>`
pub fn cached_file_name(url: &str) -> Option<String> {
    archive_file_name(url).map(|name| format!("{}-{}", source_key(url), name))
}

/// Return the cached archive for `url`, downloading it on a cache miss
pub async fn fetch_cached(
    fetcher: &dyn ArchiveFetcher,
    url: &str,
    cache_dir: &Path,
) -> Result<(PathBuf, Vec<u8>), FetchError> {
    let name = cached_file_name(url).ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
    let path = cache_dir.join(&name);
    let cache_error = |source| FetchError::Cache {
        path: path.clone(),
        source,
    };

    if path.is_file() {
        debug!(url = %url, path = %path.display(), "Using cached archive");
        let bytes = tokio::fs::read(&path).await.map_err(cache_error)?;
        return Ok((path, bytes));
    }

    let bytes = fetcher.fetch(url).await?;
    tokio::fs::create_dir_all(cache_dir).await.map_err(cache_error)?;
    // Write under a temporary name so an interrupted download is never cached
    let partial = cache_dir.join(format!("{}.part", name));
    tokio::fs::write(&partial, &bytes).await.map_err(cache_error)?;
    tokio::fs::rename(&partial, &path).await.map_err(cache_error)?;
    Ok((path, bytes))
}
