//! Dataset file scanner
//!
//! Recursive discovery of candidate files under a root directory.
//! Traversal is sequential and follows symlinks (walkdir reports loops); the
//! per-file size check runs on the rayon pool. Every regular file is a
//! candidate: the header reader decides which ones are containers.

use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// An entry the traversal could not read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
    pub path: PathBuf,
    pub message: String,
}

/// Files discovered under a root, in traversal-independent order
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Sorted so that reports list files deterministically
    pub files: Vec<PathBuf>,
    pub total_size: u64,
    /// Entries that could not be read during traversal
    pub errors: Vec<ScanIssue>,
}

/// Recursive file scanner
pub struct FileScanner {
    ignore_patterns: Vec<String>,
}

impl FileScanner {
    /// Scanner that skips version-control and desktop metadata entries
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
            ],
        }
    }

    /// Collect every regular file below `root`, following symlinks.
    ///
    /// A linked file whose target is also reached directly, or through an
    /// earlier link, is listed once.
    pub fn scan(&self, root: &Path) -> Result<ScanResult, ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let mut files = Vec::new();
        let mut errors = Vec::new();
        let mut link_targets = HashSet::new();

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e));

        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if entry.path_is_symlink()
                        && !self.is_new_link_target(&entry, &canonical_root, &mut link_targets)
                    {
                        continue;
                    }
                    files.push(entry.path().to_path_buf());
                }
                Ok(_) => {}
                Err(e) if e.loop_ancestor().is_some() => {
                    tracing::warn!("Symlink loop skipped: {}", e);
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    errors.push(ScanIssue {
                        path: e.path().unwrap_or(root).to_path_buf(),
                        message: e.to_string(),
                    });
                }
            }
        }
        files.sort();

        let total_size = files
            .par_iter()
            .filter_map(|path| std::fs::metadata(path).ok())
            .map(|metadata| metadata.len())
            .sum();

        tracing::debug!(
            "Scan complete: {} files ({} bytes), {} unreadable entries under {}",
            files.len(),
            total_size,
            errors.len(),
            root.display()
        );

        Ok(ScanResult {
            files,
            total_size,
            errors,
        })
    }

    fn should_process_entry(&self, entry: &DirEntry) -> bool {
        // The root itself is never filtered
        if entry.depth() == 0 {
            return true;
        }

        let file_name = entry.file_name().to_string_lossy();
        !self
            .ignore_patterns
            .iter()
            .any(|pattern| file_name.as_ref() == pattern.as_str())
    }

    /// False when the link's target is scanned directly or was already listed
    fn is_new_link_target(
        &self,
        entry: &DirEntry,
        canonical_root: &Path,
        seen: &mut HashSet<PathBuf>,
    ) -> bool {
        let Ok(target) = entry.path().canonicalize() else {
            return true;
        };
        let reached_directly = target
            .strip_prefix(canonical_root)
            .is_ok_and(|relative| !self.is_ignored(relative));
        if reached_directly || !seen.insert(target) {
            tracing::debug!("Duplicate link skipped: {}", entry.path().display());
            return false;
        }
        true
    }

    fn is_ignored(&self, relative: &Path) -> bool {
        relative.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            self.ignore_patterns.iter().any(|pattern| name == pattern.as_str())
        })
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}
