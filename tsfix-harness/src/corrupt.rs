//! Ground truth capture and the corrupted working copy
//!
//! The pristine tree is copied file-for-file into the work tree. For every
//! container the declared Transfer Syntax of the pristine file is recorded as
//! ground truth, and the copy's declaration is cleared with the same meta
//! rewrite the Repairer uses.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tsfix_common::catalog::normalize_uid;
use tsfix_fixer::header::is_container;
use tsfix_fixer::read_header;
use tsfix_fixer::repair::rewrite_transfer_syntax;
use walkdir::WalkDir;

/// One container prepared for a validation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedFile {
    /// Path relative to the archive root
    pub relative_path: PathBuf,
    pub pristine_path: PathBuf,
    pub work_path: PathBuf,
    /// Declared UID of the pristine file (None when it declares nothing)
    pub expected_uid: Option<String>,
    /// Declared UID of the work copy after clearing
    pub during_uid: Option<String>,
    /// Why this file cannot be compared
    pub failure: Option<String>,
}

impl PreparedFile {
    fn new(relative_path: PathBuf, pristine_path: PathBuf, work_path: PathBuf) -> Self {
        Self {
            relative_path,
            pristine_path,
            work_path,
            expected_uid: None,
            during_uid: None,
            failure: None,
        }
    }
}

/// Copy `pristine` into `work` and clear the declaration of every container copy.
///
/// Non-container files are copied but not reported. Per-file problems are
/// recorded on the returned entry; only directory-level I/O fails the call.
pub fn prepare_working_copy(pristine: &Path, work: &Path) -> io::Result<Vec<PreparedFile>> {
    fs::create_dir_all(work)?;
    let mut prepared = Vec::new();

    for entry in WalkDir::new(pristine).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(pristine) else {
            continue;
        };
        let target = work.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        fs::copy(entry.path(), &target)?;

        if is_container(entry.path()) {
            prepared.push(clear_declaration(
                relative.to_path_buf(),
                entry.path().to_path_buf(),
                target,
            ));
        }
    }

    debug!(
        pristine = %pristine.display(),
        containers = prepared.len(),
        "Working copy prepared"
    );
    Ok(prepared)
}

fn clear_declaration(relative: PathBuf, pristine_path: PathBuf, work_path: PathBuf) -> PreparedFile {
    let mut file = PreparedFile::new(relative, pristine_path, work_path);

    let pristine_header = match read_header(&file.pristine_path) {
        Ok(header) => header,
        Err(e) => {
            file.failure = Some(format!("Ground truth unreadable: {}", e));
            return file;
        }
    };
    let declared = normalize_uid(&pristine_header.declared_syntax_uid);
    if declared.is_empty() {
        file.failure = Some("No ground truth: pristine file declares no transfer syntax".to_string());
        return file;
    }
    file.expected_uid = Some(declared.to_string());

    let cleared = read_header(&file.work_path)
        .map_err(|e| e.to_string())
        .and_then(|header| {
            rewrite_transfer_syntax(&file.work_path, &header, "").map_err(|e| e.to_string())
        })
        .and_then(|_| read_header(&file.work_path).map_err(|e| e.to_string()));

    match cleared {
        Ok(header) => {
            file.during_uid = Some(normalize_uid(&header.declared_syntax_uid).to_string());
        }
        Err(e) => {
            warn!(file = %file.work_path.display(), error = %e, "Failed to clear transfer syntax");
            file.failure = Some(format!("Could not clear declaration: {}", e));
        }
    }
    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tsfix_common::catalog::JPEG_2000_LOSSLESS;
    use tsfix_fixer::synthetic::SyntheticContainer;

    #[test]
    fn test_clears_copy_and_keeps_pristine() {
        let temp = TempDir::new().unwrap();
        let pristine = temp.path().join("pristine");
        let work = temp.path().join("work");
        fs::create_dir_all(pristine.join("series")).unwrap();

        let container = SyntheticContainer::jpeg2000(true);
        container.write_to(&pristine.join("series/img.dcm")).unwrap();
        fs::write(pristine.join("README.txt"), "not a container").unwrap();

        let prepared = prepare_working_copy(&pristine, &work).unwrap();
        assert_eq!(prepared.len(), 1);
        let file = &prepared[0];
        assert_eq!(file.relative_path, PathBuf::from("series/img.dcm"));
        assert_eq!(file.expected_uid.as_deref(), Some(JPEG_2000_LOSSLESS));
        assert_eq!(file.during_uid.as_deref(), Some(""));
        assert!(file.failure.is_none());

        assert!(work.join("README.txt").is_file());
        let pristine_header = read_header(&pristine.join("series/img.dcm")).unwrap();
        assert_eq!(pristine_header.declared_syntax_uid, JPEG_2000_LOSSLESS);
    }

    #[test]
    fn test_missing_ground_truth_is_recorded() {
        let temp = TempDir::new().unwrap();
        let pristine = temp.path().join("pristine");
        fs::create_dir_all(&pristine).unwrap();
        SyntheticContainer::explicit_le_uncompressed()
            .without_declared_syntax()
            .write_to(&pristine.join("blank.dcm"))
            .unwrap();

        let prepared = prepare_working_copy(&pristine, &temp.path().join("work")).unwrap();
        assert_eq!(prepared.len(), 1);
        assert!(prepared[0].expected_uid.is_none());
        assert!(prepared[0].failure.as_deref().unwrap().contains("No ground truth"));
    }
}
