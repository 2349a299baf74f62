//! Loading of the suite configuration and of submissions.

use crate::error::{LoadError, StructuralError};
use crate::schema::SuiteConfig;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Configuration file names recognised in the test directory root, in lookup order.
pub const SUITE_CONFIG_FILENAMES: [&str; 3] =
    ["testcenter.yaml", "testcenter.yml", "testcenter.toml"];

/// Load a suite configuration file, picking the parser by extension.
pub fn load_config_file(path: &Path) -> Result<SuiteConfig, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path)?;

    match ext {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&contents)?),
        "toml" => Ok(toml::from_str(&contents)?),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Load suite configuration from a test directory.
///
/// Returns `None` if no configuration file exists, `Err` if one exists but is
/// invalid.
pub fn load_suite_config(dir: &Path) -> Result<Option<SuiteConfig>, LoadError> {
    for name in SUITE_CONFIG_FILENAMES {
        let path = dir.join(name);
        if path.is_file() {
            debug!(path = %path.display(), "loading suite configuration");
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// A submission directory ready for testing.
///
/// When the submission came as a zip archive, the extracted copy lives in a
/// temporary directory that is removed when this value is dropped.
#[derive(Debug)]
pub struct Submission {
    dir: PathBuf,
    _extracted: Option<TempDir>,
}

impl Submission {
    /// Directory containing the scripts to be tested.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Prepare a submission for testing.
///
/// A `.zip` submission is extracted and must contain a top-level directory
/// named after the assignment. Otherwise the submission must be an existing
/// directory; with `verify_dir_name` its name must be the assignment.
pub fn prepare_submission(
    submission: &Path,
    assignment: &str,
    verify_dir_name: bool,
) -> Result<Submission, StructuralError> {
    let is_zip = submission
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));

    let (dir, extracted) = if is_zip {
        let temp = tempfile::Builder::new()
            .prefix(&format!("{assignment}-"))
            .tempdir()
            .map_err(|e| StructuralError::io("creating extraction directory", e))?;
        debug!(
            archive = %submission.display(),
            into = %temp.path().display(),
            "expanding submission archive"
        );
        let file = File::open(submission).map_err(|e| {
            StructuralError::io(format!("opening {}", submission.display()), e)
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|source| StructuralError::Archive {
            path: submission.to_path_buf(),
            source,
        })?;
        archive
            .extract(temp.path())
            .map_err(|source| StructuralError::Archive {
                path: submission.to_path_buf(),
                source,
            })?;
        let dir = temp.path().join(assignment);
        if !dir.is_dir() {
            return Err(StructuralError::SubmissionArchiveLayout {
                archive: submission.to_path_buf(),
                assignment: assignment.to_string(),
            });
        }
        (dir, Some(temp))
    } else if !submission.is_dir() {
        return Err(StructuralError::MissingSubmission {
            path: submission.to_path_buf(),
        });
    } else {
        (submission.to_path_buf(), None)
    };

    let found = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if verify_dir_name && found != assignment {
        return Err(StructuralError::SubmissionDirName {
            assignment: assignment.to_string(),
            found,
        });
    }

    let dir = std::path::absolute(&dir)
        .map_err(|e| StructuralError::io(format!("resolving {}", dir.display()), e))?;
    Ok(Submission {
        dir,
        _extracted: extracted,
    })
}
