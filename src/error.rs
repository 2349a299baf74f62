//! Error types.
//!
//! Structural errors describe a malformed test directory or submission. They
//! abort the whole run before (or while) tests execute. Failures of the tested
//! program itself are never errors here; they become a [`Verdict`].
//!
//! [`Verdict`]: crate::test_case::Verdict

use std::path::PathBuf;
use thiserror::Error;

/// A fatal problem with the test directory layout or the submission.
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error(
        "The marking directory is only allowed to contain one or more \
         \"<assignment>-<scriptfile>-test\" directories, containing the tests, \
         along with the files: {allowed}. The test will not run while the \
         following file is in the directory: {}",
        path.display()
    )]
    UnexpectedRootEntry { path: PathBuf, allowed: String },

    #[error("Unexpected files in {}: {}", dir.display(), files.join(" "))]
    UnexpectedCacheFiles { dir: PathBuf, files: Vec<String> },

    #[error("The marking directory contains testcases belonging to multiple assignments: ({first},{second})")]
    MultipleAssignments { first: String, second: String },

    #[error(
        "The marking directory must contain at least one testcase directory \
         named \"<assignment>-<scriptfile>-test\", where <assignment> is of the \
         form \"as-<courseid>-<asnnum>\". The search in {} with pattern {pattern} \
         did not return any such directories.",
        dir.display()
    )]
    NoTestDirectories { dir: PathBuf, pattern: String },

    #[error("Missing directory {}", path.display())]
    MissingSubdirectory { path: PathBuf },

    #[error(
        "File {file} in directory {} unexpected: the filename did not match the pattern {pattern}.",
        dir.display()
    )]
    UnexpectedInputFile {
        dir: PathBuf,
        file: String,
        pattern: String,
    },

    #[error("Unexpected file {} (expected pattern {pattern})", path.display())]
    UnexpectedExpectedFile { path: PathBuf, pattern: String },

    #[error("Expected output ({}) found with no corresponding input", path.display())]
    DanglingExpectedOutput { path: PathBuf },

    #[error("Submission is missing script {script} from directory {}", dir.display())]
    MissingScript { script: String, dir: PathBuf },

    #[error(
        "The test file {file} found in the input directory does not appear to be \
         called by the arguments {args}"
    )]
    UnreferencedCliFile { file: String, args: String },

    #[error("Testcase {test} for script {script} missing Expected directory.")]
    MissingExpectedOutputs { test: String, script: String },

    #[error("Missing directory {}", path.display())]
    MissingSubmission { path: PathBuf },

    #[error("The zip file must contain a directory called {assignment}")]
    SubmissionArchiveLayout { archive: PathBuf, assignment: String },

    #[error("The submission directory must end with {assignment}, not with {found}")]
    SubmissionDirName { assignment: String, found: String },

    #[error("cannot read archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("invalid build command {command:?}: {source}")]
    BuildCommand {
        command: String,
        #[source]
        source: crate::env::InterpolateError,
    },

    #[error("invalid environment in suite configuration: {0}")]
    Environment(#[source] crate::env::InterpolateError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StructuralError {
    /// Wrap an I/O failure with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StructuralError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Error raised while loading the suite configuration file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
}
