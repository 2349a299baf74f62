//! Per-test aggregation of file comparisons.

use crate::diff::{Diff, DiffOutcome};
use crate::test_case::Verdict;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

const LEGEND: &str = "\
This tool summarizes the differences between your output and the expected output for a given test case.

Symbol Legend:
-       your output is missing this expected line
+       you output this line but it was not expected
?       highlights the exact change in a line
        using + or - if applicable
#       for Presentation Error only: spaces and
        newlines display visibly as #

";

/// A produced file whose contents differ from its expected counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMismatch {
    pub soft: Option<Diff>,
    pub hard: Option<Diff>,
    /// Where the produced file was moved to (inside `Outputs`).
    pub actual_path: PathBuf,
    pub expected_path: PathBuf,
}

impl FileMismatch {
    /// The diff shown to a human: the soft diff if there is one.
    pub fn shown_diff(&self) -> Option<&Diff> {
        self.soft.as_ref().or(self.hard.as_ref())
    }
}

/// Outcome of pairing every produced file with the expected files of a test.
///
/// A file appears in at most one of `mismatches`, `unmatched_output_files`
/// and `unmatched_expected_files`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    /// Keyed by the produced file's name inside the scratch directory.
    pub mismatches: BTreeMap<String, FileMismatch>,
    pub unmatched_output_files: BTreeSet<PathBuf>,
    pub unmatched_expected_files: BTreeSet<PathBuf>,
}

impl MatchResult {
    /// Start with every produced and every expected file unmatched.
    pub fn new(
        outputs: impl IntoIterator<Item = PathBuf>,
        expected: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        Self {
            mismatches: BTreeMap::new(),
            unmatched_output_files: outputs.into_iter().collect(),
            unmatched_expected_files: expected.into_iter().collect(),
        }
    }

    /// Drop a produced file from comparison without affecting the verdict.
    pub fn ignore_output(&mut self, output: &Path) {
        self.unmatched_output_files.remove(output);
    }

    /// Record that `output` was paired with `expected`.
    ///
    /// Both leave their unmatched sets. The pair is kept only when the
    /// comparison found a difference.
    pub fn record_pair(
        &mut self,
        output: &Path,
        expected: &Path,
        actual_dest: PathBuf,
        outcome: DiffOutcome,
    ) {
        self.unmatched_output_files.remove(output);
        self.unmatched_expected_files.remove(expected);
        if outcome.is_match() {
            return;
        }
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| output.display().to_string());
        self.mismatches.insert(
            name,
            FileMismatch {
                soft: outcome.soft,
                hard: outcome.hard,
                actual_path: actual_dest,
                expected_path: expected.to_path_buf(),
            },
        );
    }

    pub fn has_diff(&self) -> bool {
        !self.unmatched_output_files.is_empty()
            || !self.unmatched_expected_files.is_empty()
            || !self.mismatches.is_empty()
    }

    /// Verdict implied by the comparison alone.
    ///
    /// Content mismatches outrank presentation mismatches, which outrank a
    /// missing output file.
    pub fn verdict(&self) -> Verdict {
        if self.mismatches.values().any(|m| m.soft.is_some()) {
            Verdict::SoftFail
        } else if self.mismatches.values().any(|m| m.hard.is_some()) {
            Verdict::HardFail
        } else if !self.unmatched_expected_files.is_empty() {
            Verdict::Error
        } else {
            Verdict::Pass
        }
    }

    /// `(actual, expected)` paths of every mismatching file, by file name.
    pub fn diff_files(&self) -> Vec<(&Path, &Path)> {
        self.mismatches
            .values()
            .map(|m| (m.actual_path.as_path(), m.expected_path.as_path()))
            .collect()
    }

    pub fn extra_outputs(&self) -> &BTreeSet<PathBuf> {
        &self.unmatched_output_files
    }

    pub fn missing_outputs(&self) -> &BTreeSet<PathBuf> {
        &self.unmatched_expected_files
    }
}

fn names(paths: &BTreeSet<PathBuf>) -> String {
    paths
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quick-difference rendering for a human reader.
impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.unmatched_output_files.is_empty() {
            writeln!(f, "Extra output files: {}", names(&self.unmatched_output_files))?;
        }
        if !self.unmatched_expected_files.is_empty() {
            writeln!(
                f,
                "Missing output files: {}",
                names(&self.unmatched_expected_files)
            )?;
        }
        if self.mismatches.is_empty() {
            return Ok(());
        }
        f.write_str(LEGEND)?;
        for (name, mismatch) in &self.mismatches {
            writeln!(f, "Difference in output: {name}")?;
            writeln!(f, "------------")?;
            if let Some(diff) = mismatch.shown_diff() {
                write!(f, "{diff}")?;
            }
            writeln!(f, "------------")?;
        }
        Ok(())
    }
}
