//! A single test scenario and its sandboxed execution.
//!
//! Each run happens in a fresh scratch directory. Captured standard output
//! and error become the synthetic files `stdout.txt` and `stderr.txt`, and
//! every regular file left in the scratch directory is then paired with the
//! test's expected files.

use crate::diff::{self, Content, DiffOptions};
use crate::error::StructuralError;
use crate::match_result::MatchResult;
use crate::mode::{ExecutionMode, is_hidden};
use crate::process::{self, Invocation, ProcessTerminator, RunOutput};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// Synthetic file holding captured standard output.
pub const STDOUT_FILE: &str = "stdout.txt";
/// Synthetic file holding captured standard error.
pub const STDERR_FILE: &str = "stderr.txt";

const TIMEOUT_NOTICE: &[u8] = b"Timeout expired.\n";
const MARKING_TIMEOUT_NOTICE: &[u8] = b"Marking script timed out.\n";

/// Extensions whose files are compared byte for byte.
const BINARY_EXTENSIONS: &[&str] = &[
    "a", "avi", "bin", "bmp", "class", "dll", "doc", "docx", "exe", "gif", "gz", "ico", "jar",
    "jpeg", "jpg", "json", "mov", "mp3", "mp4", "o", "obj", "ogg", "pdf", "png", "ppt", "pptx",
    "pyc", "rtf", "sh", "so", "tar", "tex", "tif", "tiff", "wasm", "wav", "webm", "xls", "xlsx",
    "zip",
];

/// Outcome of one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    /// Content differs even when whitespace is ignored.
    SoftFail,
    /// Only whitespace or line layout differs.
    HardFail,
    Error,
    Timeout,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Pass => "Pass",
            Verdict::SoftFail => "Fail",
            Verdict::HardFail => "Presentation Error",
            Verdict::Error => "Runtime Error",
            Verdict::Timeout => "Timeout Error",
        }
    }

    pub fn is_fail(self) -> bool {
        matches!(self, Verdict::SoftFail | Verdict::HardFail)
    }

    pub fn is_err(self) -> bool {
        matches!(self, Verdict::Error | Verdict::Timeout)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label of a possibly unset verdict.
pub fn result_label(result: Option<Verdict>) -> &'static str {
    result.map_or("N/A", Verdict::label)
}

/// Which produced file an expected file stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Stdout,
    Stderr,
    File(String),
}

impl OutputKind {
    pub fn from_type(output_type: &str) -> Self {
        match output_type {
            "stdout" => OutputKind::Stdout,
            "stderr" => OutputKind::Stderr,
            other => OutputKind::File(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedOutput {
    pub kind: OutputKind,
    pub path: PathBuf,
}

/// Details of a run that crashed, wrote to stderr, or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionFailure {
    /// Exit code, or the negated signal number.
    pub exit_status: Option<i32>,
    #[serde(serialize_with = "serialize_lossy")]
    pub stderr: Vec<u8>,
    pub error_log: PathBuf,
    pub bad_output: PathBuf,
}

fn serialize_lossy<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultDetail {
    Match(MatchResult),
    Failure(ExecutionFailure),
}

/// How produced files are judged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Comparison {
    /// Pair every produced file with the expected file of the same name.
    #[default]
    Expected,
    /// Hand each produced file's lines to a marking script. A zero exit
    /// status marks the test as a presentation error.
    MarkingScript { interpreter: String, script: PathBuf },
}

/// Everything a test run needs from its surroundings.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub submission_dir: &'a Path,
    pub timeout: Duration,
    /// Seed missing expected files from this run instead of comparing.
    pub generate: bool,
    pub diff: DiffOptions,
    pub mode: &'a ExecutionMode,
    pub comparison: &'a Comparison,
    pub env: &'a HashMap<String, String>,
    pub terminator: &'a dyn ProcessTerminator,
}

/// One named scenario for one script.
#[derive(Debug)]
pub struct TestCase {
    pub name: String,
    pub script_name: String,
    pub expected_dir: PathBuf,
    pub output_dir: PathBuf,
    pub error_dir: PathBuf,
    pub stdin: String,
    /// Right-trimmed contents of the `args` input.
    pub cli_args: String,
    /// Input files referenced from the command line, as absolute paths.
    pub cli_files: Vec<PathBuf>,
    pub resources: Vec<PathBuf>,
    pub expected: Vec<ExpectedOutput>,
    pub result: Option<Verdict>,
    pub detail: Option<ResultDetail>,
    pub command_line: Option<String>,
    pub duration: Duration,
    work_dir: Option<TempDir>,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        script_name: impl Into<String>,
        expected_dir: PathBuf,
        output_dir: PathBuf,
        error_dir: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            script_name: script_name.into(),
            expected_dir,
            output_dir,
            error_dir,
            stdin: String::new(),
            cli_args: String::new(),
            cli_files: Vec::new(),
            resources: Vec::new(),
            expected: Vec::new(),
            result: None,
            detail: None,
            command_line: None,
            duration: Duration::ZERO,
            work_dir: None,
        }
    }

    /// Register an input file: `stdin` and `args` are read, any other type
    /// becomes a command-line file.
    pub fn add_input(&mut self, input_type: &str, path: &Path) -> Result<(), StructuralError> {
        match input_type {
            "stdin" => self.stdin = read_text(path)?,
            "args" => self.cli_args = read_text(path)?.trim_end().to_string(),
            _ => {
                let abs = std::path::absolute(path)
                    .map_err(|e| StructuralError::io(format!("resolving {}", path.display()), e))?;
                self.cli_files.push(abs);
            }
        }
        Ok(())
    }

    pub fn add_resource(&mut self, path: PathBuf) {
        self.resources.push(path);
    }

    pub fn add_expected(&mut self, output_type: &str, path: PathBuf) {
        self.expected.push(ExpectedOutput {
            kind: OutputKind::from_type(output_type),
            path,
        });
    }

    /// Command-line arguments with every input file's bare name replaced by
    /// its quoted absolute path.
    pub fn cli(&self) -> Result<String, StructuralError> {
        if self.cli_args.is_empty() && self.cli_files.len() == 1 {
            return Ok(self.cli_files[0].display().to_string());
        }
        let mut args = self.cli_args.clone();
        for file in &self.cli_files {
            let base = file_name(file);
            let replaced = args.replace(&base, &format!("\"{}\"", file.display()));
            if replaced == args {
                return Err(StructuralError::UnreferencedCliFile {
                    file: base,
                    args: self.cli_args.clone(),
                });
            }
            args = replaced;
        }
        Ok(args)
    }

    /// Forget the outcome of the previous run.
    pub fn reset_result(&mut self) {
        self.result = None;
        self.detail = None;
    }

    pub fn is_pass(&self) -> bool {
        self.result == Some(Verdict::Pass)
    }

    pub fn is_fail(&self) -> bool {
        self.result.is_some_and(Verdict::is_fail)
    }

    pub fn is_err(&self) -> bool {
        self.result.is_some_and(Verdict::is_err)
    }

    pub fn result_label(&self) -> &'static str {
        result_label(self.result)
    }

    /// Captured standard error of a failed run.
    pub fn err_msg(&self) -> String {
        match (&self.result, &self.detail) {
            (Some(v), Some(ResultDetail::Failure(failure))) if v.is_err() => {
                String::from_utf8_lossy(&failure.stderr).into_owned()
            }
            _ => String::new(),
        }
    }

    /// Comparison details, if the run got that far.
    pub fn match_result(&self) -> Option<&MatchResult> {
        match &self.detail {
            Some(ResultDetail::Match(m)) => Some(m),
            _ => None,
        }
    }

    /// Scratch directory of the latest run.
    #[cfg(test)]
    pub(crate) fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_ref().map(TempDir::path)
    }

    /// Execute the test and classify the outcome.
    ///
    /// Returns `Ok(None)` when the run only generated expected files. Every
    /// call starts from a clean result.
    pub fn run(&mut self, ctx: &RunContext<'_>) -> Result<Option<Verdict>, StructuralError> {
        let program = ctx.mode.program_path(ctx.submission_dir, &self.script_name);
        if !program.exists() {
            return Err(StructuralError::MissingScript {
                script: self.script_name.clone(),
                dir: ctx.submission_dir.to_path_buf(),
            });
        }
        if self.expected.is_empty() && !ctx.generate {
            return Err(StructuralError::MissingExpectedOutputs {
                test: self.name.clone(),
                script: self.script_name.clone(),
            });
        }
        let args = self.cli()?;

        self.reset_result();
        self.work_dir = None;

        let work = tempfile::Builder::new()
            .prefix("work-")
            .tempdir()
            .map_err(|e| StructuralError::io("creating scratch directory", e))?;
        let work_path = work.path().to_path_buf();
        self.work_dir = Some(work);

        let mut excluded: BTreeSet<String> = self.copy_resources(&work_path)?.into_iter().collect();
        excluded.extend(ctx.mode.prepare(&program, &work_path)?);
        self.purge_stale_artifacts()?;

        let command_line = ctx.mode.command_line(&program, &args);
        debug!(
            test = %self.name,
            work_dir = %work_path.display(),
            command = %command_line,
            "running test"
        );
        self.command_line = Some(command_line.clone());

        let invocation = Invocation {
            command_line,
            work_dir: work_path.clone(),
            stdin: self.stdin.clone(),
            env: ctx.env.clone(),
        };
        let mut out = process::run(&invocation, ctx.timeout, ctx.terminator)
            .map_err(|e| StructuralError::io(format!("running test {}", self.name), e))?;
        self.duration = out.duration;
        if out.timed_out {
            let mut stderr = TIMEOUT_NOTICE.to_vec();
            stderr.append(&mut out.stderr);
            out.stderr = stderr;
        }

        let error_log = self.error_dir.join(format!("{}.txt", self.name));
        if out.timed_out || out.failed() || !out.stderr.is_empty() {
            let bad_output = self.output_dir.join(format!("{}.stdout.txt", self.name));
            write_file(&error_log, &out.stderr)?;
            write_file(&bad_output, &out.stdout)?;
            self.result = Some(if out.timed_out {
                Verdict::Timeout
            } else {
                Verdict::Error
            });
            self.detail = Some(ResultDetail::Failure(ExecutionFailure {
                exit_status: out.status_code(),
                stderr: out.stderr.clone(),
                error_log,
                bad_output,
            }));
        } else {
            write_file(&work_path.join(STDERR_FILE), &out.stderr)?;
            write_file(&work_path.join(STDOUT_FILE), &out.stdout)?;
        }

        self.compare_results(&out, &work_path, &excluded, ctx)?;
        Ok(self.result)
    }

    /// Copy resources into the scratch directory under their natural names.
    fn copy_resources(&self, work_path: &Path) -> Result<Vec<String>, StructuralError> {
        let prefix = format!("{}-", self.name);
        let mut names = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            let base = file_name(resource);
            let pure = base.strip_prefix(&prefix).unwrap_or(&base).to_string();
            let dest = work_path.join(&pure);
            debug!(from = %resource.display(), to = %dest.display(), "copying resource");
            std::fs::copy(resource, &dest)
                .map_err(|e| StructuralError::io(format!("copying {}", resource.display()), e))?;
            names.push(pure);
        }
        Ok(names)
    }

    /// Remove outputs and error logs left by an earlier run of this test.
    fn purge_stale_artifacts(&self) -> Result<(), StructuralError> {
        let dash = format!("{}-", self.name);
        let dot = format!("{}.", self.name);
        let log = format!("{}.txt", self.name);
        remove_matching(&self.output_dir, |n| n.starts_with(&dash) || n.starts_with(&dot))?;
        remove_matching(&self.error_dir, |n| n == log || n.starts_with(&dash))
    }

    fn compare_results(
        &mut self,
        out: &RunOutput,
        work_path: &Path,
        excluded: &BTreeSet<String>,
        ctx: &RunContext<'_>,
    ) -> Result<(), StructuralError> {
        let outputs = scratch_files(work_path)?;

        if self.expected.is_empty() {
            info!(test = %self.name, script = %self.script_name, "generating expected result files");
            self.create_expected_files(&outputs)?;
            return Ok(());
        }

        let mut result = MatchResult::new(
            outputs.iter().cloned(),
            self.expected.iter().map(|e| e.path.clone()),
        );
        let mut marked_presentation = false;
        let mut marking_timeout = None;

        for output in &outputs {
            let base = file_name(output);
            if excluded.contains(&base) || base == "__pycache__" {
                result.ignore_output(output);
                continue;
            }
            let actual_name = format!("{}-{}", self.name, base);
            let actual_dest = self.output_dir.join(&actual_name);
            move_file(output, &actual_dest)?;
            let actual = read_content(&actual_dest)?;

            match ctx.comparison {
                Comparison::MarkingScript {
                    interpreter,
                    script,
                } => {
                    let marked = run_marking_script(interpreter, script, &actual, ctx)?;
                    if marked.timed_out {
                        marking_timeout = Some((marked, actual_dest));
                        break;
                    }
                    if !marked.failed() {
                        marked_presentation = true;
                    }
                }
                Comparison::Expected => {
                    let Some(expected_path) = self
                        .expected
                        .iter()
                        .map(|e| &e.path)
                        .find(|p| file_name(p) == actual_name)
                    else {
                        continue;
                    };
                    debug!(
                        expected = %expected_path.display(),
                        actual = %actual_dest.display(),
                        "comparing"
                    );
                    let expected = read_content(expected_path)?;
                    let outcome = diff::diff(&actual, &expected, ctx.diff);
                    if !outcome.is_match() {
                        let marker = self.output_dir.join(format!("{actual_name}.err"));
                        write_file(&marker, &out.stdout)?;
                    }
                    let expected_path = expected_path.clone();
                    result.record_pair(output, &expected_path, actual_dest, outcome);
                }
            }
        }

        if let Some((marked, bad_output)) = marking_timeout {
            if !self.is_err() {
                self.record_marking_timeout(&marked, bad_output)?;
            }
            return Ok(());
        }

        let compared = match ctx.comparison {
            Comparison::MarkingScript { .. } if marked_presentation => Verdict::HardFail,
            Comparison::MarkingScript { .. } => Verdict::Pass,
            Comparison::Expected => result.verdict(),
        };

        let mut missing = None;
        if matches!(ctx.comparison, Comparison::Expected) {
            missing = self.report_unmatched_expected(&result, &out.stderr)?;
        }

        match self.result {
            Some(v) if v.is_err() => {}
            _ if compared == Verdict::Error => {
                self.result = Some(Verdict::Error);
                self.detail = missing.map(ResultDetail::Failure);
            }
            _ => {
                self.result = Some(compared);
                self.detail = Some(ResultDetail::Match(result));
            }
        }
        Ok(())
    }

    /// A marking script that outlived the time limit turns the test into an
    /// error.
    fn record_marking_timeout(
        &mut self,
        marked: &RunOutput,
        bad_output: PathBuf,
    ) -> Result<(), StructuralError> {
        let mut stderr = MARKING_TIMEOUT_NOTICE.to_vec();
        stderr.extend_from_slice(&marked.stderr);
        let error_log = self.error_dir.join(format!("{}.txt", self.name));
        write_file(&error_log, &stderr)?;
        self.result = Some(Verdict::Error);
        self.detail = Some(ResultDetail::Failure(ExecutionFailure {
            exit_status: marked.status_code(),
            stderr,
            error_log,
            bad_output,
        }));
        Ok(())
    }

    /// Write an error log for every expected file nothing matched.
    ///
    /// Returns the failure details describing the last such file.
    fn report_unmatched_expected(
        &self,
        result: &MatchResult,
        stderr: &[u8],
    ) -> Result<Option<ExecutionFailure>, StructuralError> {
        let mut message = String::from_utf8_lossy(stderr).into_owned();
        let mut failure = None;
        for path in result.missing_outputs() {
            message.push_str(&format!(
                "\nExpected file \"{}\" has no output file match",
                path.display()
            ));
            debug!(test = %self.name, "{message}");
            let base = file_name(path);
            let error_log = self.error_dir.join(&base);
            write_file(&error_log, format!("{message}\n").as_bytes())?;
            failure = Some(ExecutionFailure {
                exit_status: Some(0),
                stderr: message.clone().into_bytes(),
                error_log,
                bad_output: self.output_dir.join(&base),
            });
        }
        Ok(failure)
    }

    /// Move captured stdout/stderr into the expected directory.
    fn create_expected_files(&mut self, outputs: &[PathBuf]) -> Result<(), StructuralError> {
        for output in outputs {
            let base = file_name(output);
            if base != STDOUT_FILE && base != STDERR_FILE {
                continue;
            }
            let dest = self.expected_dir.join(format!("{}-{}", self.name, base));
            info!(from = %output.display(), to = %dest.display(), "saving expected output");
            move_file(output, &dest)?;
            let output_type = base.trim_end_matches(".txt").to_string();
            self.add_expected(&output_type, dest);
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_text(path: &Path) -> Result<String, StructuralError> {
    let bytes = std::fs::read(path)
        .map_err(|e| StructuralError::io(format!("reading {}", path.display()), e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), StructuralError> {
    std::fs::write(path, contents)
        .map_err(|e| StructuralError::io(format!("writing {}", path.display()), e))
}

/// Whether a file is compared line by line, judged by its extension.
pub fn is_text_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_none_or(|ext| !BINARY_EXTENSIONS.contains(&ext.as_str()))
}

fn read_content(path: &Path) -> Result<Content, StructuralError> {
    let bytes = std::fs::read(path)
        .map_err(|e| StructuralError::io(format!("reading {}", path.display()), e))?;
    Ok(Content::from_bytes(bytes, is_text_file(path)))
}

/// Rename, falling back to copy and delete across file systems.
fn move_file(from: &Path, to: &Path) -> Result<(), StructuralError> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)
        .and_then(|_| std::fs::remove_file(from))
        .map_err(|e| {
            StructuralError::io(format!("moving {} to {}", from.display(), to.display()), e)
        })
}

/// Visible regular files in the scratch directory, sorted.
fn scratch_files(dir: &Path) -> Result<Vec<PathBuf>, StructuralError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| StructuralError::io(format!("listing {}", dir.display()), e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && !is_hidden(p))
        .collect();
    files.sort();
    Ok(files)
}

fn remove_matching(dir: &Path, pred: impl Fn(&str) -> bool) -> Result<(), StructuralError> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && pred(&file_name(&path)) {
            debug!(path = %path.display(), "removing stale artifact");
            std::fs::remove_file(&path)
                .map_err(|e| StructuralError::io(format!("removing {}", path.display()), e))?;
        }
    }
    Ok(())
}

/// Run the marking script over one produced file, under the test's time
/// limit.
fn run_marking_script(
    interpreter: &str,
    script: &Path,
    actual: &Content,
    ctx: &RunContext<'_>,
) -> Result<RunOutput, StructuralError> {
    let lines: Vec<String> = match actual {
        Content::Text(lines) => lines.clone(),
        Content::Binary(bytes) => diff::split_lines(&String::from_utf8_lossy(bytes)),
    };
    let mut cmd = std::process::Command::new(interpreter);
    cmd.arg(script).args(&lines);
    let out = process::run_command(cmd, "", ctx.timeout, ctx.terminator)
        .map_err(|e| StructuralError::io(format!("running marking script {}", script.display()), e))?;
    debug!(
        script = %script.display(),
        status = ?out.status_code(),
        timed_out = out.timed_out,
        "marking script finished"
    );
    Ok(out)
}
