//! How a submission is executed.
//!
//! A script named `*.py` runs under an interpreter. Anything else is a
//! compiled program: a prebuilt entry point inside the submission, run next
//! to copies of the submission's files so multi-file builds keep working.

use crate::env;
use crate::error::StructuralError;
use crate::process::{self, Invocation, ProcessTerminator};
use crate::schema::BuildConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interpreter used for scripts when the configuration names none.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Entry point of compiled submissions, relative to the submission directory.
pub const DEFAULT_ENTRY: &str = ".build/build.sh";

/// Directory (inside the submission) holding build output.
pub const BUILD_DIR: &str = ".build";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// `<interpreter> "<script>" <args>`
    InterpretedScript { interpreter: String },
    /// `"<entry>" <args>`, run next to copies of the submission's files.
    CompiledProgram { entry: PathBuf },
}

impl ExecutionMode {
    /// Choose the mode for one script.
    pub fn for_script(
        script_name: &str,
        python_only: bool,
        interpreter: &str,
        entry: &Path,
    ) -> Self {
        if python_only || script_name.ends_with(".py") {
            ExecutionMode::InterpretedScript {
                interpreter: interpreter.to_string(),
            }
        } else {
            ExecutionMode::CompiledProgram {
                entry: entry.to_path_buf(),
            }
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self, ExecutionMode::CompiledProgram { .. })
    }

    /// Absolute path of the program to run for `script_name`.
    pub fn program_path(&self, submission_dir: &Path, script_name: &str) -> PathBuf {
        match self {
            ExecutionMode::InterpretedScript { .. } => submission_dir.join(script_name),
            ExecutionMode::CompiledProgram { entry } => submission_dir.join(entry),
        }
    }

    /// Shell command line invoking `program` with the composed arguments.
    pub fn command_line(&self, program: &Path, args: &str) -> String {
        let line = match self {
            ExecutionMode::InterpretedScript { interpreter } => {
                format!("{interpreter} \"{}\" {args}", program.display())
            }
            ExecutionMode::CompiledProgram { .. } => {
                format!("\"{}\" {args}", program.display())
            }
        };
        line.trim_end().to_string()
    }

    /// Stage extra files in the scratch directory before a run.
    ///
    /// Compiled programs get copies of every file next to the entry point and
    /// in the directory above it. Returns the names of the copied files so
    /// they can be excluded from output comparison.
    pub fn prepare(&self, program: &Path, work_dir: &Path) -> Result<Vec<String>, StructuralError> {
        let ExecutionMode::CompiledProgram { .. } = self else {
            return Ok(Vec::new());
        };
        let mut copied = Vec::new();
        let Some(program_dir) = program.parent() else {
            return Ok(copied);
        };
        copy_files(program_dir, work_dir, &mut copied)?;
        if let Some(up) = program_dir.parent() {
            copy_files(up, work_dir, &mut copied)?;
        }
        Ok(copied)
    }
}

fn copy_files(from: &Path, to: &Path, copied: &mut Vec<String>) -> Result<(), StructuralError> {
    let entries = std::fs::read_dir(from)
        .map_err(|e| StructuralError::io(format!("listing {}", from.display()), e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| !is_hidden(p))
        .collect();
    files.sort();
    for file in files {
        let Some(name) = file.file_name() else { continue };
        let dest = to.join(name);
        debug!(from = %file.display(), to = %dest.display(), "copying source file");
        std::fs::copy(&file, &dest)
            .map_err(|e| StructuralError::io(format!("copying {}", file.display()), e))?;
        copied.push(name.to_string_lossy().into_owned());
    }
    Ok(())
}

/// Names starting with a dot are invisible to directory scans.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

/// Result of the suite-wide build step. Removes the build artifact when
/// dropped, so the artifact never outlives the run, early stops included.
#[derive(Debug)]
pub struct BuildArtifact {
    artifact: Option<PathBuf>,
}

impl BuildArtifact {
    /// Run the configured build command once for `submission_dir`.
    ///
    /// A failing build is reported but does not abort the run: the tests
    /// that depend on it fail individually.
    pub fn build(
        config: &BuildConfig,
        submission_dir: &Path,
        extra_env: &HashMap<String, String>,
        timeout: Duration,
        terminator: &dyn ProcessTerminator,
    ) -> Result<Self, StructuralError> {
        let build_dir = submission_dir.join(BUILD_DIR);
        let mut vars = extra_env.clone();
        vars.insert(
            "SUBMISSION".to_string(),
            submission_dir.display().to_string(),
        );
        vars.insert("BUILD_DIR".to_string(), build_dir.display().to_string());
        let command_line =
            env::interpolate(&config.command, &vars).map_err(|source| {
                StructuralError::BuildCommand {
                    command: config.command.clone(),
                    source,
                }
            })?;

        std::fs::create_dir_all(&build_dir)
            .map_err(|e| StructuralError::io(format!("creating {}", build_dir.display()), e))?;

        info!(command = %command_line, "building submission");
        let invocation = Invocation {
            command_line,
            work_dir: submission_dir.to_path_buf(),
            stdin: String::new(),
            env: extra_env.clone(),
        };
        match process::run(&invocation, timeout, terminator) {
            Ok(out) if out.failed() || out.timed_out => warn!(
                status = ?out.status_code(),
                stderr = %String::from_utf8_lossy(&out.stderr),
                "build command failed"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "build command could not be started"),
        }

        Ok(Self {
            artifact: config.artifact.as_ref().map(|a| submission_dir.join(a)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }
}

impl Drop for BuildArtifact {
    fn drop(&mut self) {
        if let Some(path) = self.path()
            && path.exists()
        {
            debug!(path = %path.display(), "removing build artifact");
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove build artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn py_scripts_are_interpreted() {
        let entry = Path::new(DEFAULT_ENTRY);
        let mode = ExecutionMode::for_script("hello.py", false, "python3", entry);
        assert!(!mode.is_compiled());
        let mode = ExecutionMode::for_script("matrix", false, "python3", entry);
        assert!(mode.is_compiled());
        let mode = ExecutionMode::for_script("matrix", true, "python3", entry);
        assert!(!mode.is_compiled());
    }

    #[test]
    fn command_lines() {
        let script = ExecutionMode::InterpretedScript {
            interpreter: "python3".to_string(),
        };
        assert_eq!(
            script.command_line(Path::new("/sub/hello.py"), "\"/in/a.txt\" -n 3"),
            "python3 \"/sub/hello.py\" \"/in/a.txt\" -n 3"
        );
        assert_eq!(
            script.command_line(Path::new("/sub/hello.py"), ""),
            "python3 \"/sub/hello.py\""
        );

        let program = ExecutionMode::CompiledProgram {
            entry: PathBuf::from(DEFAULT_ENTRY),
        };
        let path = program.program_path(Path::new("/sub"), "matrix");
        assert_eq!(path, PathBuf::from("/sub/.build/build.sh"));
        assert_eq!(program.command_line(&path, ""), "\"/sub/.build/build.sh\"");
    }

    #[test]
    fn compiled_mode_copies_sources() {
        let sub = tempdir().unwrap();
        let work = tempdir().unwrap();
        std::fs::create_dir(sub.path().join(BUILD_DIR)).unwrap();
        std::fs::write(sub.path().join(".build/build.sh"), "#!/bin/sh\n").unwrap();
        std::fs::write(sub.path().join("matrix.cpp"), "int main(){}").unwrap();
        std::fs::write(sub.path().join("matrix.h"), "").unwrap();

        let mode = ExecutionMode::CompiledProgram {
            entry: PathBuf::from(DEFAULT_ENTRY),
        };
        let program = mode.program_path(sub.path(), "matrix");
        let copied = mode.prepare(&program, work.path()).unwrap();
        assert_eq!(copied, vec!["build.sh", "matrix.cpp", "matrix.h"]);
        assert!(work.path().join("matrix.cpp").is_file());

        let script = ExecutionMode::InterpretedScript {
            interpreter: "python3".to_string(),
        };
        assert!(script.prepare(&program, work.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn build_artifact_is_removed_on_drop() {
        let sub = tempdir().unwrap();
        let config = BuildConfig {
            command: "echo built > ${BUILD_DIR}/prog".to_string(),
            artifact: Some(PathBuf::from(".build/prog")),
        };
        let artifact = BuildArtifact::build(
            &config,
            sub.path(),
            &HashMap::new(),
            Duration::from_secs(5),
            &crate::process::ProcessGroupTerminator,
        )
        .unwrap();
        let path = artifact.path().unwrap().to_path_buf();
        assert!(path.is_file());
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn build_command_with_unclosed_variable() {
        let sub = tempdir().unwrap();
        let config = BuildConfig {
            command: "make ${OOPS".to_string(),
            artifact: None,
        };
        let err = BuildArtifact::build(
            &config,
            sub.path(),
            &HashMap::new(),
            Duration::from_secs(5),
            &crate::process::DirectTerminator,
        )
        .unwrap_err();
        assert!(matches!(err, StructuralError::BuildCommand { .. }));
    }
}
