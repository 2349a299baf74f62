//! End-to-end tests driving the `testcenter` binary.
//!
//! The submitted `prog.py` is really a shell script; the suite configuration
//! points the interpreter at `sh` so no Python install is needed.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn testcenter_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_testcenter"))
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

struct Fixture {
    root: TempDir,
}

impl Fixture {
    /// Suite for assignment `as-1-1` with a `prog.py` that echoes stdin.
    fn new(tests: &[(&str, &str, Option<&str>)]) -> Self {
        let root = TempDir::new().unwrap();
        let tests_root = root.path().join("tests");
        let dir = tests_root.join("as-1-1-prog.py-test");
        for sub in ["Inputs", "Resources", "Expected", "Outputs", "Errors"] {
            fs::create_dir_all(dir.join(sub)).unwrap();
        }
        for (name, stdin, expected) in tests {
            write(&dir.join(format!("Inputs/{name}-stdin.txt")), stdin);
            if let Some(expected) = expected {
                write(&dir.join(format!("Expected/{name}-stdout.txt")), expected);
            }
        }
        write(&tests_root.join("testcenter.yaml"), "interpreter: sh\ntimeout: 10\n");
        write(&root.path().join("as-1-1/prog.py"), "cat\n");
        Self { root }
    }

    fn tests(&self) -> PathBuf {
        self.root.path().join("tests")
    }

    fn script_dir(&self) -> PathBuf {
        self.tests().join("as-1-1-prog.py-test")
    }

    fn submission(&self) -> PathBuf {
        self.root.path().join("as-1-1")
    }

    fn run(&self, extra: &[&str]) -> Output {
        testcenter_cmd()
            .arg("run")
            .arg("--submission")
            .arg(self.submission())
            .arg("--test-directory")
            .arg(self.tests())
            .args(extra)
            .output()
            .unwrap()
    }
}

#[test]
fn passing_suite_exits_zero() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("hello\n")), ("t2", "x\n", Some("x\n"))]);
    let output = fixture.run(&[]);

    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout(&output),
        stderr(&output)
    );
    let out = stdout(&output);
    assert!(out.contains("Running t1... Pass"));
    assert!(out.contains("Running t2... Pass"));
    assert!(out.contains("All tests passed."));
    assert!(out.contains(
        "Number of tests: 2 Errors: 0 Serious failures: 0 Presentation errors: 0"
    ));
    assert!(
        fixture
            .script_dir()
            .join("Outputs/t1-stdout.txt")
            .is_file()
    );
}

#[test]
fn wrong_output_exits_one() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("goodbye\n")), ("t2", "x\n", Some("x \n"))]);
    let output = fixture.run(&[]);

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("Running t1... Failed with incorrect output"));
    assert!(out.contains("Running t2... Presentation error"));
    assert!(!out.contains("All tests passed."));
    assert!(out.contains("Serious failures: 1 Presentation errors: 1"));
}

#[test]
fn presentation_errors_alone_still_succeed() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("hello  \n"))]);
    let output = fixture.run(&[]);

    assert!(output.status.success(), "stdout: {}", stdout(&output));
    assert!(stdout(&output).contains("Presentation errors: 1"));
}

#[test]
fn verbose_shows_diff() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("goodbye\n"))]);
    let output = fixture.run(&["--verbose"]);

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("Script prog.py on test t1: Failed with incorrect output"));
    assert!(out.contains("goodbye"));
}

#[test]
fn unexpected_root_file_is_structural_error() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("hello\n"))]);
    write(&fixture.tests().join("notes.txt"), "stray\n");
    let output = fixture.run(&[]);

    assert_eq!(output.status.code(), Some(2));
    let err = stderr(&output);
    assert!(err.starts_with("Error:\n"), "stderr: {err}");
    assert!(err.contains("notes.txt"));
}

#[test]
fn invalid_config_is_structural_error() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("hello\n"))]);
    write(&fixture.tests().join("testcenter.yaml"), "bogus: 1\n");
    let output = fixture.run(&[]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("invalid suite configuration"));
}

#[test]
fn missing_submission_is_structural_error() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("hello\n"))]);
    fs::remove_dir_all(fixture.submission()).unwrap();
    let output = fixture.run(&[]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).starts_with("Error:\n"));
}

#[test]
fn missing_expected_output_without_generate_is_error() {
    let fixture = Fixture::new(&[("t1", "hello\n", None)]);
    let output = fixture.run(&[]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn generate_writes_expected_output() {
    let fixture = Fixture::new(&[("t1", "hello\n", None)]);
    let output = fixture.run(&["--generate"]);

    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout(&output),
        stderr(&output)
    );
    assert!(stdout(&output).contains("Running t1... Generated expected output"));
    let expected = fixture.script_dir().join("Expected/t1-stdout.txt");
    assert_eq!(fs::read_to_string(expected).unwrap(), "hello\n");

    // The generated output now makes the test pass.
    let output = fixture.run(&[]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Running t1... Pass"));
}

#[test]
fn stop_early_skips_remaining_tests() {
    let fixture = Fixture::new(&[
        ("a", "1\n", Some("1\n")),
        ("b", "2\n", Some("9\n")),
        ("c", "3\n", Some("3\n")),
    ]);
    let output = fixture.run(&["--stop-early"]);

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("Running b... Failed with incorrect output"));
    assert!(out.contains("STOPPING EARLY"));
    assert!(!out.contains("Running c..."));
}

#[test]
fn timeout_flag_overrides_config() {
    let fixture = Fixture::new(&[("t1", "", Some("done\n"))]);
    write(&fixture.submission().join("prog.py"), "sleep 5\necho done\n");
    let output = fixture.run(&["--timeout", "1"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("Running t1... Time limit exceeded."));
}

#[test]
fn json_output() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("hello\n")), ("t2", "x\n", Some("y\n"))]);
    let output = fixture.run(&["--output", "json"]);

    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["assignment"], "as-1-1");
    assert_eq!(report["summary"]["tests"], 2);
    assert_eq!(report["summary"]["soft_fails"], 1);
    assert_eq!(report["stopped_early"], false);

    let tests = report["tests"].as_array().unwrap();
    assert_eq!(tests.len(), 2);
    assert_eq!(tests[0]["name"], "t1");
    assert_eq!(tests[0]["result"], "pass");
    assert_eq!(tests[1]["result"], "soft_fail");
    assert_eq!(tests[1]["label"], "Fail");
}

#[test]
fn junit_output() {
    let fixture = Fixture::new(&[("t1", "hello\n", Some("hello\n")), ("t2", "x\n", Some("y\n"))]);
    let output = fixture.run(&["--output", "junit"]);

    assert_eq!(output.status.code(), Some(1));
    let xml = stdout(&output);
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<testsuite name=\"prog.py\""));
    assert!(xml.contains("<testcase name=\"t1\""));
    assert!(xml.contains("<failure"));
}

#[test]
fn validate_lists_tests_per_script() {
    let fixture = Fixture::new(&[("t1", "a\n", Some("a\n")), ("t2", "b\n", Some("b\n"))]);
    let output = testcenter_cmd()
        .arg("validate")
        .arg("--test-directory")
        .arg(fixture.tests())
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("✓ prog.py (2 tests)"));
    assert!(out.contains("as-1-1"));
}

#[test]
fn validate_reports_bad_directory() {
    let fixture = Fixture::new(&[("t1", "a\n", Some("a\n"))]);
    fs::remove_dir_all(fixture.script_dir().join("Errors")).unwrap();
    let output = testcenter_cmd()
        .arg("validate")
        .arg("--test-directory")
        .arg(fixture.tests())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("Errors"));
}

#[test]
fn schema_prints_json_schema() {
    let output = testcenter_cmd().arg("schema").output().unwrap();

    assert!(output.status.success());
    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema["properties"]["interpreter"].is_object());
    assert!(schema["properties"]["timeout"].is_object());
}
