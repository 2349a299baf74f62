//! Test discovery and orchestration.
//!
//! A test directory holds one `<assignment>-<script>-test` directory per
//! script under test, each with five fixed subdirectories:
//!
//! ```text
//! as-174-2-hello.py-test/
//!   Inputs/      t1-stdin.txt  t1-args.txt  t1-data.txt
//!   Resources/   t1-table.csv  shared.txt
//!   Expected/    t1-stdout.txt t1-report.txt
//!   Outputs/     (written by runs)
//!   Errors/      (written by runs)
//! ```
//!
//! Discovery either yields a fully validated suite or a [`StructuralError`];
//! tests then run one at a time in lexicographic order.

use crate::diff::DiffOptions;
use crate::env;
use crate::error::StructuralError;
use crate::loader::SUITE_CONFIG_FILENAMES;
use crate::mode::{BuildArtifact, DEFAULT_ENTRY, DEFAULT_INTERPRETER, ExecutionMode, is_hidden};
use crate::process::{ProcessTerminator, terminator_for};
use crate::platform::Platform;
use crate::schema::{BuildConfig, SuiteConfig};
use crate::test_case::{Comparison, RunContext, TestCase, Verdict};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

/// Test directory names when any program may be tested.
pub const TEST_DIR_PATTERN_ANY: &str = r"^(as-(\d+)-(\d+))-([\w\-\.]+)-test";
/// Test directory names when only Python scripts are tested.
pub const TEST_DIR_PATTERN_PY: &str = r"^(as-(\d+)-(\d+))-([\w\-]+\.py)-test";
/// `<testname>-<type>.<ext>`, for inputs and expected outputs.
pub const INPUT_PATTERN: &str = r"^(\w+)-(\w+)\.(?:\w+)";
/// `<testname>-<resource>`; anything else is shared by all tests.
pub const RESOURCE_PATTERN: &str = r"^(\w+)-([^-]*)";

pub const EXPECTED_DIR: &str = "Expected";
pub const ERROR_DIR: &str = "Errors";
pub const INPUT_DIR: &str = "Inputs";
pub const OUTPUT_DIR: &str = "Outputs";
pub const RESOURCE_DIR: &str = "Resources";

pub const SUBDIRECTORIES: [&str; 5] = [EXPECTED_DIR, ERROR_DIR, INPUT_DIR, OUTPUT_DIR, RESOURCE_DIR];

/// Auxiliary files tolerated in the test directory root.
pub const ALLOWED_FILES: [&str; 9] = [
    "marking.py",
    "pep8.py",
    "marking.ini",
    "marking_gui.pyw",
    "diffs.py",
    "TestCase.py",
    "TestSuite.py",
    "myplatform.py",
    "SimpleDialog.py",
];

const CACHE_DIR: &str = "__pycache__";

/// Default wall-clock limit per test.
pub const DEFAULT_TIMEOUT_SECS: u64 = 200;

static TEST_DIR_ANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(TEST_DIR_PATTERN_ANY).expect("static regex"));
static TEST_DIR_PY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(TEST_DIR_PATTERN_PY).expect("static regex"));
static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(INPUT_PATTERN).expect("static regex"));
static RESOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(RESOURCE_PATTERN).expect("static regex"));

fn test_dir_regex(python_only: bool) -> &'static Regex {
    if python_only { &*TEST_DIR_PY } else { &*TEST_DIR_ANY }
}

fn test_dir_pattern(python_only: bool) -> &'static str {
    if python_only {
        TEST_DIR_PATTERN_PY
    } else {
        TEST_DIR_PATTERN_ANY
    }
}

/// Settings for one suite run.
///
/// Built from the suite configuration file, then overridden by command-line
/// flags.
#[derive(Debug)]
pub struct RunSettings {
    pub timeout: Duration,
    pub generate: bool,
    pub stop_early: bool,
    pub diff: DiffOptions,
    pub interpreter: String,
    pub entry: PathBuf,
    pub build: Option<BuildConfig>,
    /// Added to the environment of every tested program.
    pub env: HashMap<String, String>,
    /// Absolute path of the marking script, if scripted comparison is used.
    pub marking_script: Option<PathBuf>,
    pub terminator: Box<dyn ProcessTerminator>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            generate: false,
            stop_early: false,
            diff: DiffOptions::default(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            entry: PathBuf::from(DEFAULT_ENTRY),
            build: None,
            env: HashMap::new(),
            marking_script: None,
            terminator: terminator_for(&Platform::detect()),
        }
    }
}

impl RunSettings {
    /// Settings from an optional configuration file found in `test_dir`.
    pub fn from_config(
        config: Option<&SuiteConfig>,
        test_dir: &Path,
    ) -> Result<Self, StructuralError> {
        let mut settings = Self::default();
        let Some(cfg) = config else {
            return Ok(settings);
        };
        if let Some(secs) = cfg.timeout {
            settings.timeout = Duration::from_secs(secs);
        }
        if let Some(fuzz) = cfg.fuzz {
            settings.diff.fuzz = fuzz;
        }
        if let Some(interpreter) = &cfg.interpreter {
            settings.interpreter = interpreter.clone();
        }
        if let Some(entry) = &cfg.entry {
            settings.entry = entry.clone();
        }
        settings.build = cfg.build.clone();
        settings.env = env::interpolate_all(&cfg.env).map_err(StructuralError::Environment)?;
        settings.marking_script = cfg.marking_script.as_ref().map(|p| test_dir.join(p));
        Ok(settings)
    }

    fn comparison(&self) -> Comparison {
        match &self.marking_script {
            Some(script) => Comparison::MarkingScript {
                interpreter: self.interpreter.clone(),
                script: script.clone(),
            },
            None => Comparison::Expected,
        }
    }
}

/// Aggregate counts over a suite run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub tests: usize,
    /// Errors and timeouts.
    pub errors: usize,
    pub soft_fails: usize,
    pub hard_fails: usize,
    pub passes: usize,
}

impl Summary {
    /// `(tests, errors, soft_fails, hard_fails)`
    pub fn as_tuple(&self) -> (usize, usize, usize, usize) {
        (self.tests, self.errors, self.soft_fails, self.hard_fails)
    }

    pub fn all_passed(&self) -> bool {
        self.errors == 0 && self.soft_fails == 0 && self.passes == self.tests
    }

    /// No errors and no content failures; presentation errors are tolerated.
    pub fn is_success(&self) -> bool {
        self.errors == 0 && self.soft_fails == 0
    }
}

/// Receives progress while a suite runs.
pub trait RunObserver {
    fn test_started(&mut self, _script: &str, _case: &TestCase) {}
    fn test_finished(&mut self, _script: &str, _case: &TestCase) {}
    /// `case` failed and no further tests will run.
    fn stopped_early(&mut self, _script: &str, _case: &TestCase) {}
}

/// Observer that ignores everything.
impl RunObserver for () {}

/// How a run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub executed: usize,
    pub stopped_early: bool,
}

/// All tests found in a test directory, by script then test name.
#[derive(Debug)]
pub struct TestSuite {
    pub test_dir: PathBuf,
    pub assignment: String,
    pub python_only: bool,
    pub test_cases: BTreeMap<String, BTreeMap<String, TestCase>>,
}

impl TestSuite {
    /// Validate `test_dir` and collect every test case in it.
    ///
    /// With `create_missing_dirs`, absent subdirectories of a test directory
    /// are created instead of being reported.
    pub fn discover(
        test_dir: &Path,
        python_only: bool,
        create_missing_dirs: bool,
    ) -> Result<Self, StructuralError> {
        let test_dir = std::path::absolute(test_dir)
            .map_err(|e| StructuralError::io(format!("resolving {}", test_dir.display()), e))?;
        let assignment = verify_root(&test_dir, python_only)?;
        let mut suite = Self {
            test_dir,
            assignment,
            python_only,
            test_cases: BTreeMap::new(),
        };
        suite.collect_tests(create_missing_dirs)?;
        Ok(suite)
    }

    fn collect_tests(&mut self, create_missing_dirs: bool) -> Result<(), StructuralError> {
        let regex = test_dir_regex(self.python_only);
        for test_path in visible_entries(&self.test_dir)? {
            let name = file_name(&test_path);
            let Some(caps) = regex.captures(&name) else {
                continue;
            };
            debug!(path = %test_path.display(), "collecting tests");
            verify_script_dir(&test_path, create_missing_dirs)?;

            let script_name = caps[4].to_string();
            let mut cases = BTreeMap::new();
            add_input_files(&mut cases, &script_name, &test_path)?;
            add_resource_files(&mut cases, &script_name, &test_path)?;
            add_expected_files(&mut cases, &test_path)?;
            debug!(script = %script_name, tests = cases.len(), "collected tests");
            self.test_cases.insert(script_name, cases);
        }
        Ok(())
    }

    /// Number of collected test cases.
    pub fn len(&self) -> usize {
        self.test_cases.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every test case with its script name, in run order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TestCase)> {
        self.test_cases
            .iter()
            .flat_map(|(script, cases)| cases.values().map(move |c| (script.as_str(), c)))
    }

    fn execution_mode(&self, script_name: &str, settings: &RunSettings) -> ExecutionMode {
        ExecutionMode::for_script(
            script_name,
            self.python_only,
            &settings.interpreter,
            &settings.entry,
        )
    }

    /// Run every test against the submission in `submission_dir`.
    ///
    /// A structural problem found while running (missing script, bad
    /// argument mapping, missing expected files) aborts the run.
    pub fn run(
        &mut self,
        submission_dir: &Path,
        settings: &RunSettings,
        observer: &mut dyn RunObserver,
    ) -> Result<RunOutcome, StructuralError> {
        for cases in self.test_cases.values_mut() {
            cases.values_mut().for_each(TestCase::reset_result);
        }

        let needs_build = self
            .test_cases
            .keys()
            .any(|script| self.execution_mode(script, settings).is_compiled());
        let _artifact = match &settings.build {
            Some(build) if needs_build => Some(BuildArtifact::build(
                build,
                submission_dir,
                &settings.env,
                settings.timeout,
                settings.terminator.as_ref(),
            )?),
            _ => None,
        };

        let comparison = settings.comparison();
        let mut outcome = RunOutcome::default();
        let modes: BTreeMap<String, ExecutionMode> = self
            .test_cases
            .keys()
            .map(|s| (s.clone(), self.execution_mode(s, settings)))
            .collect();

        for (script, cases) in self.test_cases.iter_mut() {
            let mode = &modes[script];
            debug!(script = %script, "running tests against script");
            for case in cases.values_mut() {
                observer.test_started(script, case);
                let ctx = RunContext {
                    submission_dir,
                    timeout: settings.timeout,
                    generate: settings.generate,
                    diff: settings.diff,
                    mode,
                    comparison: &comparison,
                    env: &settings.env,
                    terminator: settings.terminator.as_ref(),
                };
                let verdict = case.run(&ctx)?;
                outcome.executed += 1;
                observer.test_finished(script, case);

                if settings.stop_early
                    && verdict.is_some_and(|v| v != Verdict::Pass && v != Verdict::HardFail)
                {
                    info!(test = %case.name, "stopping early");
                    observer.stopped_early(script, case);
                    outcome.stopped_early = true;
                    return Ok(outcome);
                }
            }
        }
        info!(executed = outcome.executed, "all tests complete");
        Ok(outcome)
    }

    /// Counts over all scripts, or over one script.
    pub fn summary(&self, script_name: Option<&str>) -> Summary {
        let mut summary = Summary::default();
        for (_, case) in self
            .iter()
            .filter(|(script, _)| script_name.is_none_or(|s| s == *script))
        {
            summary.tests += 1;
            match case.result {
                Some(Verdict::Error | Verdict::Timeout) => summary.errors += 1,
                Some(Verdict::SoftFail) => summary.soft_fails += 1,
                Some(Verdict::HardFail) => summary.hard_fails += 1,
                Some(Verdict::Pass) => summary.passes += 1,
                None => {}
            }
        }
        summary
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Entries of `dir` not starting with a dot, sorted.
fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>, StructuralError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| StructuralError::io(format!("listing {}", dir.display()), e))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| !is_hidden(p))
        .collect();
    paths.sort();
    Ok(paths)
}

fn allowed_root_files() -> impl Iterator<Item = &'static str> {
    ALLOWED_FILES.into_iter().chain(SUITE_CONFIG_FILENAMES)
}

/// Check that the root holds nothing but test directories and allowed
/// files, and return the single assignment they belong to.
fn verify_root(dir: &Path, python_only: bool) -> Result<String, StructuralError> {
    if !dir.is_dir() {
        return Err(StructuralError::MissingSubdirectory {
            path: dir.to_path_buf(),
        });
    }
    let regex = test_dir_regex(python_only);
    let mut assignment: Option<String> = None;

    for path in visible_entries(dir)? {
        let name = file_name(&path);
        debug!(entry = %name, "verifying test directory entry");
        if let Some(caps) = regex.captures(&name) {
            let found = &caps[1];
            match &assignment {
                None => assignment = Some(found.to_string()),
                Some(first) if first != found => {
                    return Err(StructuralError::MultipleAssignments {
                        first: first.clone(),
                        second: found.to_string(),
                    });
                }
                Some(_) => {}
            }
        } else if name == CACHE_DIR {
            verify_cache_dir(&path)?;
        } else if !allowed_root_files().any(|allowed| allowed == name) {
            return Err(StructuralError::UnexpectedRootEntry {
                path,
                allowed: allowed_root_files().collect::<Vec<_>>().join(" "),
            });
        }
    }

    assignment.ok_or_else(|| StructuralError::NoTestDirectories {
        dir: dir.to_path_buf(),
        pattern: test_dir_pattern(python_only).to_string(),
    })
}

/// A cache directory may only hold compiled versions of the allowed files.
fn verify_cache_dir(dir: &Path) -> Result<(), StructuralError> {
    let files: Vec<String> = visible_entries(dir)?.iter().map(|p| file_name(p)).collect();
    let stems: Vec<&str> = ALLOWED_FILES
        .iter()
        .filter_map(|f| f.split_once('.').map(|(stem, _)| stem))
        .collect();
    let is_allowed = |name: &str| {
        stems.iter().any(|stem| {
            name.strip_prefix(stem)
                .is_some_and(|rest| rest.contains(".pyc"))
        })
    };
    if files.iter().all(|f| is_allowed(f)) {
        Ok(())
    } else {
        Err(StructuralError::UnexpectedCacheFiles {
            dir: dir.to_path_buf(),
            files,
        })
    }
}

fn verify_script_dir(test_path: &Path, create_missing_dirs: bool) -> Result<(), StructuralError> {
    for sub in SUBDIRECTORIES {
        let path = test_path.join(sub);
        if path.exists() {
            continue;
        }
        if !create_missing_dirs {
            return Err(StructuralError::MissingSubdirectory { path });
        }
        debug!(path = %path.display(), "creating directory");
        std::fs::create_dir(&path)
            .map_err(|e| StructuralError::io(format!("creating {}", path.display()), e))?;
    }
    Ok(())
}

fn case_entry<'a>(
    cases: &'a mut BTreeMap<String, TestCase>,
    test_name: &str,
    script_name: &str,
    test_path: &Path,
) -> &'a mut TestCase {
    cases.entry(test_name.to_string()).or_insert_with(|| {
        TestCase::new(
            test_name,
            script_name,
            test_path.join(EXPECTED_DIR),
            test_path.join(OUTPUT_DIR),
            test_path.join(ERROR_DIR),
        )
    })
}

fn add_input_files(
    cases: &mut BTreeMap<String, TestCase>,
    script_name: &str,
    test_path: &Path,
) -> Result<(), StructuralError> {
    let input_dir = test_path.join(INPUT_DIR);
    for input in visible_entries(&input_dir)? {
        let name = file_name(&input);
        let Some(caps) = INPUT_RE.captures(&name) else {
            return Err(StructuralError::UnexpectedInputFile {
                dir: input_dir,
                file: name,
                pattern: INPUT_PATTERN.to_string(),
            });
        };
        case_entry(cases, &caps[1], script_name, test_path).add_input(&caps[2], &input)?;
    }
    Ok(())
}

fn add_resource_files(
    cases: &mut BTreeMap<String, TestCase>,
    script_name: &str,
    test_path: &Path,
) -> Result<(), StructuralError> {
    let mut shared = Vec::new();
    for resource in visible_entries(&test_path.join(RESOURCE_DIR))? {
        let name = file_name(&resource);
        match RESOURCE_RE.captures(&name) {
            Some(caps) => case_entry(cases, &caps[1], script_name, test_path).add_resource(resource),
            None => shared.push(resource),
        }
    }
    for case in cases.values_mut() {
        for resource in &shared {
            case.add_resource(resource.clone());
        }
    }
    Ok(())
}

fn add_expected_files(
    cases: &mut BTreeMap<String, TestCase>,
    test_path: &Path,
) -> Result<(), StructuralError> {
    for expected in visible_entries(&test_path.join(EXPECTED_DIR))? {
        let name = file_name(&expected);
        let Some(caps) = INPUT_RE.captures(&name) else {
            return Err(StructuralError::UnexpectedExpectedFile {
                path: expected,
                pattern: INPUT_PATTERN.to_string(),
            });
        };
        let Some(case) = cases.get_mut(&caps[1]) else {
            return Err(StructuralError::DanglingExpectedOutput { path: expected });
        };
        case.add_expected(&caps[2], expected);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn script_dir(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        for sub in SUBDIRECTORIES {
            std::fs::create_dir_all(dir.join(sub)).unwrap();
        }
        dir
    }

    /// Two tests for `hello.py` plus an unscoped resource.
    fn sample() -> TempDir {
        let root = tempdir().unwrap();
        let dir = script_dir(root.path(), "as-174-2-hello.py-test");
        write(&dir.join("Inputs/t1-stdin.txt"), "Ann\n");
        write(&dir.join("Inputs/t2-args.txt"), "-n 2 t2-data.txt\n");
        write(&dir.join("Inputs/t2-data.txt"), "x\n");
        write(&dir.join("Resources/t1-table.csv"), "a,b\n");
        write(&dir.join("Resources/shared.txt"), "s\n");
        write(&dir.join("Expected/t1-stdout.txt"), "Hello Ann\n");
        write(&dir.join("Expected/t2-stdout.txt"), "x\nx\n");
        write(&root.path().join("marking.py"), "");
        root
    }

    #[test]
    fn discovers_tests_in_sorted_order() {
        let root = sample();
        let suite = TestSuite::discover(root.path(), false, false).unwrap();
        assert_eq!(suite.assignment, "as-174-2");
        assert_eq!(suite.len(), 2);

        let names: Vec<_> = suite.iter().map(|(s, c)| (s, c.name.as_str())).collect();
        assert_eq!(names, vec![("hello.py", "t1"), ("hello.py", "t2")]);

        let cases = &suite.test_cases["hello.py"];
        let t1 = &cases["t1"];
        assert_eq!(t1.stdin, "Ann\n");
        assert_eq!(t1.resources.len(), 2);
        assert!(t1.resources[0].ends_with("t1-table.csv"));
        assert!(t1.resources[1].ends_with("shared.txt"));
        assert_eq!(t1.expected.len(), 1);

        let t2 = &cases["t2"];
        assert_eq!(t2.cli_args, "-n 2 t2-data.txt");
        assert_eq!(t2.cli_files.len(), 1);
        assert_eq!(t2.resources.len(), 1);
    }

    #[test]
    fn rejects_unknown_root_file() {
        let root = sample();
        write(&root.path().join("notes.txt"), "");
        let err = TestSuite::discover(root.path(), false, false).unwrap_err();
        match err {
            StructuralError::UnexpectedRootEntry { path, .. } => {
                assert!(path.ends_with("notes.txt"))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn config_file_and_dotfiles_are_tolerated() {
        let root = sample();
        write(&root.path().join("testcenter.yaml"), "timeout: 5\n");
        write(&root.path().join(".DS_Store"), "");
        assert!(TestSuite::discover(root.path(), false, false).is_ok());
    }

    #[test]
    fn cache_dir_may_only_hold_compiled_helpers() {
        let root = sample();
        write(
            &root.path().join("__pycache__/marking.cpython-312.pyc"),
            "",
        );
        assert!(TestSuite::discover(root.path(), false, false).is_ok());

        write(&root.path().join("__pycache__/solution.cpython-312.pyc"), "");
        let err = TestSuite::discover(root.path(), false, false).unwrap_err();
        assert!(matches!(err, StructuralError::UnexpectedCacheFiles { ref files, .. } if files.len() == 2));
    }

    #[test]
    fn rejects_mixed_assignments() {
        let root = sample();
        script_dir(root.path(), "as-174-3-other.py-test");
        let err = TestSuite::discover(root.path(), false, false).unwrap_err();
        assert!(matches!(err, StructuralError::MultipleAssignments { .. }));
    }

    #[test]
    fn requires_a_test_directory() {
        let root = tempdir().unwrap();
        write(&root.path().join("marking.py"), "");
        let err = TestSuite::discover(root.path(), false, false).unwrap_err();
        assert!(matches!(err, StructuralError::NoTestDirectories { .. }));
    }

    #[test]
    fn python_only_ignores_other_programs() {
        let root = tempdir().unwrap();
        script_dir(root.path(), "as-1-1-matrix-test");
        // Under the Python-only pattern this is just an unexpected entry.
        let err = TestSuite::discover(root.path(), true, false).unwrap_err();
        assert!(matches!(err, StructuralError::UnexpectedRootEntry { .. }));
        assert!(TestSuite::discover(root.path(), false, false).is_ok());
    }

    #[test]
    fn missing_subdirectory() {
        let root = sample();
        std::fs::remove_dir(root.path().join("as-174-2-hello.py-test/Outputs")).unwrap();
        let err = TestSuite::discover(root.path(), false, false).unwrap_err();
        assert!(matches!(err, StructuralError::MissingSubdirectory { ref path } if path.ends_with("Outputs")));

        TestSuite::discover(root.path(), false, true).unwrap();
        assert!(root.path().join("as-174-2-hello.py-test/Outputs").is_dir());
    }

    #[test]
    fn rejects_badly_named_input() {
        let root = sample();
        write(&root.path().join("as-174-2-hello.py-test/Inputs/stdin.txt"), "");
        let err = TestSuite::discover(root.path(), false, false).unwrap_err();
        assert!(matches!(err, StructuralError::UnexpectedInputFile { ref file, .. } if file == "stdin.txt"));
    }

    #[test]
    fn rejects_dangling_expected_output() {
        let root = sample();
        write(
            &root.path().join("as-174-2-hello.py-test/Expected/t9-stdout.txt"),
            "",
        );
        let err = TestSuite::discover(root.path(), false, false).unwrap_err();
        assert!(matches!(err, StructuralError::DanglingExpectedOutput { .. }));
    }

    #[test]
    fn rejects_badly_named_expected_output() {
        let root = sample();
        write(&root.path().join("as-174-2-hello.py-test/Expected/README"), "");
        let err = TestSuite::discover(root.path(), false, false).unwrap_err();
        assert!(matches!(err, StructuralError::UnexpectedExpectedFile { .. }));
    }

    #[test]
    fn settings_from_config() {
        let config: SuiteConfig = serde_yaml::from_str(
            "timeout: 7\nfuzz: 2\ninterpreter: python3.12\nmarking_script: soln/mark.py\nenv:\n  LANG: C\n",
        )
        .unwrap();
        let settings = RunSettings::from_config(Some(&config), Path::new("/tests")).unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(7));
        assert_eq!(settings.diff.fuzz, 2);
        assert_eq!(settings.interpreter, "python3.12");
        assert_eq!(settings.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(
            settings.marking_script,
            Some(PathBuf::from("/tests/soln/mark.py"))
        );
        assert!(matches!(
            settings.comparison(),
            Comparison::MarkingScript { .. }
        ));

        let defaults = RunSettings::from_config(None, Path::new("/tests")).unwrap();
        assert_eq!(defaults.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(defaults.comparison(), Comparison::Expected);
    }

    #[test]
    fn summary_counts() {
        let root = sample();
        let mut suite = TestSuite::discover(root.path(), false, false).unwrap();
        let cases = suite.test_cases.get_mut("hello.py").unwrap();
        cases.get_mut("t1").unwrap().result = Some(Verdict::Pass);
        cases.get_mut("t2").unwrap().result = Some(Verdict::HardFail);
        let summary = suite.summary(None);
        assert_eq!(summary.as_tuple(), (2, 0, 0, 1));
        assert!(!summary.all_passed());
        assert!(summary.is_success());
        assert_eq!(suite.summary(Some("other.py")).tests, 0);
    }

    #[cfg(unix)]
    mod running {
        use super::*;

        /// Recording observer.
        #[derive(Default)]
        struct Events(Vec<String>);

        impl RunObserver for Events {
            fn test_finished(&mut self, script: &str, case: &TestCase) {
                self.0
                    .push(format!("{script}/{}: {}", case.name, case.result_label()));
            }
            fn stopped_early(&mut self, _script: &str, case: &TestCase) {
                self.0.push(format!("stop at {}", case.name));
            }
        }

        fn shell_settings() -> RunSettings {
            RunSettings {
                interpreter: "sh".to_string(),
                timeout: Duration::from_secs(10),
                ..RunSettings::default()
            }
        }

        /// Suite for a `prog.py` that is really a shell script.
        fn suite_with(tests: &[(&str, &str, &str)]) -> (TempDir, PathBuf) {
            let root = tempdir().unwrap();
            let tests_root = root.path().join("tests");
            let dir = script_dir(&tests_root, "as-1-1-prog.py-test");
            for (name, stdin, expected) in tests {
                write(&dir.join(format!("Inputs/{name}-stdin.txt")), stdin);
                write(&dir.join(format!("Expected/{name}-stdout.txt")), expected);
            }
            let submission = root.path().join("as-1-1");
            write(&submission.join("prog.py"), "cat\n");
            (root, submission)
        }

        #[test]
        fn runs_every_test_in_order() {
            let (root, submission) = suite_with(&[
                ("b", "2\n", "2\n"),
                ("a", "1\n", "1 \n"),
                ("c", "3\n", "4\n"),
            ]);
            let mut suite = TestSuite::discover(&root.path().join("tests"), false, false).unwrap();
            let mut events = Events::default();
            let outcome = suite.run(&submission, &shell_settings(), &mut events).unwrap();
            assert_eq!(outcome.executed, 3);
            assert!(!outcome.stopped_early);
            assert_eq!(
                events.0,
                vec![
                    "prog.py/a: Presentation Error",
                    "prog.py/b: Pass",
                    "prog.py/c: Fail",
                ]
            );
            assert_eq!(suite.summary(None).as_tuple(), (3, 0, 1, 1));
        }

        #[test]
        fn stop_early_halts_on_first_real_failure() {
            let (root, submission) = suite_with(&[
                ("a", "1\n", "1 \n"),
                ("b", "2\n", "5\n"),
                ("c", "3\n", "3\n"),
            ]);
            let mut suite = TestSuite::discover(&root.path().join("tests"), false, false).unwrap();
            let settings = RunSettings {
                stop_early: true,
                ..shell_settings()
            };
            let mut events = Events::default();
            let outcome = suite.run(&submission, &settings, &mut events).unwrap();
            assert!(outcome.stopped_early);
            assert_eq!(outcome.executed, 2);
            assert_eq!(events.0.last().unwrap(), "stop at b");
            let c = &suite.test_cases["prog.py"]["c"];
            assert_eq!(c.result, None);
        }

        #[test]
        fn missing_script_aborts_the_run() {
            let (root, submission) = suite_with(&[("a", "1\n", "1\n")]);
            std::fs::remove_file(submission.join("prog.py")).unwrap();
            let mut suite = TestSuite::discover(&root.path().join("tests"), false, false).unwrap();
            let err = suite.run(&submission, &shell_settings(), &mut ()).unwrap_err();
            assert!(matches!(err, StructuralError::MissingScript { .. }));
        }

        #[test]
        fn compiled_programs_are_built_once_and_cleaned_up() {
            let root = tempdir().unwrap();
            let tests_root = root.path().join("tests");
            let dir = script_dir(&tests_root, "as-1-1-matrix-test");
            write(&dir.join("Inputs/t1-stdin.txt"), "");
            write(&dir.join("Expected/t1-stdout.txt"), "built\n");
            let submission = root.path().join("as-1-1");
            std::fs::create_dir_all(&submission).unwrap();

            let settings = RunSettings {
                entry: PathBuf::from(".build/run"),
                build: Some(BuildConfig {
                    command: "printf '#!/bin/sh\\necho built\\n' > ${BUILD_DIR}/run && chmod +x ${BUILD_DIR}/run"
                        .to_string(),
                    artifact: Some(PathBuf::from(".build/run")),
                }),
                ..shell_settings()
            };
            let mut suite = TestSuite::discover(&tests_root, false, false).unwrap();
            suite.run(&submission, &settings, &mut ()).unwrap();
            assert_eq!(suite.test_cases["matrix"]["t1"].result, Some(Verdict::Pass));
            assert!(!submission.join(".build/run").exists());
        }
    }
}
