//! Rendering of suite runs: live human output, JSON and JUnit XML.

use crate::suite::{RunObserver, RunOutcome, Summary, TestSuite};
use crate::test_case::{ResultDetail, TestCase, Verdict};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

const STOP_EARLY_MESSAGE: &str = "FAILED TEST CASE FOUND. STOPPING EARLY and preventing all other test runs
so the issue can be resolved. (To disable this option, run without --stop-early.)";

/// Prints progress and per-test results as tests run.
#[derive(Debug)]
pub struct HumanReporter<W: Write> {
    out: W,
    verbose: bool,
    stop_early: bool,
}

impl<W: Write> HumanReporter<W> {
    pub fn new(out: W, verbose: bool, stop_early: bool) -> Self {
        Self {
            out,
            verbose,
            stop_early,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RunObserver for HumanReporter<W> {
    fn test_started(&mut self, _script: &str, case: &TestCase) {
        if !self.verbose {
            let _ = write!(self.out, "Running {}... ", case.name);
            let _ = self.out.flush();
        }
    }

    fn test_finished(&mut self, script: &str, case: &TestCase) {
        if self.verbose {
            let _ = write!(self.out, "Script {script} on test {}: ", case.name);
        }
        let _ = print_result(&mut self.out, case, self.stop_early, self.verbose);
    }

    fn stopped_early(&mut self, _script: &str, _case: &TestCase) {
        let _ = writeln!(self.out, "{STOP_EARLY_MESSAGE}");
    }
}

/// One line describing the outcome of `case`, plus error or diff details
/// when asked for.
pub fn print_result(
    out: &mut impl Write,
    case: &TestCase,
    stop_early: bool,
    verbose: bool,
) -> io::Result<()> {
    match case.result {
        None => writeln!(out, "Generated expected output")?,
        Some(Verdict::Pass) => writeln!(out, "Pass")?,
        Some(Verdict::SoftFail) => writeln!(out, "Failed with incorrect output")?,
        Some(Verdict::HardFail) => writeln!(out, "Presentation error")?,
        Some(Verdict::Timeout) => writeln!(out, "Time limit exceeded.")?,
        Some(Verdict::Error) => {
            writeln!(out, "Failed with error")?;
            // Only worth showing when no other test output follows.
            if stop_early {
                let stars = "*".repeat(75);
                let dashes = "-".repeat(75);
                writeln!(out, "{stars}")?;
                writeln!(out, "BEGIN ERROR MESSAGES FOR TESTCASE {}:", case.name)?;
                writeln!(out, "{dashes}")?;
                writeln!(out, "{}", case.err_msg())?;
                writeln!(out, "{dashes}")?;
                writeln!(out, "END ERROR MESSAGES FOR TESTCASE {}:", case.name)?;
                writeln!(out, "{stars}")?;
            }
        }
    }
    if verbose
        && case.is_fail()
        && let Some(result) = case.match_result()
        && result.has_diff()
    {
        write!(out, "{result}")?;
        for (actual, expected) in result.diff_files() {
            writeln!(
                out,
                "Compare {} with {}",
                actual.display(),
                expected.display()
            )?;
        }
    }
    Ok(())
}

/// The closing summary block.
pub fn write_summary(out: &mut impl Write, summary: &Summary) -> io::Result<()> {
    if summary.all_passed() {
        writeln!(out, "All tests passed.")?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "Number of tests: {} Errors: {} Serious failures: {} Presentation errors: {}",
        summary.tests, summary.errors, summary.soft_fails, summary.hard_fails
    )
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

#[derive(Debug, Serialize)]
struct JsonTest<'a> {
    script: &'a str,
    name: &'a str,
    result: Option<Verdict>,
    label: &'static str,
    #[serde(serialize_with = "serialize_duration")]
    duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_line: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a ResultDetail>,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    started_at: String,
    assignment: &'a str,
    summary: Summary,
    stopped_early: bool,
    tests: Vec<JsonTest<'a>>,
}

/// Machine-readable report of a finished run.
pub fn format_json(
    suite: &TestSuite,
    outcome: &RunOutcome,
    started_at: DateTime<Local>,
) -> serde_json::Result<String> {
    let report = JsonReport {
        started_at: started_at.to_rfc3339(),
        assignment: &suite.assignment,
        summary: suite.summary(None),
        stopped_early: outcome.stopped_early,
        tests: suite
            .iter()
            .map(|(script, case)| JsonTest {
                script,
                name: &case.name,
                result: case.result,
                label: case.result_label(),
                duration: case.duration,
                command_line: case.command_line.as_deref(),
                detail: case.detail.as_ref(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report)
}

/// Format a finished run as JUnit XML, one `<testsuite>` per script.
pub fn format_junit_xml(suite: &TestSuite, total_time: Duration) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let totals = suite.summary(None);
    let _ = writeln!(
        xml,
        "<testsuites name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\">",
        escape_xml(&suite.assignment),
        totals.tests,
        totals.soft_fails + totals.hard_fails,
        totals.errors,
        total_time.as_secs_f64()
    );

    for (script, cases) in &suite.test_cases {
        let summary = suite.summary(Some(script.as_str()));
        let skipped = cases.values().filter(|c| c.result.is_none()).count();
        let time: Duration = cases.values().map(|c| c.duration).sum();
        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{skipped}\" time=\"{:.3}\">",
            escape_xml(script),
            summary.tests,
            summary.soft_fails + summary.hard_fails,
            summary.errors,
            time.as_secs_f64()
        );

        for case in cases.values() {
            let _ = writeln!(
                xml,
                "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\">",
                escape_xml(&case.name),
                escape_xml(script),
                case.duration.as_secs_f64()
            );
            match case.result {
                None => xml.push_str("      <skipped/>\n"),
                Some(Verdict::Pass) => {}
                Some(v @ (Verdict::SoftFail | Verdict::HardFail)) => {
                    let body = case.match_result().map(ToString::to_string).unwrap_or_default();
                    let _ = writeln!(
                        xml,
                        "      <failure message=\"{}\">{}</failure>",
                        v.label(),
                        escape_xml(&body)
                    );
                }
                Some(v @ (Verdict::Error | Verdict::Timeout)) => {
                    let _ = writeln!(
                        xml,
                        "      <error message=\"{}\">{}</error>",
                        v.label(),
                        escape_xml(&case.err_msg())
                    );
                }
            }
            if let Some(cmd) = &case.command_line {
                let _ = writeln!(xml, "      <system-out>{}</system-out>", escape_xml(cmd));
            }
            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
