use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use testcenter::error::{LoadError, StructuralError};
use testcenter::suite::{RunSettings, Summary, TestSuite};
use testcenter::{loader, report, schema};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Progress and verdicts as tests run
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "testcenter")]
#[command(about = "Run tests against a submission")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every test against a submission
    Run {
        /// Submission to test (zip archive or directory)
        #[arg(short, long)]
        submission: PathBuf,
        /// Directory containing the tests
        #[arg(short, long, default_value = ".")]
        test_directory: PathBuf,
        /// Terminate a test with an error after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Show the detailed outcome of the tests
        #[arg(short, long)]
        verbose: bool,
        /// Show whitespace as `#` in presentation diffs
        #[arg(short = 'p', long)]
        visible_space_diff: bool,
        /// Generate expected outputs for tests that have none
        #[arg(short, long)]
        generate: bool,
        /// Stop after the first failing test
        #[arg(short = 'e', long)]
        stop_early: bool,
        /// Only test Python scripts
        #[arg(long)]
        python_only: bool,
        /// Require the submission directory to be named after the assignment
        #[arg(long)]
        verify_script_dir: bool,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
    },
    /// Check a test directory without running anything
    Validate {
        /// Directory containing the tests
        #[arg(short, long, default_value = ".")]
        test_directory: PathBuf,
        /// Only accept Python script tests
        #[arg(long)]
        python_only: bool,
        /// Create missing test subdirectories
        #[arg(long)]
        generate: bool,
    },
    /// Output the suite configuration schema
    Schema,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error("invalid suite configuration: {0}")]
    Config(#[from] LoadError),
    #[error("failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

struct RunArgs {
    submission: PathBuf,
    test_directory: PathBuf,
    timeout: Option<u64>,
    verbose: bool,
    visible_space_diff: bool,
    generate: bool,
    stop_early: bool,
    python_only: bool,
    verify_script_dir: bool,
    output: OutputFormat,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            submission,
            test_directory,
            timeout,
            verbose,
            visible_space_diff,
            generate,
            stop_early,
            python_only,
            verify_script_dir,
            output,
        } => {
            init_logging(verbose);
            let args = RunArgs {
                submission,
                test_directory,
                timeout,
                verbose,
                visible_space_diff,
                generate,
                stop_early,
                python_only,
                verify_script_dir,
                output,
            };
            match run(args) {
                Ok(code) => code,
                Err(e) => {
                    let _ = io::stdout().flush();
                    eprintln!("Error:\n{e}");
                    ExitCode::from(2)
                }
            }
        }
        Command::Validate {
            test_directory,
            python_only,
            generate,
        } => {
            init_logging(false);
            match TestSuite::discover(&test_directory, python_only, generate) {
                Ok(suite) => {
                    for (script, cases) in &suite.test_cases {
                        println!("✓ {script} ({} tests)", cases.len());
                    }
                    println!(
                        "\nAll {} test(s) of {} valid",
                        suite.len(),
                        suite.assignment
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error:\n{e}");
                    ExitCode::from(2)
                }
            }
        }
        Command::Schema => {
            let schema = schema::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    ExitCode::from(2)
                }
            }
        }
    }
}

fn run(args: RunArgs) -> Result<ExitCode, AppError> {
    let mut suite = TestSuite::discover(&args.test_directory, args.python_only, args.generate)?;
    info!(
        assignment = %suite.assignment,
        scripts = suite.test_cases.len(),
        tests = suite.len(),
        "collected tests"
    );

    let config = loader::load_suite_config(&suite.test_dir)?;
    let mut settings = RunSettings::from_config(config.as_ref(), &suite.test_dir)?;
    if let Some(secs) = args.timeout {
        settings.timeout = Duration::from_secs(secs);
    }
    settings.generate = args.generate;
    settings.stop_early = args.stop_early;
    settings.diff.visible_whitespace = args.visible_space_diff;

    let submission =
        loader::prepare_submission(&args.submission, &suite.assignment, args.verify_script_dir)?;

    let started_at = chrono::Local::now();
    let start = Instant::now();
    if let OutputFormat::Human = args.output {
        let mut reporter =
            report::HumanReporter::new(io::stdout().lock(), args.verbose, args.stop_early);
        suite.run(submission.dir(), &settings, &mut reporter)?;
        let summary = suite.summary(None);
        let _ = report::write_summary(&mut reporter.into_inner(), &summary);
        return Ok(exit_code(&summary));
    }

    let outcome = suite.run(submission.dir(), &settings, &mut ())?;
    let total_time = start.elapsed();
    match args.output {
        OutputFormat::Json => {
            println!("{}", report::format_json(&suite, &outcome, started_at)?);
        }
        OutputFormat::Junit | OutputFormat::Human => {
            print!("{}", report::format_junit_xml(&suite, total_time));
        }
    }
    Ok(exit_code(&suite.summary(None)))
}

fn exit_code(summary: &Summary) -> ExitCode {
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
