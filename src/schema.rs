//! Schema of the optional suite configuration file.
//!
//! A test directory may carry a `testcenter.yaml` (or `.yml` / `.toml`) next
//! to its `as-*-test` directories. Every field is optional; command-line
//! flags take precedence over what the file says.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Suite-level configuration loaded from the test directory root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Wall-clock limit per test in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Minimum number of differing lines before a diff counts (0: any difference).
    #[serde(default)]
    pub fuzz: Option<usize>,

    /// Interpreter used to run `.py` scripts (default: `python3`).
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Program run for compiled submissions, relative to the submission
    /// directory (default: `.build/build.sh`).
    #[serde(default)]
    pub entry: Option<PathBuf>,

    /// Build step run once before any test of a compiled submission.
    #[serde(default)]
    pub build: Option<BuildConfig>,

    /// Extra environment variables for every tested program.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Marking script (relative to the test directory) that replaces the
    /// comparison against expected files.
    #[serde(default)]
    pub marking_script: Option<PathBuf>,
}

fn default_version() -> u32 {
    1
}

/// A shell command producing the program under test.
///
/// `${SUBMISSION}` and `${BUILD_DIR}` are replaced by the submission directory
/// and its `.build` subdirectory; other `${VAR}` references resolve against
/// the configured `env` and then the host environment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Shell command line.
    pub command: String,

    /// File produced by the build, relative to the submission directory.
    /// Removed once the suite finishes.
    #[serde(default)]
    pub artifact: Option<PathBuf>,
}

/// Generate the JSON schema of the suite configuration.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(SuiteConfig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_yaml() {
        let config: SuiteConfig = serde_yaml::from_str("version: 1\n").unwrap();
        assert_eq!(config.version, 1);
        assert!(config.timeout.is_none());
        assert!(config.build.is_none());
        assert!(config.env.is_empty());
    }

    #[test]
    fn version_defaults_to_one() {
        let config: SuiteConfig = serde_yaml::from_str("timeout: 5\n").unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.timeout, Some(5));
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
version: 1
timeout: 30
fuzz: 2
interpreter: python3.12
entry: .build/run.sh
build:
  command: g++ ${SUBMISSION}/matrix.cpp -o ${BUILD_DIR}/matrix
  artifact: .build/matrix
env:
  LANG: C
marking_script: soln/mark_script.py
"#;
        let config: SuiteConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.fuzz, Some(2));
        assert_eq!(config.interpreter.as_deref(), Some("python3.12"));
        assert_eq!(config.entry, Some(PathBuf::from(".build/run.sh")));
        let build = config.build.unwrap();
        assert!(build.command.starts_with("g++"));
        assert_eq!(build.artifact, Some(PathBuf::from(".build/matrix")));
        assert_eq!(config.env.get("LANG"), Some(&"C".to_string()));
        assert_eq!(
            config.marking_script,
            Some(PathBuf::from("soln/mark_script.py"))
        );
    }

    #[test]
    fn parse_toml() {
        let toml_src = r#"
timeout = 10

[build]
command = "make"
"#;
        let config: SuiteConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.timeout, Some(10));
        assert_eq!(config.build.unwrap().command, "make");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<SuiteConfig, _> = serde_yaml::from_str("timeuot: 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn schema_names_every_field() {
        let schema = serde_json::to_value(generate_schema()).unwrap();
        let props = schema["properties"].as_object().unwrap();
        for field in ["timeout", "fuzz", "interpreter", "entry", "build", "env"] {
            assert!(props.contains_key(field), "missing {field}");
        }
    }
}
