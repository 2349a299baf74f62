//! Grading engine for program submissions.
//!
//! A test directory describes, by naming convention alone, what inputs each
//! test feeds a submitted program and what output it expects. The engine
//! discovers those tests ([`suite`]), runs the program once per test in a
//! scratch directory under a wall-clock limit ([`test_case`], [`process`]),
//! and classifies the outcome by comparing produced files with expected ones
//! at two levels of strictness ([`diff`], [`match_result`]).

pub mod diff;
pub mod env;
pub mod error;
pub mod loader;
pub mod match_result;
pub mod mode;
pub mod platform;
pub mod process;
pub mod report;
pub mod schema;
pub mod suite;
pub mod test_case;

pub use error::{LoadError, StructuralError};
pub use suite::{RunSettings, Summary, TestSuite};
pub use test_case::{TestCase, Verdict};
