//! Differential connectivity testing of NetworkPolicy implementations
//!
//! Runs generated test cases against a cluster, compares every cluster probe
//! with the simulated verdicts for the same policies, and reports the outcome
//! as text, summaries and JUnit XML.

pub mod comparison;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod junit;
pub mod printer;
pub mod result;
pub mod summary;

pub use comparison::{Comparison, ComparisonCounts, ComparisonTable};
pub use config::{Config, ConfigLoader, ConfigValidator};
pub use error::{ConnectivityError, Result, ValidationError};
pub use interpreter::Interpreter;
pub use result::{ProbeAttempt, StepResult, TestCaseResult};
pub use summary::Summary;
