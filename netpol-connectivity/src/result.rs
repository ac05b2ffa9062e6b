//! Outcomes of executed test cases

use crate::comparison::ComparisonTable;
use chrono::{DateTime, Utc};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use netpol_generator::TestCase;
use netpol_probe::Probe;
use std::time::Duration;

/// One cluster probe and how it compared with the simulation
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    pub probe: Probe,
    pub comparison: ComparisonTable,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    /// Logical policy set in force while probing
    pub policies: Vec<NetworkPolicy>,
    pub simulated: Probe,
    pub attempts: Vec<ProbeAttempt>,
}

impl StepResult {
    pub fn last_attempt(&self) -> Option<&ProbeAttempt> {
        self.attempts.last()
    }

    /// The final cluster probe agreed with the simulation
    pub fn passed(&self) -> bool {
        self.last_attempt().is_some_and(|a| a.comparison.is_same())
    }
}

#[derive(Debug, Clone)]
pub struct TestCaseResult {
    pub test_case: TestCase,
    pub steps: Vec<StepResult>,
    /// Set when execution aborted before every step ran
    pub error: Option<String>,
    pub started: DateTime<Utc>,
    pub elapsed: Duration,
}

impl TestCaseResult {
    pub fn new(test_case: &TestCase) -> Self {
        Self {
            test_case: test_case.clone(),
            steps: Vec::new(),
            error: None,
            started: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn errored(test_case: &TestCase, error: impl ToString) -> Self {
        let mut result = Self::new(test_case);
        result.error = Some(error.to_string());
        result
    }

    pub fn passed(&self) -> bool {
        self.error.is_none() && self.steps.iter().all(StepResult::passed)
    }

    pub fn finish(&mut self) {
        self.elapsed = (Utc::now() - self.started).to_std().unwrap_or_default();
    }
}
