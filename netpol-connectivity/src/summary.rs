//! Aggregate counters over a run of test cases

use crate::comparison::ComparisonCounts;
use crate::result::TestCaseResult;
use netpol_core::with_default_policy_types;
use netpol_generator::{tags, Features};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassFail {
    pub passed: usize,
    pub failed: usize,
}

impl PassFail {
    fn record(&mut self, passed: bool) {
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Pass/fail counters for a primary key and each of its sub-keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    pub primary: BTreeMap<String, PassFail>,
    pub sub: BTreeMap<String, BTreeMap<String, PassFail>>,
}

impl Breakdown {
    /// Count a case once per primary key it touches and once per sub-key
    fn record<'a>(&mut self, grouped: impl IntoIterator<Item = (String, Vec<&'a String>)>, passed: bool) {
        for (primary, subs) in grouped {
            self.primary.entry(primary.clone()).or_default().record(passed);
            let entry = self.sub.entry(primary).or_default();
            for sub in subs {
                entry.entry(sub.clone()).or_default().record(passed);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    /// Comparison counts over each step's final cluster probe
    pub comparisons: ComparisonCounts,
    pub by_protocol: BTreeMap<String, ComparisonCounts>,
    pub by_tag: Breakdown,
    pub by_feature: Breakdown,
}

impl Summary {
    pub fn from_results(results: &[TestCaseResult]) -> Self {
        let mut summary = Summary::default();
        for result in results {
            summary.add(result);
        }
        summary
    }

    fn add(&mut self, result: &TestCaseResult) {
        let passed = result.passed();
        if result.error.is_some() {
            self.errored += 1;
        } else if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }

        for attempt in result.steps.iter().filter_map(|s| s.last_attempt()) {
            self.comparisons += attempt.comparison.counts();
            for (protocol, counts) in attempt.comparison.counts_by_protocol() {
                *self.by_protocol.entry(protocol.to_string()).or_default() += counts;
            }
        }

        let tags = tags::by_category(&result.test_case.tags);
        self.by_tag.record(
            tags.iter().map(|(category, tags)| (category.clone(), tags.iter().collect())),
            passed,
        );

        let stored: Vec<_> = result
            .test_case
            .policies()
            .into_iter()
            .map(with_default_policy_types)
            .collect();
        let features = Features::from_policies(&stored);
        self.by_feature.record(
            features
                .by_category()
                .into_iter()
                .filter(|(_, features)| !features.is_empty())
                .map(|(category, features)| (category.to_string(), features.iter().collect())),
            passed,
        );
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_generator::netpol_builder::deny_all_ingress;
    use netpol_generator::{TestCase, TestStep};

    fn case(tags: &[&str]) -> TestCase {
        TestCase::new(
            "case",
            tags.iter().copied(),
            vec![TestStep::create_policies(vec![deny_all_ingress("x", "deny")])],
        )
    }

    #[test]
    fn test_counts_by_tag_and_feature() {
        let passing = TestCaseResult::new(&case(&["deny-all", "has-ingress", "ingress-only"]));
        let errored = TestCaseResult::errored(&case(&["deny-all", "peer-ipblock"]), "boom");

        let summary = Summary::from_results(&[passing, errored]);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.total(), 2);

        assert_eq!(
            summary.by_tag.primary["multi-policy"],
            PassFail {
                passed: 1,
                failed: 1
            }
        );
        assert_eq!(summary.by_tag.sub["peer"]["peer-ipblock"].failed, 1);
        assert_eq!(summary.by_tag.primary["direction"].passed, 1);

        assert_eq!(summary.by_feature.primary["general"].passed, 1);
        assert_eq!(summary.by_feature.sub["target"]["target-all"].failed, 1);
        assert!(!summary.by_feature.primary.contains_key("ingress-peer"));
    }
}
