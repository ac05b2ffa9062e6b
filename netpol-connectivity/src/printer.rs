//! Plain-text rendering of results and summaries

use crate::comparison::ComparisonCounts;
use crate::result::{StepResult, TestCaseResult};
use crate::summary::{Breakdown, Summary};
use netpol_core::policy_name;
use std::fmt::Write as _;

fn counts_line(counts: &ComparisonCounts) -> String {
    format!(
        "same {}, different {}, ignored {}",
        counts.same, counts.different, counts.ignored
    )
}

pub fn render_step(index: usize, step: &StepResult, verbose: bool) -> String {
    let mut out = String::new();
    let names: Vec<String> = step.policies.iter().map(policy_name).collect();
    let _ = writeln!(
        out,
        "Step {}: {} ({} policies: {})",
        index + 1,
        if step.passed() { "pass" } else { "FAIL" },
        names.len(),
        names.join(", ")
    );

    if verbose {
        let _ = writeln!(out, "Expected ingress:\n{}", step.simulated.render_ingress());
        let _ = writeln!(out, "Expected egress:\n{}", step.simulated.render_egress());
    }
    let _ = writeln!(out, "Expected:\n{}", step.simulated.render_combined());

    for (attempt_index, attempt) in step.attempts.iter().enumerate() {
        let last = attempt_index + 1 == step.attempts.len();
        if !verbose && !last {
            continue;
        }
        let _ = writeln!(
            out,
            "Cluster attempt {}: {}",
            attempt_index + 1,
            counts_line(&attempt.comparison.counts())
        );
        let _ = writeln!(out, "{}", attempt.probe.render_combined());
        if !attempt.comparison.is_same() {
            let _ = writeln!(out, "Comparison:\n{}", attempt.comparison.render());
        }
    }
    out
}

pub fn render_test_case(result: &TestCaseResult, verbose: bool) -> String {
    let mut out = String::new();
    let tags: Vec<&str> = result.test_case.tags.iter().map(String::as_str).collect();
    let _ = writeln!(
        out,
        "=== {} [{}] {}",
        result.test_case.description,
        tags.join(", "),
        if result.passed() { "PASSED" } else { "FAILED" }
    );
    if let Some(error) = &result.error {
        let _ = writeln!(out, "error: {}", error);
    }
    for (index, step) in result.steps.iter().enumerate() {
        out.push_str(&render_step(index, step, verbose));
    }
    out
}

fn render_breakdown(out: &mut String, title: &str, breakdown: &Breakdown) {
    let _ = writeln!(out, "{}:", title);
    for (primary, counts) in &breakdown.primary {
        let _ = writeln!(out, "  {}: {} passed, {} failed", primary, counts.passed, counts.failed);
        for (sub, counts) in breakdown.sub.get(primary).into_iter().flatten() {
            let _ = writeln!(out, "    {}: {} passed, {} failed", sub, counts.passed, counts.failed);
        }
    }
}

pub fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} test cases: {} passed, {} failed, {} errored",
        summary.total(),
        summary.passed,
        summary.failed,
        summary.errored
    );
    let _ = writeln!(out, "Cells: {}", counts_line(&summary.comparisons));
    for (protocol, counts) in &summary.by_protocol {
        let _ = writeln!(out, "  {}: {}", protocol, counts_line(counts));
    }
    render_breakdown(&mut out, "Tags", &summary.by_tag);
    render_breakdown(&mut out, "Features", &summary.by_feature);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_generator::TestCase;

    #[test]
    fn test_render_summary() {
        let results = vec![
            TestCaseResult::new(&TestCase::new("ok", ["deny-all"], vec![])),
            TestCaseResult::errored(&TestCase::new("bad", ["port-named"], vec![]), "boom"),
        ];
        let text = render_summary(&Summary::from_results(&results));
        assert!(text.starts_with("2 test cases: 1 passed, 0 failed, 1 errored"));
        assert!(text.contains("  port: 0 passed, 1 failed"));
        assert!(text.contains("    deny-all: 1 passed, 0 failed"));

        let case = render_test_case(&results[1], false);
        assert!(case.contains("FAILED"));
        assert!(case.contains("error: boom"));
    }
}
