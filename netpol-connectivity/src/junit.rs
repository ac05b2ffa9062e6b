//! JUnit XML report: one suite, one test case per executed scenario

use crate::error::Result;
use crate::result::TestCaseResult;
use std::fmt::Write as _;
use std::path::Path;

const SUITE_NAME: &str = "netpol-connectivity";

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn failure_message(result: &TestCaseResult) -> Option<String> {
    if let Some(error) = &result.error {
        return Some(format!("execution error: {}", error));
    }
    let failed: Vec<String> = result
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| !step.passed())
        .map(|(index, step)| {
            let different = step
                .last_attempt()
                .map(|a| a.comparison.counts().different)
                .unwrap_or_default();
            format!("step {}: {} differences", index + 1, different)
        })
        .collect();
    if failed.is_empty() {
        None
    } else {
        Some(failed.join("; "))
    }
}

/// Render the report as an XML document
pub fn render(results: &[TestCaseResult]) -> String {
    let failures = results.iter().filter(|r| !r.passed()).count();
    let total_secs: f64 = results.iter().map(|r| r.elapsed.as_secs_f64()).sum();

    let mut out = String::new();
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        out,
        r#"<testsuite name="{}" tests="{}" failures="{}" time="{:.3}">"#,
        SUITE_NAME,
        results.len(),
        failures,
        total_secs
    );
    for result in results {
        let tags: Vec<&str> = result.test_case.tags.iter().map(String::as_str).collect();
        let _ = write!(
            out,
            r#"  <testcase name="{}" classname="{}" time="{:.3}""#,
            escape(&result.test_case.description),
            escape(&tags.join(",")),
            result.elapsed.as_secs_f64()
        );
        match failure_message(result) {
            Some(message) => {
                let _ = writeln!(out, ">");
                let _ = writeln!(
                    out,
                    r#"    <failure message="{}" type="failure"></failure>"#,
                    escape(&message)
                );
                let _ = writeln!(out, "  </testcase>");
            }
            None => {
                let _ = writeln!(out, "/>");
            }
        }
    }
    let _ = writeln!(out, "</testsuite>");
    out
}

pub fn write_report(path: &Path, results: &[TestCaseResult]) -> Result<()> {
    std::fs::write(path, render(results))?;
    tracing::info!("Wrote JUnit results for {} test cases to {:?}", results.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_generator::TestCase;

    #[test]
    fn test_one_failure_element_per_failed_case() {
        let ok = TestCaseResult::new(&TestCase::new("allow <all>", ["allow-all"], vec![]));
        let bad = TestCaseResult::errored(&TestCase::new("deny & drop", ["deny-all"], vec![]), "boom");

        let xml = render(&[ok, bad]);
        assert!(xml.contains(r#"tests="2" failures="1""#));
        assert!(xml.contains(r#"name="allow &lt;all&gt;""#));
        assert!(xml.contains(r#"name="deny &amp; drop""#));
        assert_eq!(xml.matches("<failure ").count(), 1);
        assert!(xml.contains("execution error: boom"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junit.xml");
        write_report(&path, &[]).unwrap();
        let xml = std::fs::read_to_string(&path).unwrap();
        assert!(xml.contains(r#"tests="0""#));
    }
}
