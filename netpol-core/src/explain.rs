//! Text explanations of compiled policies and verdicts

use crate::policy::{AllowedResult, DirectionResult, Policy};
use crate::selector;
use crate::target::{Direction, Target};
use std::fmt::Write;

impl Policy {
    /// Render every target with its source policies and peers
    pub fn explain(&self) -> String {
        let mut out = String::new();
        for direction in [Direction::Ingress, Direction::Egress] {
            let targets: Vec<&Target> = self.targets(direction).collect();
            if targets.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{}:", direction);
            for target in targets {
                out.push_str(&self.explain_target(target));
            }
        }
        if out.is_empty() {
            out.push_str("no policies: all traffic allowed\n");
        }
        out
    }

    pub fn explain_target(&self, target: &Target) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "  Namespace:    {}", target.namespace);
        let _ = writeln!(
            out,
            "  Pod selector: {}",
            selector::describe_label_selector(&target.pod_selector)
        );
        let sources: Vec<String> = target
            .source_rules
            .iter()
            .map(|s| self.source_name(*s))
            .collect();
        let _ = writeln!(out, "  Policies:     {}", sources.join(", "));
        let _ = writeln!(out, "  Peers:");
        for peer in &target.peers {
            let _ = writeln!(out, "    - {}", peer);
        }
        out
    }
}

impl DirectionResult<'_> {
    pub fn explain(&self, policy: &Policy) -> String {
        if !self.has_targets() {
            return "allowed: no targets apply".to_string();
        }
        let names = |targets: &[&Target]| -> Vec<String> {
            targets
                .iter()
                .flat_map(|t| t.source_rules.iter().map(|s| policy.source_name(*s)))
                .collect()
        };
        let verdict = if self.is_allowed() { "allowed" } else { "blocked" };
        format!(
            "{}: allowed by [{}], denied by [{}]",
            verdict,
            names(&self.allowing_targets).join(", "),
            names(&self.denying_targets).join(", ")
        )
    }
}

impl AllowedResult<'_> {
    pub fn explain(&self, policy: &Policy) -> String {
        format!(
            "Ingress {}\nEgress {}\nCombined: {}",
            self.ingress.explain(policy),
            self.egress.explain(policy),
            if self.is_allowed() { "allowed" } else { "blocked" }
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::build_network_policies;
    use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_explain_mentions_policy_and_peers() {
        let np = NetworkPolicy {
            metadata: ObjectMeta {
                name: Some("deny-all".to_string()),
                namespace: Some("x".to_string()),
                ..Default::default()
            },
            spec: Some(NetworkPolicySpec {
                policy_types: Some(vec!["Ingress".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let policy = build_network_policies(false, &[np]).unwrap();
        let text = policy.explain();

        assert!(text.contains("Ingress:"));
        assert!(text.contains("x/deny-all"));
        assert!(text.contains("no peers"));
        assert!(!text.contains("Egress:"));
    }

    #[test]
    fn test_explain_empty_policy() {
        let policy = build_network_policies(false, &[]).unwrap();
        assert!(policy.explain().contains("all traffic allowed"));
    }
}
