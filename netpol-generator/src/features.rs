//! Structural features of NetworkPolicy objects, used for coverage summaries

use crate::tags::StringSet;
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyPeer, NetworkPolicyPort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use netpol_core::builder::{POLICY_TYPE_EGRESS, POLICY_TYPE_INGRESS, DEFAULT_NAMESPACE};
use netpol_core::selector::is_label_selector_empty;
use netpol_core::Protocol;
use serde::Serialize;
use std::collections::BTreeMap;

pub const GENERAL: &str = "general";
pub const TARGET: &str = "target";
pub const INGRESS_PEER: &str = "ingress-peer";
pub const INGRESS_PORT: &str = "ingress-port";
pub const EGRESS_PEER: &str = "egress-peer";
pub const EGRESS_PORT: &str = "egress-port";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub general: StringSet,
    pub target: StringSet,
    pub ingress_peer: StringSet,
    pub ingress_port: StringSet,
    pub egress_peer: StringSet,
    pub egress_port: StringSet,
}

impl Features {
    pub fn from_policies<'a>(policies: impl IntoIterator<Item = &'a NetworkPolicy>) -> Self {
        let mut features = Features::default();
        for policy in policies {
            features.add_policy(policy);
        }
        features
    }

    fn add_policy(&mut self, policy: &NetworkPolicy) {
        let Some(spec) = policy.spec.as_ref() else {
            return;
        };
        let policy_types = spec.policy_types.as_deref().unwrap_or_default();

        if policy
            .metadata
            .namespace
            .as_deref()
            .map_or(true, |ns| ns.is_empty() || ns == DEFAULT_NAMESPACE)
        {
            self.general.insert("default-namespace".to_string());
        }

        self.target.insert(selector_feature("target", &spec.pod_selector));

        if policy_types.iter().any(|t| t == POLICY_TYPE_INGRESS) {
            self.general.insert("ingress".to_string());
            match spec.ingress.as_deref() {
                None => self.general.insert("ingress-rules-nil".to_string()),
                Some([]) => self.general.insert("ingress-rules-empty".to_string()),
                Some(rules) => {
                    self.general.insert(count_feature("ingress-rules", rules.len()));
                    for rule in rules {
                        add_rule(
                            &mut self.ingress_peer,
                            &mut self.ingress_port,
                            rule.from.as_deref(),
                            rule.ports.as_deref(),
                        );
                    }
                    true
                }
            };
        }

        if policy_types.iter().any(|t| t == POLICY_TYPE_EGRESS) {
            self.general.insert("egress".to_string());
            match spec.egress.as_deref() {
                None => self.general.insert("egress-rules-nil".to_string()),
                Some([]) => self.general.insert("egress-rules-empty".to_string()),
                Some(rules) => {
                    self.general.insert(count_feature("egress-rules", rules.len()));
                    for rule in rules {
                        add_rule(
                            &mut self.egress_peer,
                            &mut self.egress_port,
                            rule.to.as_deref(),
                            rule.ports.as_deref(),
                        );
                    }
                    true
                }
            };
        }
    }

    /// Features grouped by category name
    pub fn by_category(&self) -> BTreeMap<&'static str, &StringSet> {
        BTreeMap::from([
            (GENERAL, &self.general),
            (TARGET, &self.target),
            (INGRESS_PEER, &self.ingress_peer),
            (INGRESS_PORT, &self.ingress_port),
            (EGRESS_PEER, &self.egress_peer),
            (EGRESS_PORT, &self.egress_port),
        ])
    }
}

fn count_feature(prefix: &str, count: usize) -> String {
    match count {
        1 => format!("{}-one", prefix),
        2 => format!("{}-two", prefix),
        _ => format!("{}-many", prefix),
    }
}

fn selector_feature(prefix: &str, selector: &LabelSelector) -> String {
    if is_label_selector_empty(selector) {
        return format!("{}-all", prefix);
    }
    let has_labels = selector.match_labels.as_ref().is_some_and(|l| !l.is_empty());
    let has_expressions = selector
        .match_expressions
        .as_ref()
        .is_some_and(|e| !e.is_empty());
    match (has_labels, has_expressions) {
        (true, true) => format!("{}-labels-and-expressions", prefix),
        (true, false) => format!("{}-match-labels", prefix),
        _ => format!("{}-match-expressions", prefix),
    }
}

fn add_rule(
    peers_out: &mut StringSet,
    ports_out: &mut StringSet,
    peers: Option<&[NetworkPolicyPeer]>,
    ports: Option<&[NetworkPolicyPort]>,
) {
    match peers {
        None => {
            peers_out.insert("peers-nil".to_string());
        }
        Some([]) => {
            peers_out.insert("peers-empty".to_string());
        }
        Some(peers) => {
            for peer in peers {
                peers_out.extend(peer_features(peer));
            }
        }
    }

    match ports {
        None => {
            ports_out.insert("ports-nil".to_string());
        }
        Some([]) => {
            ports_out.insert("ports-empty".to_string());
        }
        Some(ports) => {
            for port in ports {
                ports_out.extend(port_features(port));
            }
        }
    }
}

fn peer_features(peer: &NetworkPolicyPeer) -> Vec<String> {
    if let Some(block) = &peer.ip_block {
        let mut features = vec!["ipblock".to_string()];
        if block.except.as_ref().is_some_and(|e| !e.is_empty()) {
            features.push("ipblock-except".to_string());
        }
        return features;
    }

    let namespace = match &peer.namespace_selector {
        None => "namespace-nil".to_string(),
        Some(selector) => selector_feature("namespace", selector),
    };
    let pod = match &peer.pod_selector {
        None => "pod-nil".to_string(),
        Some(selector) => selector_feature("pod", selector),
    };
    vec![namespace, pod]
}

fn port_features(port: &NetworkPolicyPort) -> Vec<String> {
    let protocol = Protocol::from_api(port.protocol.as_deref())
        .map(|p| format!("protocol-{}", p.lower()))
        .unwrap_or_else(|_| "protocol-invalid".to_string());
    let kind = match (&port.port, port.end_port) {
        (None, _) => "port-all",
        (Some(IntOrString::String(_)), _) => "port-named",
        (Some(IntOrString::Int(_)), Some(_)) => "port-range",
        (Some(IntOrString::Int(_)), None) => "port-numbered",
    };
    vec![protocol, kind.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netpol_builder::*;

    #[test]
    fn test_deny_all_features() {
        let features = Features::from_policies(&[deny_all_ingress("x", "deny")]);
        assert!(features.general.contains("ingress"));
        assert!(features.general.contains("ingress-rules-nil"));
        assert!(features.target.contains("target-all"));
        assert!(features.ingress_peer.is_empty());
    }

    #[test]
    fn test_rule_features() {
        let policy = Netpol::new("x", "rules")
            .target(match_labels(&[("pod", "a")]))
            .egress(Some(vec![
                Rule::new(
                    Some(vec![named_port("serve-80-tcp", Protocol::Tcp), port_range(80, 81, Protocol::Udp)]),
                    Some(vec![pod_peer(None, Some(match_expression("pod", "In", &["b"])))]),
                ),
                Rule::peers(vec![ip_block_peer("10.0.0.0/8", &["10.0.0.0/16".to_string()])]),
            ]))
            .build();
        let features = Features::from_policies(&[policy]);

        assert!(features.general.contains("egress-rules-two"));
        assert!(features.target.contains("target-match-labels"));
        for f in ["namespace-nil", "pod-match-expressions", "ipblock", "ipblock-except"] {
            assert!(features.egress_peer.contains(f), "missing {}", f);
        }
        for f in ["port-named", "port-range", "protocol-tcp", "protocol-udp", "ports-nil"] {
            assert!(features.egress_port.contains(f), "missing {}", f);
        }
        assert_eq!(features.by_category().len(), 6);
    }
}
