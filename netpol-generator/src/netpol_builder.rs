//! Small constructors for NetworkPolicy fragments

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use netpol_core::builder::{POLICY_TYPE_EGRESS, POLICY_TYPE_INGRESS};
use netpol_core::{Labels, Protocol};

/// Ports and peers of one rule. `None` and `Some(vec![])` are distinct on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rule {
    pub ports: Option<Vec<NetworkPolicyPort>>,
    pub peers: Option<Vec<NetworkPolicyPeer>>,
}

impl Rule {
    pub fn new(ports: Option<Vec<NetworkPolicyPort>>, peers: Option<Vec<NetworkPolicyPeer>>) -> Self {
        Self { ports, peers }
    }

    /// A rule with neither ports nor peers: allows everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn ports(ports: Vec<NetworkPolicyPort>) -> Self {
        Self::new(Some(ports), None)
    }

    pub fn peers(peers: Vec<NetworkPolicyPeer>) -> Self {
        Self::new(None, Some(peers))
    }

    fn ingress(self) -> NetworkPolicyIngressRule {
        NetworkPolicyIngressRule {
            from: self.peers,
            ports: self.ports,
        }
    }

    fn egress(self) -> NetworkPolicyEgressRule {
        NetworkPolicyEgressRule {
            to: self.peers,
            ports: self.ports,
        }
    }
}

/// Builder for a single NetworkPolicy
#[derive(Debug, Clone)]
pub struct Netpol {
    name: String,
    namespace: String,
    target: LabelSelector,
    ingress: Option<Option<Vec<Rule>>>,
    egress: Option<Option<Vec<Rule>>>,
}

impl Netpol {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            target: LabelSelector::default(),
            ingress: None,
            egress: None,
        }
    }

    pub fn target(mut self, selector: LabelSelector) -> Self {
        self.target = selector;
        self
    }

    /// Add the Ingress policy type; `None` leaves the rule list nil
    pub fn ingress(mut self, rules: Option<Vec<Rule>>) -> Self {
        self.ingress = Some(rules);
        self
    }

    /// Add the Egress policy type; `None` leaves the rule list nil
    pub fn egress(mut self, rules: Option<Vec<Rule>>) -> Self {
        self.egress = Some(rules);
        self
    }

    pub fn build(self) -> NetworkPolicy {
        let mut policy_types = Vec::new();
        if self.ingress.is_some() {
            policy_types.push(POLICY_TYPE_INGRESS.to_string());
        }
        if self.egress.is_some() {
            policy_types.push(POLICY_TYPE_EGRESS.to_string());
        }

        NetworkPolicy {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                ..Default::default()
            },
            spec: Some(NetworkPolicySpec {
                pod_selector: self.target,
                policy_types: Some(policy_types),
                ingress: self
                    .ingress
                    .flatten()
                    .map(|rules| rules.into_iter().map(Rule::ingress).collect()),
                egress: self
                    .egress
                    .flatten()
                    .map(|rules| rules.into_iter().map(Rule::egress).collect()),
            }),
            ..Default::default()
        }
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn empty_selector() -> LabelSelector {
    LabelSelector::default()
}

pub fn match_labels(pairs: &[(&str, &str)]) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels(pairs)),
        match_expressions: None,
    }
}

pub fn match_expression(key: &str, operator: &str, values: &[&str]) -> LabelSelector {
    LabelSelector {
        match_labels: None,
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| v.to_string()).collect())
            },
        }]),
    }
}

pub fn pod_peer(namespace: Option<LabelSelector>, pod: Option<LabelSelector>) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: None,
        namespace_selector: namespace,
        pod_selector: pod,
    }
}

pub fn ip_block_peer(cidr: &str, except: &[String]) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: Some(IPBlock {
            cidr: cidr.to_string(),
            except: if except.is_empty() {
                None
            } else {
                Some(except.to_vec())
            },
        }),
        namespace_selector: None,
        pod_selector: None,
    }
}

pub fn numbered_port(port: u16, protocol: Option<Protocol>) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::Int(i32::from(port))),
        protocol: protocol.map(|p| p.as_str().to_string()),
        end_port: None,
    }
}

pub fn named_port(name: &str, protocol: Protocol) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::String(name.to_string())),
        protocol: Some(protocol.as_str().to_string()),
        end_port: None,
    }
}

pub fn port_range(from: u16, to: u16, protocol: Protocol) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::Int(i32::from(from))),
        protocol: Some(protocol.as_str().to_string()),
        end_port: Some(i32::from(to)),
    }
}

pub fn protocol_only(protocol: Protocol) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: None,
        protocol: Some(protocol.as_str().to_string()),
        end_port: None,
    }
}

pub fn deny_all_ingress(namespace: &str, name: &str) -> NetworkPolicy {
    Netpol::new(namespace, name).ingress(None).build()
}

pub fn deny_all_egress(namespace: &str, name: &str) -> NetworkPolicy {
    Netpol::new(namespace, name).egress(None).build()
}

pub fn allow_all_ingress(namespace: &str, name: &str) -> NetworkPolicy {
    Netpol::new(namespace, name)
        .ingress(Some(vec![Rule::allow_all()]))
        .build()
}

/// Egress rule allowing DNS lookups on both TCP and UDP
pub fn dns_rule(port: u16) -> NetworkPolicyEgressRule {
    Rule::ports(vec![
        numbered_port(port, Some(Protocol::Udp)),
        numbered_port(port, Some(Protocol::Tcp)),
    ])
    .egress()
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_core::build_network_policies;

    #[test]
    fn test_policy_types_follow_directions() {
        let policy = Netpol::new("x", "both")
            .target(match_labels(&[("pod", "a")]))
            .ingress(Some(vec![]))
            .egress(None)
            .build();
        let spec = policy.spec.unwrap();
        assert_eq!(
            spec.policy_types.unwrap(),
            vec!["Ingress".to_string(), "Egress".to_string()]
        );
        assert_eq!(spec.ingress, Some(vec![]));
        assert_eq!(spec.egress, None);
    }

    #[test]
    fn test_built_policies_compile() {
        let policy = Netpol::new("x", "mixed")
            .ingress(Some(vec![
                Rule::new(
                    Some(vec![port_range(80, 81, Protocol::Tcp), named_port("serve-80-udp", Protocol::Udp)]),
                    Some(vec![pod_peer(Some(empty_selector()), Some(match_expression("pod", "In", &["b"])))]),
                ),
                Rule::peers(vec![ip_block_peer("10.0.0.0/8", &["10.1.0.0/16".to_string()])]),
            ]))
            .build();
        let compiled = build_network_policies(false, &[policy]).unwrap();
        assert!(!compiled.is_empty());
    }

    #[test]
    fn test_dns_rule() {
        let rule = dns_rule(53);
        assert!(rule.to.is_none());
        assert_eq!(rule.ports.unwrap().len(), 2);
    }
}
