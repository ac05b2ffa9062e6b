//! Peer matchers: who may talk to a target, and on which ports

use crate::error::{PolicyError, Result};
use crate::ipblock::IpBlock;
use crate::port::PortMatcher;
use crate::protocol::Protocol;
use crate::selector::{self, Labels};
use crate::traffic::TrafficPeer;
use k8s_openapi::api::networking::v1::{NetworkPolicyPeer, NetworkPolicyPort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::fmt;

/// Which namespaces a pod peer may live in
#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceMatcher {
    All,
    Exact(String),
    LabelSelector(LabelSelector),
}

impl NamespaceMatcher {
    /// nil selector scopes to the policy namespace, empty selector means all namespaces
    pub fn from_api(policy_namespace: &str, selector: Option<&LabelSelector>) -> Self {
        match selector {
            None => NamespaceMatcher::Exact(policy_namespace.to_string()),
            Some(sel) if selector::is_label_selector_empty(sel) => NamespaceMatcher::All,
            Some(sel) => NamespaceMatcher::LabelSelector(sel.clone()),
        }
    }

    pub fn allows(&self, namespace: &str, namespace_labels: &Labels) -> bool {
        match self {
            NamespaceMatcher::All => true,
            NamespaceMatcher::Exact(name) => name == namespace,
            NamespaceMatcher::LabelSelector(sel) => selector::is_match(sel, namespace_labels),
        }
    }

    pub fn primary_key(&self) -> String {
        match self {
            NamespaceMatcher::All => "all namespaces".to_string(),
            NamespaceMatcher::Exact(name) => format!("namespace {}", name),
            NamespaceMatcher::LabelSelector(sel) => {
                format!("namespaces {}", selector::serialize_label_selector(sel))
            }
        }
    }
}

impl fmt::Display for NamespaceMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceMatcher::All => f.write_str("all namespaces"),
            NamespaceMatcher::Exact(name) => write!(f, "namespace {}", name),
            NamespaceMatcher::LabelSelector(sel) => {
                write!(f, "namespaces with {}", selector::describe_label_selector(sel))
            }
        }
    }
}

/// Which pods within the matched namespaces
#[derive(Debug, Clone, PartialEq)]
pub enum PodMatcher {
    All,
    LabelSelector(LabelSelector),
}

impl PodMatcher {
    pub fn from_api(selector: Option<&LabelSelector>) -> Self {
        match selector {
            Some(sel) if !selector::is_label_selector_empty(sel) => {
                PodMatcher::LabelSelector(sel.clone())
            }
            _ => PodMatcher::All,
        }
    }

    pub fn allows(&self, pod_labels: &Labels) -> bool {
        match self {
            PodMatcher::All => true,
            PodMatcher::LabelSelector(sel) => selector::is_match(sel, pod_labels),
        }
    }

    pub fn primary_key(&self) -> String {
        match self {
            PodMatcher::All => "all pods".to_string(),
            PodMatcher::LabelSelector(sel) => {
                format!("pods {}", selector::serialize_label_selector(sel))
            }
        }
    }
}

impl fmt::Display for PodMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodMatcher::All => f.write_str("all pods"),
            PodMatcher::LabelSelector(sel) => {
                write!(f, "pods with {}", selector::describe_label_selector(sel))
            }
        }
    }
}

/// `ipBlock` peer restricted to a port condition
#[derive(Debug, Clone, PartialEq)]
pub struct IpPeerMatcher {
    pub ip_block: IpBlock,
    pub port: PortMatcher,
}

/// Namespace/pod selector peer restricted to a port condition
#[derive(Debug, Clone, PartialEq)]
pub struct PodPeerMatcher {
    pub namespace: NamespaceMatcher,
    pub pod: PodMatcher,
    pub port: PortMatcher,
}

impl PodPeerMatcher {
    /// Key of the (namespace, pod) part, ignoring ports
    pub fn peer_key(&self) -> String {
        format!("{} / {}", self.namespace.primary_key(), self.pod.primary_key())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerMatcher {
    /// Any peer, any port
    All,
    /// Any peer, restricted ports
    PortsForAllPeers(PortMatcher),
    IpBlock(IpPeerMatcher),
    Pod(PodPeerMatcher),
    /// Matches nothing; identity for a direction without rules
    None,
}

impl PeerMatcher {
    /// Expand one rule's (ports, peers) cross product
    pub fn from_rule(
        policy_name: &str,
        policy_namespace: &str,
        ports: &[NetworkPolicyPort],
        peers: &[NetworkPolicyPeer],
    ) -> Result<Vec<PeerMatcher>> {
        let port = PortMatcher::from_api(ports)?;

        if peers.is_empty() {
            return Ok(vec![match port {
                PortMatcher::All => PeerMatcher::All,
                specific => PeerMatcher::PortsForAllPeers(specific),
            }]);
        }

        peers
            .iter()
            .map(|peer| Self::from_peer(policy_name, policy_namespace, peer, port.clone()))
            .collect()
    }

    fn from_peer(
        policy_name: &str,
        policy_namespace: &str,
        peer: &NetworkPolicyPeer,
        port: PortMatcher,
    ) -> Result<PeerMatcher> {
        if let Some(block) = &peer.ip_block {
            if peer.namespace_selector.is_some() || peer.pod_selector.is_some() {
                return Err(PolicyError::malformed(
                    policy_name,
                    "ipBlock cannot be combined with podSelector or namespaceSelector",
                ));
            }
            let ip_block = IpBlock::from_api(block)?;
            return Ok(PeerMatcher::IpBlock(IpPeerMatcher { ip_block, port }));
        }

        Ok(PeerMatcher::Pod(PodPeerMatcher {
            namespace: NamespaceMatcher::from_api(
                policy_namespace,
                peer.namespace_selector.as_ref(),
            ),
            pod: PodMatcher::from_api(peer.pod_selector.as_ref()),
            port,
        }))
    }

    pub fn allows(
        &self,
        peer: &TrafficPeer,
        port: u16,
        port_name: Option<&str>,
        protocol: Protocol,
    ) -> bool {
        match self {
            PeerMatcher::All => true,
            PeerMatcher::PortsForAllPeers(ports) => ports.allows(port, port_name, protocol),
            PeerMatcher::IpBlock(m) => {
                peer.ip.map_or(false, |ip| m.ip_block.contains(ip))
                    && m.port.allows(port, port_name, protocol)
            }
            PeerMatcher::Pod(m) => match &peer.internal {
                Some(internal) => {
                    m.namespace
                        .allows(&internal.namespace, &internal.namespace_labels)
                        && m.pod.allows(&internal.pod_labels)
                        && m.port.allows(port, port_name, protocol)
                }
                None => false,
            },
            PeerMatcher::None => false,
        }
    }
}

impl fmt::Display for PeerMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerMatcher::All => f.write_str("all peers on all ports and protocols"),
            PeerMatcher::PortsForAllPeers(port) => write!(f, "all peers on {}", port),
            PeerMatcher::IpBlock(m) => write!(f, "ip block {} on {}", m.ip_block, m.port),
            PeerMatcher::Pod(m) => write!(f, "{} in {} on {}", m.pod, m.namespace, m.port),
            PeerMatcher::None => f.write_str("no peers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::IPBlock;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn selector(pairs: &[(&str, &str)]) -> LabelSelector {
        LabelSelector {
            match_labels: Some(labels(pairs)),
            match_expressions: None,
        }
    }

    fn pod_peer(ns: &str, ns_labels: &[(&str, &str)], pod_labels: &[(&str, &str)]) -> TrafficPeer {
        TrafficPeer::internal(ns, labels(ns_labels), labels(pod_labels), None)
    }

    #[test]
    fn test_empty_rule_is_all_peers() {
        let matchers = PeerMatcher::from_rule("x/p", "x", &[], &[]).unwrap();
        assert_eq!(matchers, vec![PeerMatcher::All]);
    }

    #[test]
    fn test_ports_without_peers() {
        let ports = vec![NetworkPolicyPort {
            port: Some(IntOrString::Int(80)),
            protocol: None,
            end_port: None,
        }];
        let matchers = PeerMatcher::from_rule("x/p", "x", &ports, &[]).unwrap();
        assert!(matches!(matchers[0], PeerMatcher::PortsForAllPeers(_)));

        let external = TrafficPeer::external("1.2.3.4".parse().unwrap());
        assert!(matchers[0].allows(&external, 80, None, Protocol::Tcp));
        assert!(!matchers[0].allows(&external, 81, None, Protocol::Tcp));
    }

    #[test]
    fn test_nil_namespace_selector_scopes_to_policy_namespace() {
        let peer = NetworkPolicyPeer {
            pod_selector: Some(LabelSelector::default()),
            ..Default::default()
        };
        let matchers = PeerMatcher::from_rule("x/p", "x", &[], &[peer]).unwrap();

        assert!(matchers[0].allows(&pod_peer("x", &[], &[]), 80, None, Protocol::Tcp));
        assert!(!matchers[0].allows(&pod_peer("y", &[], &[]), 80, None, Protocol::Tcp));
    }

    #[test]
    fn test_empty_namespace_selector_matches_all_namespaces() {
        let peer = NetworkPolicyPeer {
            namespace_selector: Some(LabelSelector::default()),
            ..Default::default()
        };
        let matchers = PeerMatcher::from_rule("x/p", "x", &[], &[peer]).unwrap();

        assert!(matchers[0].allows(&pod_peer("y", &[], &[]), 80, None, Protocol::Tcp));
        // selector peers never match external endpoints
        let external = TrafficPeer::external("1.2.3.4".parse().unwrap());
        assert!(!matchers[0].allows(&external, 80, None, Protocol::Tcp));
    }

    #[test]
    fn test_and_versus_or() {
        let and_peer = NetworkPolicyPeer {
            namespace_selector: Some(selector(&[("user", "alice")])),
            pod_selector: Some(selector(&[("role", "client")])),
            ..Default::default()
        };
        let or_peers = vec![
            NetworkPolicyPeer {
                namespace_selector: Some(selector(&[("user", "alice")])),
                ..Default::default()
            },
            NetworkPolicyPeer {
                pod_selector: Some(selector(&[("role", "client")])),
                ..Default::default()
            },
        ];
        let client = pod_peer("y", &[("user", "alice")], &[]);

        let and_matchers = PeerMatcher::from_rule("x/and", "x", &[], &[and_peer]).unwrap();
        let or_matchers = PeerMatcher::from_rule("x/or", "x", &[], &or_peers).unwrap();

        assert!(!and_matchers
            .iter()
            .any(|m| m.allows(&client, 80, None, Protocol::Tcp)));
        assert!(or_matchers
            .iter()
            .any(|m| m.allows(&client, 80, None, Protocol::Tcp)));
    }

    #[test]
    fn test_ip_block_peer() {
        let peer = NetworkPolicyPeer {
            ip_block: Some(IPBlock {
                cidr: "192.168.242.0/24".to_string(),
                except: Some(vec!["192.168.242.0/28".to_string()]),
            }),
            ..Default::default()
        };
        let matchers = PeerMatcher::from_rule("x/p", "x", &[], &[peer]).unwrap();

        let inside = TrafficPeer::external("192.168.242.249".parse().unwrap());
        let excepted = TrafficPeer::external("192.168.242.3".parse().unwrap());
        assert!(matchers[0].allows(&inside, 80, None, Protocol::Tcp));
        assert!(!matchers[0].allows(&excepted, 80, None, Protocol::Tcp));
    }

    #[test]
    fn test_ip_block_with_selector_is_malformed() {
        let peer = NetworkPolicyPeer {
            ip_block: Some(IPBlock {
                cidr: "10.0.0.0/8".to_string(),
                except: None,
            }),
            pod_selector: Some(LabelSelector::default()),
            ..Default::default()
        };
        assert!(matches!(
            PeerMatcher::from_rule("x/p", "x", &[], &[peer]),
            Err(PolicyError::MalformedPolicy { .. })
        ));
    }

    #[test]
    fn test_none_matches_nothing() {
        let peer = pod_peer("x", &[], &[]);
        assert!(!PeerMatcher::None.allows(&peer, 80, None, Protocol::Tcp));
        assert!(PeerMatcher::All.allows(&peer, 80, None, Protocol::Tcp));
    }
}
