//! Targets: direction-scoped pod selections and the peers allowed to reach them

use crate::peer::PeerMatcher;
use crate::protocol::Protocol;
use crate::selector::{self, Labels};
use crate::simplify;
use crate::traffic::TrafficPeer;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => f.write_str("Ingress"),
            Direction::Egress => f.write_str("Egress"),
        }
    }
}

/// Index of a source NetworkPolicy in the list owned by the compiled `Policy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceRef(pub usize);

/// Build the primary key of a (namespace, pod selector) pair
pub fn primary_key(namespace: &str, pod_selector: &LabelSelector) -> String {
    format!(
        "{{namespace: {}, podSelector: {}}}",
        namespace,
        selector::serialize_label_selector(pod_selector)
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub namespace: String,
    pub pod_selector: LabelSelector,
    pub peers: Vec<PeerMatcher>,
    pub source_rules: Vec<SourceRef>,
    primary_key: String,
}

impl Target {
    pub fn new(
        namespace: impl Into<String>,
        pod_selector: LabelSelector,
        peers: Vec<PeerMatcher>,
        source_rules: Vec<SourceRef>,
    ) -> Self {
        let namespace = namespace.into();
        let primary_key = primary_key(&namespace, &pod_selector);
        Self {
            namespace,
            pod_selector,
            peers,
            source_rules,
            primary_key,
        }
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Union with another target of the same primary key
    pub fn combine(&mut self, other: Target) {
        debug_assert_eq!(self.primary_key, other.primary_key);
        self.peers.extend(other.peers);
        for source in other.source_rules {
            if !self.source_rules.contains(&source) {
                self.source_rules.push(source);
            }
        }
    }

    /// Whether this target selects the given pod
    pub fn is_applied_to(&self, namespace: &str, pod_labels: &Labels) -> bool {
        self.namespace == namespace && selector::is_match(&self.pod_selector, pod_labels)
    }

    /// Whether any peer matcher admits the other side of the connection
    pub fn allows(
        &self,
        peer: &TrafficPeer,
        port: u16,
        port_name: Option<&str>,
        protocol: Protocol,
    ) -> bool {
        self.peers
            .iter()
            .any(|m| m.allows(peer, port, port_name, protocol))
    }

    /// Merge equivalent peer matchers in place
    pub fn simplify(&mut self) {
        let peers = std::mem::take(&mut self.peers);
        self.peers = simplify::simplify(peers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(pairs: &[(&str, &str)]) -> LabelSelector {
        LabelSelector {
            match_labels: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            match_expressions: None,
        }
    }

    #[test]
    fn test_primary_key_ignores_representation() {
        let a = Target::new("x", LabelSelector::default(), vec![], vec![]);
        let b = Target::new(
            "x",
            LabelSelector {
                match_labels: Some(Labels::new()),
                match_expressions: None,
            },
            vec![],
            vec![],
        );
        assert_eq!(a.primary_key(), b.primary_key());

        let c = Target::new("y", LabelSelector::default(), vec![], vec![]);
        assert_ne!(a.primary_key(), c.primary_key());
    }

    #[test]
    fn test_combine_keeps_all_peers() {
        let mut a = Target::new("x", selector(&[("pod", "a")]), vec![PeerMatcher::None], vec![SourceRef(0)]);
        let b = Target::new("x", selector(&[("pod", "a")]), vec![PeerMatcher::All], vec![SourceRef(1), SourceRef(0)]);
        a.combine(b);

        assert_eq!(a.peers, vec![PeerMatcher::None, PeerMatcher::All]);
        assert_eq!(a.source_rules, vec![SourceRef(0), SourceRef(1)]);
    }

    #[test]
    fn test_is_applied_to() {
        let target = Target::new("x", selector(&[("pod", "a")]), vec![], vec![]);
        let a: Labels = [("pod".to_string(), "a".to_string())].into_iter().collect();
        let b: Labels = [("pod".to_string(), "b".to_string())].into_iter().collect();

        assert!(target.is_applied_to("x", &a));
        assert!(!target.is_applied_to("x", &b));
        assert!(!target.is_applied_to("y", &a));
    }
}
