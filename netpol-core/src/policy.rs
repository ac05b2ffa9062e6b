//! Compiled policy and traffic evaluation
//!
//! A `Policy` holds one target map per direction, keyed by target primary key.
//! Evaluation follows NetworkPolicy union semantics: a pod selected by no target
//! is unrestricted, and a selected pod admits traffic if any of its targets does.

use crate::builder::policy_name;
use crate::selector::Labels;
use crate::target::{Direction, SourceRef, Target};
use crate::traffic::{Traffic, TrafficPeer};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Policy {
    sources: Vec<NetworkPolicy>,
    ingress: BTreeMap<String, Target>,
    egress: BTreeMap<String, Target>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty policy that owns the source objects targets refer back to
    pub fn with_sources(sources: Vec<NetworkPolicy>) -> Self {
        Self {
            sources,
            ..Self::default()
        }
    }

    pub fn sources(&self) -> &[NetworkPolicy] {
        &self.sources
    }

    pub fn source(&self, source: SourceRef) -> Option<&NetworkPolicy> {
        self.sources.get(source.0)
    }

    /// `namespace/name` of a referenced source policy
    pub fn source_name(&self, source: SourceRef) -> String {
        match self.source(source) {
            Some(np) => policy_name(np),
            None => format!("<unknown policy #{}>", source.0),
        }
    }

    fn targets_mut(&mut self, direction: Direction) -> &mut BTreeMap<String, Target> {
        match direction {
            Direction::Ingress => &mut self.ingress,
            Direction::Egress => &mut self.egress,
        }
    }

    /// Upsert by primary key, combining peer matchers on collision
    pub fn add_target(&mut self, direction: Direction, target: Target) {
        let targets = self.targets_mut(direction);
        match targets.get_mut(target.primary_key()) {
            Some(existing) => existing.combine(target),
            None => {
                targets.insert(target.primary_key().to_string(), target);
            }
        }
    }

    /// Targets in primary-key order
    pub fn targets(&self, direction: Direction) -> impl Iterator<Item = &Target> {
        match direction {
            Direction::Ingress => self.ingress.values(),
            Direction::Egress => self.egress.values(),
        }
    }

    pub fn target(&self, direction: Direction, primary_key: &str) -> Option<&Target> {
        match direction {
            Direction::Ingress => self.ingress.get(primary_key),
            Direction::Egress => self.egress.get(primary_key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ingress.is_empty() && self.egress.is_empty()
    }

    /// Every target of a direction that selects the pod
    pub fn targets_applying_to_pod(
        &self,
        direction: Direction,
        namespace: &str,
        pod_labels: &Labels,
    ) -> Vec<&Target> {
        self.targets(direction)
            .filter(|t| t.is_applied_to(namespace, pod_labels))
            .collect()
    }

    /// Ingress and egress targets selecting the pod
    pub fn targets_for_pod(
        &self,
        namespace: &str,
        pod_labels: &Labels,
    ) -> (Vec<&Target>, Vec<&Target>) {
        (
            self.targets_applying_to_pod(Direction::Ingress, namespace, pod_labels),
            self.targets_applying_to_pod(Direction::Egress, namespace, pod_labels),
        )
    }

    /// Evaluate both directions of a connection
    pub fn is_traffic_allowed(&self, traffic: &Traffic) -> AllowedResult<'_> {
        AllowedResult {
            ingress: self.is_direction_allowed(Direction::Ingress, traffic),
            egress: self.is_direction_allowed(Direction::Egress, traffic),
        }
    }

    pub fn is_direction_allowed(&self, direction: Direction, traffic: &Traffic) -> DirectionResult<'_> {
        let (target_peer, other_peer) = match direction {
            Direction::Ingress => (&traffic.destination, &traffic.source),
            Direction::Egress => (&traffic.source, &traffic.destination),
        };

        // external endpoints are not subject to NetworkPolicy
        let Some(internal) = &target_peer.internal else {
            return DirectionResult::default();
        };

        let mut result = DirectionResult::default();
        for target in self.targets_applying_to_pod(direction, &internal.namespace, &internal.pod_labels) {
            if self.target_allows(target, other_peer, traffic) {
                result.allowing_targets.push(target);
            } else {
                result.denying_targets.push(target);
            }
        }
        result
    }

    fn target_allows(&self, target: &Target, peer: &TrafficPeer, traffic: &Traffic) -> bool {
        target.allows(
            peer,
            traffic.resolved_port,
            traffic.resolved_port_name.as_deref(),
            traffic.protocol,
        )
    }

    /// Simplify the peer matchers of every target
    pub fn simplify(&mut self) {
        for target in self.ingress.values_mut().chain(self.egress.values_mut()) {
            target.simplify();
        }
    }
}

/// Targets that matched a pod in one direction, split by verdict
#[derive(Debug, Clone, Default)]
pub struct DirectionResult<'a> {
    pub allowing_targets: Vec<&'a Target>,
    pub denying_targets: Vec<&'a Target>,
}

impl DirectionResult<'_> {
    /// Allowed if some target allows, or no target applies
    pub fn is_allowed(&self) -> bool {
        !self.allowing_targets.is_empty() || self.denying_targets.is_empty()
    }

    pub fn has_targets(&self) -> bool {
        !self.allowing_targets.is_empty() || !self.denying_targets.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AllowedResult<'a> {
    pub ingress: DirectionResult<'a>,
    pub egress: DirectionResult<'a>,
}

impl AllowedResult<'_> {
    pub fn is_allowed(&self) -> bool {
        self.ingress.is_allowed() && self.egress.is_allowed()
    }
}
