//! Compile NetworkPolicy objects into a `Policy`

use crate::error::{PolicyError, Result};
use crate::peer::PeerMatcher;
use crate::policy::Policy;
use crate::target::{Direction, SourceRef, Target};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use tracing::debug;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const POLICY_TYPE_INGRESS: &str = "Ingress";
pub const POLICY_TYPE_EGRESS: &str = "Egress";

/// Compile a list of policies, optionally simplifying each target afterwards
pub fn build_network_policies(simplify: bool, policies: &[NetworkPolicy]) -> Result<Policy> {
    let mut policy = Policy::with_sources(policies.to_vec());

    for (index, netpol) in policies.iter().enumerate() {
        let (ingress, egress) = build_targets(SourceRef(index), netpol)?;
        if let Some(target) = ingress {
            policy.add_target(Direction::Ingress, target);
        }
        if let Some(target) = egress {
            policy.add_target(Direction::Egress, target);
        }
    }

    if simplify {
        policy.simplify();
    }

    debug!(
        "Compiled {} network policies into {} ingress and {} egress targets",
        policies.len(),
        policy.targets(Direction::Ingress).count(),
        policy.targets(Direction::Egress).count()
    );

    Ok(policy)
}

/// Namespace of a policy, `default` when unset
pub fn policy_namespace(netpol: &NetworkPolicy) -> &str {
    netpol
        .metadata
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
}

/// `namespace/name` for messages
pub fn policy_name(netpol: &NetworkPolicy) -> String {
    format!(
        "{}/{}",
        policy_namespace(netpol),
        netpol.metadata.name.as_deref().unwrap_or_default()
    )
}

/// The policy as the API server stores it: empty `policyTypes` become
/// `Ingress`, plus `Egress` when there are egress rules
pub fn with_default_policy_types(netpol: &NetworkPolicy) -> NetworkPolicy {
    let mut stored = netpol.clone();
    if let Some(spec) = stored.spec.as_mut() {
        if spec.policy_types.as_ref().map_or(true, Vec::is_empty) {
            let mut types = vec![POLICY_TYPE_INGRESS.to_string()];
            if spec.egress.as_ref().is_some_and(|rules| !rules.is_empty()) {
                types.push(POLICY_TYPE_EGRESS.to_string());
            }
            spec.policy_types = Some(types);
        }
    }
    stored
}

/// Build the ingress and egress targets of one policy
pub fn build_targets(
    source: SourceRef,
    netpol: &NetworkPolicy,
) -> Result<(Option<Target>, Option<Target>)> {
    let name = policy_name(netpol);
    let namespace = policy_namespace(netpol);
    let spec = netpol
        .spec
        .as_ref()
        .ok_or_else(|| PolicyError::malformed(&name, "missing spec"))?;

    let policy_types = spec
        .policy_types
        .as_deref()
        .filter(|types| !types.is_empty())
        .ok_or_else(|| PolicyError::MissingPolicyTypes {
            policy: name.clone(),
        })?;

    let mut ingress = None;
    let mut egress = None;

    for policy_type in policy_types {
        match policy_type.as_str() {
            POLICY_TYPE_INGRESS => {
                // an empty rule list denies everything
                let mut peers = vec![PeerMatcher::None];
                for rule in spec.ingress.as_deref().unwrap_or_default() {
                    peers.extend(PeerMatcher::from_rule(
                        &name,
                        namespace,
                        rule.ports.as_deref().unwrap_or_default(),
                        rule.from.as_deref().unwrap_or_default(),
                    )?);
                }
                ingress = Some(Target::new(namespace, spec.pod_selector.clone(), peers, vec![source]));
            }
            POLICY_TYPE_EGRESS => {
                let mut peers = vec![PeerMatcher::None];
                for rule in spec.egress.as_deref().unwrap_or_default() {
                    peers.extend(PeerMatcher::from_rule(
                        &name,
                        namespace,
                        rule.ports.as_deref().unwrap_or_default(),
                        rule.to.as_deref().unwrap_or_default(),
                    )?);
                }
                egress = Some(Target::new(namespace, spec.pod_selector.clone(), peers, vec![source]));
            }
            other => {
                return Err(PolicyError::malformed(
                    &name,
                    format!("unknown policy type {:?}", other),
                ))
            }
        }
    }

    Ok((ingress, egress))
}
