//! Tags attached to generated test cases
//!
//! Every tag belongs to exactly one category. Include/exclude filters accept
//! either a tag or a category name; a category stands for all of its tags.

use std::collections::BTreeSet;

pub const CATEGORY_POLICY_SHAPE: &str = "policy-shape";
pub const CATEGORY_DIRECTION: &str = "direction";
pub const CATEGORY_RULES: &str = "rules";
pub const CATEGORY_TARGET: &str = "target";
pub const CATEGORY_PORT: &str = "port";
pub const CATEGORY_PROTOCOL: &str = "protocol";
pub const CATEGORY_PEER: &str = "peer";
pub const CATEGORY_MULTI_POLICY: &str = "multi-policy";
pub const CATEGORY_ACTION: &str = "action";

pub const NO_POLICY: &str = "no-policy";
pub const INGRESS_ONLY: &str = "ingress-only";
pub const EGRESS_ONLY: &str = "egress-only";
pub const INGRESS_AND_EGRESS: &str = "ingress-and-egress";
pub const NO_DIRECTION: &str = "no-direction";

pub const HAS_INGRESS: &str = "has-ingress";
pub const HAS_EGRESS: &str = "has-egress";

pub const RULES_NIL: &str = "rules-nil";
pub const RULES_EMPTY: &str = "rules-empty";
pub const RULES_ONE: &str = "rules-one";
pub const RULES_TWO: &str = "rules-two";

pub const TARGET_SELECTOR_EMPTY: &str = "target-selector-empty";
pub const TARGET_MATCH_LABELS: &str = "target-match-labels";
pub const TARGET_MATCH_EXPRESSIONS: &str = "target-match-expressions";

pub const PORT_NIL: &str = "port-nil";
pub const PORT_EMPTY: &str = "port-empty";
pub const PORT_NUMBERED: &str = "port-numbered";
pub const PORT_NAMED: &str = "port-named";
pub const PORT_RANGE: &str = "port-range";
pub const PORT_PROTOCOL_ONLY: &str = "port-protocol-only";

pub const PROTOCOL_TCP: &str = "protocol-tcp";
pub const PROTOCOL_UDP: &str = "protocol-udp";
pub const PROTOCOL_SCTP: &str = "protocol-sctp";

pub const PEER_NIL: &str = "peer-nil";
pub const PEER_EMPTY: &str = "peer-empty";
pub const POD_SELECTOR_ONLY: &str = "pod-selector-only";
pub const POD_SELECTOR_EMPTY: &str = "pod-selector-empty";
pub const POD_SELECTOR_EXPRESSIONS: &str = "pod-selector-expressions";
pub const NAMESPACE_SELECTOR_ONLY: &str = "namespace-selector-only";
pub const NAMESPACE_SELECTOR_EMPTY: &str = "namespace-selector-empty";
pub const NAMESPACE_SELECTOR_NIL: &str = "namespace-selector-nil";
pub const POD_AND_NAMESPACE_SELECTOR: &str = "pod-and-namespace-selector";
pub const PEER_IPBLOCK: &str = "peer-ipblock";
pub const PEER_IPBLOCK_EXCEPT: &str = "peer-ipblock-except";
pub const PEERS_TWO: &str = "peers-two";

pub const DENY_ALL: &str = "deny-all";
pub const ALLOW_ALL: &str = "allow-all";
pub const ACCIDENTAL_AND: &str = "accidental-and";
pub const ACCIDENTAL_OR: &str = "accidental-or";
pub const SPLIT_DIRECTIONS: &str = "split-directions";

pub const SET_POD_LABELS: &str = "set-pod-labels";
pub const SET_NAMESPACE_LABELS: &str = "set-namespace-labels";
pub const CREATE_POLICY: &str = "create-policy";
pub const UPDATE_POLICY: &str = "update-policy";
pub const DELETE_POLICY: &str = "delete-policy";
pub const READ_POLICIES: &str = "read-policies";
pub const CREATE_POD: &str = "create-pod";
pub const DELETE_POD: &str = "delete-pod";
pub const CREATE_NAMESPACE: &str = "create-namespace";
pub const DELETE_NAMESPACE: &str = "delete-namespace";
pub const MULTI_STEP: &str = "multi-step";

pub const TAG_CATEGORIES: &[(&str, &[&str])] = &[
    (
        CATEGORY_POLICY_SHAPE,
        &[NO_POLICY, INGRESS_ONLY, EGRESS_ONLY, INGRESS_AND_EGRESS, NO_DIRECTION],
    ),
    (CATEGORY_DIRECTION, &[HAS_INGRESS, HAS_EGRESS]),
    (CATEGORY_RULES, &[RULES_NIL, RULES_EMPTY, RULES_ONE, RULES_TWO]),
    (
        CATEGORY_TARGET,
        &[TARGET_SELECTOR_EMPTY, TARGET_MATCH_LABELS, TARGET_MATCH_EXPRESSIONS],
    ),
    (
        CATEGORY_PORT,
        &[PORT_NIL, PORT_EMPTY, PORT_NUMBERED, PORT_NAMED, PORT_RANGE, PORT_PROTOCOL_ONLY],
    ),
    (CATEGORY_PROTOCOL, &[PROTOCOL_TCP, PROTOCOL_UDP, PROTOCOL_SCTP]),
    (
        CATEGORY_PEER,
        &[
            PEER_NIL,
            PEER_EMPTY,
            POD_SELECTOR_ONLY,
            POD_SELECTOR_EMPTY,
            POD_SELECTOR_EXPRESSIONS,
            NAMESPACE_SELECTOR_ONLY,
            NAMESPACE_SELECTOR_EMPTY,
            NAMESPACE_SELECTOR_NIL,
            POD_AND_NAMESPACE_SELECTOR,
            PEER_IPBLOCK,
            PEER_IPBLOCK_EXCEPT,
            PEERS_TWO,
        ],
    ),
    (
        CATEGORY_MULTI_POLICY,
        &[DENY_ALL, ALLOW_ALL, ACCIDENTAL_AND, ACCIDENTAL_OR, SPLIT_DIRECTIONS],
    ),
    (
        CATEGORY_ACTION,
        &[
            SET_POD_LABELS,
            SET_NAMESPACE_LABELS,
            CREATE_POLICY,
            UPDATE_POLICY,
            DELETE_POLICY,
            READ_POLICIES,
            CREATE_POD,
            DELETE_POD,
            CREATE_NAMESPACE,
            DELETE_NAMESPACE,
            MULTI_STEP,
        ],
    ),
];

pub type StringSet = BTreeSet<String>;

pub fn category_of(tag: &str) -> Option<&'static str> {
    TAG_CATEGORIES
        .iter()
        .find(|(_, tags)| tags.contains(&tag))
        .map(|(category, _)| *category)
}

pub fn all_tags() -> StringSet {
    TAG_CATEGORIES
        .iter()
        .flat_map(|(_, tags)| tags.iter().map(|t| t.to_string()))
        .collect()
}

/// True for a known tag or category name
pub fn is_known(name: &str) -> bool {
    TAG_CATEGORIES
        .iter()
        .any(|(category, tags)| *category == name || tags.contains(&name))
}

/// Expand category names into their tags; plain tags pass through
pub fn expand(names: &[String]) -> StringSet {
    let mut out = StringSet::new();
    for name in names {
        match TAG_CATEGORIES.iter().find(|(category, _)| *category == name.as_str()) {
            Some((_, tags)) => out.extend(tags.iter().map(|t| t.to_string())),
            None => {
                out.insert(name.clone());
            }
        }
    }
    out
}

/// Group tags by category; unknown tags land under their own name
pub fn by_category(tags: &StringSet) -> std::collections::BTreeMap<String, StringSet> {
    let mut grouped = std::collections::BTreeMap::<String, StringSet>::new();
    for tag in tags {
        let category = category_of(tag).unwrap_or(tag.as_str()).to_string();
        grouped.entry(category).or_default().insert(tag.clone());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_has_one_category() {
        let mut seen = StringSet::new();
        for (_, tags) in TAG_CATEGORIES {
            for tag in *tags {
                assert!(seen.insert(tag.to_string()), "duplicate tag {}", tag);
            }
        }
        assert_eq!(category_of(PEER_IPBLOCK_EXCEPT), Some(CATEGORY_PEER));
        assert_eq!(category_of("bogus"), None);
    }

    #[test]
    fn test_expand_categories() {
        let expanded = expand(&["protocol".to_string(), "port-named".to_string()]);
        assert_eq!(expanded.len(), 4);
        assert!(expanded.contains(PROTOCOL_SCTP));
        assert!(expanded.contains(PORT_NAMED));
    }

    #[test]
    fn test_is_known() {
        assert!(is_known("peer"));
        assert!(is_known(HAS_EGRESS));
        assert!(!is_known("has-everything"));
    }
}
