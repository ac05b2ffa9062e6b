//! Label selector and name matching
//!
//! Implements the set-based selector semantics of `metav1.LabelSelector`.
//! An empty selector matches every label map; the meaning of an absent selector
//! is decided by the caller (peer matchers treat it differently per field).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

/// Label map of a namespace or pod
pub type Labels = BTreeMap<String, String>;

pub const OP_IN: &str = "In";
pub const OP_NOT_IN: &str = "NotIn";
pub const OP_EXISTS: &str = "Exists";
pub const OP_DOES_NOT_EXIST: &str = "DoesNotExist";

/// Check whether a selector has neither matchLabels nor matchExpressions
pub fn is_label_selector_empty(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().map_or(true, |l| l.is_empty())
        && selector
            .match_expressions
            .as_ref()
            .map_or(true, |e| e.is_empty())
}

/// Check whether a label map satisfies every requirement of a selector
pub fn is_match(selector: &LabelSelector, labels: &Labels) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for requirement in expressions {
            if !is_requirement_match(requirement, labels) {
                return false;
            }
        }
    }

    true
}

/// Evaluate a single set-based requirement.
///
/// `NotIn` requires the key to be present: an absent key is not a match.
fn is_requirement_match(requirement: &LabelSelectorRequirement, labels: &Labels) -> bool {
    let values = requirement.values.as_deref().unwrap_or_default();
    let value = labels.get(&requirement.key);

    match requirement.operator.as_str() {
        OP_IN => value.map_or(false, |v| values.contains(v)),
        OP_NOT_IN => value.map_or(false, |v| !values.contains(v)),
        OP_EXISTS => value.is_some(),
        OP_DOES_NOT_EXIST => value.is_none(),
        other => {
            tracing::warn!("Unknown label selector operator {:?}, treating as no match", other);
            false
        }
    }
}

/// An empty matcher matches any name; otherwise names must be equal
pub fn is_name_match(matcher: &str, name: &str) -> bool {
    matcher.is_empty() || matcher == name
}

/// Sort expressions and their values so equivalent selectors compare equal
pub fn normalize_label_selector(selector: &LabelSelector) -> LabelSelector {
    let match_labels = selector
        .match_labels
        .clone()
        .filter(|labels| !labels.is_empty());

    let match_expressions = selector.match_expressions.as_ref().and_then(|exprs| {
        let mut exprs: Vec<LabelSelectorRequirement> = exprs
            .iter()
            .map(|e| {
                let mut values = e.values.clone().unwrap_or_default();
                values.sort();
                values.dedup();
                LabelSelectorRequirement {
                    key: e.key.clone(),
                    operator: e.operator.clone(),
                    values: if values.is_empty() { None } else { Some(values) },
                }
            })
            .collect();
        exprs.sort_by(|a, b| {
            (&a.key, &a.operator, &a.values).cmp(&(&b.key, &b.operator, &b.values))
        });
        if exprs.is_empty() {
            None
        } else {
            Some(exprs)
        }
    });

    LabelSelector {
        match_labels,
        match_expressions,
    }
}

/// Deterministic serialization of a selector, used in target primary keys
pub fn serialize_label_selector(selector: &LabelSelector) -> String {
    let normalized = normalize_label_selector(selector);

    let labels = normalized
        .match_labels
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");

    let expressions = normalized
        .match_expressions
        .unwrap_or_default()
        .into_iter()
        .map(|e| format!("{} {} [{}]", e.key, e.operator, e.values.unwrap_or_default().join(",")))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{labels: [{}], expressions: [{}]}}", labels, expressions)
}

/// Human-readable rendering for explanations
pub fn describe_label_selector(selector: &LabelSelector) -> String {
    if is_label_selector_empty(selector) {
        return "all".to_string();
    }

    let normalized = normalize_label_selector(selector);
    let mut parts = Vec::new();

    for (k, v) in normalized.match_labels.unwrap_or_default() {
        parts.push(format!("{}={}", k, v));
    }

    for e in normalized.match_expressions.unwrap_or_default() {
        let values = e.values.unwrap_or_default();
        let part = match e.operator.as_str() {
            OP_EXISTS => format!("{} exists", e.key),
            OP_DOES_NOT_EXIST => format!("{} does not exist", e.key),
            op => format!("{} {} ({})", e.key, op.to_lowercase(), values.join(", ")),
        };
        parts.push(part);
    }

    parts.join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expression(key: &str, op: &str, values: &[&str]) -> LabelSelector {
        LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: key.to_string(),
                operator: op.to_string(),
                values: if values.is_empty() {
                    None
                } else {
                    Some(values.iter().map(|v| v.to_string()).collect())
                },
            }]),
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(is_label_selector_empty(&selector));
        assert!(is_match(&selector, &Labels::new()));
        assert!(is_match(&selector, &labels(&[("pod", "a")])));
    }

    #[test]
    fn test_match_labels() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("pod", "a"), ("role", "web")])),
            match_expressions: None,
        };
        assert!(is_match(&selector, &labels(&[("pod", "a"), ("role", "web"), ("x", "y")])));
        assert!(!is_match(&selector, &labels(&[("pod", "a")])));
        assert!(!is_match(&selector, &labels(&[("pod", "b"), ("role", "web")])));
    }

    #[test]
    fn test_in_operator() {
        let selector = expression("pod", OP_IN, &["a", "b"]);
        assert!(is_match(&selector, &labels(&[("pod", "a")])));
        assert!(!is_match(&selector, &labels(&[("pod", "c")])));
        assert!(!is_match(&selector, &Labels::new()));
    }

    #[test]
    fn test_not_in_requires_key() {
        let selector = expression("pod", OP_NOT_IN, &["a"]);
        assert!(is_match(&selector, &labels(&[("pod", "b")])));
        assert!(!is_match(&selector, &labels(&[("pod", "a")])));
        // absent key is not a match
        assert!(!is_match(&selector, &labels(&[("other", "a")])));
    }

    #[test]
    fn test_exists_and_does_not_exist() {
        let exists = expression("role", OP_EXISTS, &[]);
        let absent = expression("role", OP_DOES_NOT_EXIST, &[]);
        let with_role = labels(&[("role", "db")]);
        let without_role = labels(&[("pod", "a")]);

        assert!(is_match(&exists, &with_role));
        assert!(!is_match(&exists, &without_role));
        assert!(!is_match(&absent, &with_role));
        assert!(is_match(&absent, &without_role));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        let selector = expression("pod", "Near", &["a"]);
        assert!(!is_match(&selector, &labels(&[("pod", "a")])));
    }

    #[test]
    fn test_name_match() {
        assert!(is_name_match("", "anything"));
        assert!(is_name_match("x", "x"));
        assert!(!is_name_match("x", "y"));
    }

    #[test]
    fn test_serialization_is_order_independent() {
        let mut a = expression("pod", OP_IN, &["b", "a"]);
        a.match_expressions
            .as_mut()
            .unwrap()
            .push(LabelSelectorRequirement {
                key: "app".to_string(),
                operator: OP_EXISTS.to_string(),
                values: None,
            });

        let mut b = expression("app", OP_EXISTS, &[]);
        b.match_expressions
            .as_mut()
            .unwrap()
            .push(LabelSelectorRequirement {
                key: "pod".to_string(),
                operator: OP_IN.to_string(),
                values: Some(vec!["a".to_string(), "b".to_string()]),
            });

        assert_eq!(serialize_label_selector(&a), serialize_label_selector(&b));
    }

    #[test]
    fn test_empty_and_default_serialize_equally() {
        let explicit_empty = LabelSelector {
            match_labels: Some(Labels::new()),
            match_expressions: Some(vec![]),
        };
        assert_eq!(
            serialize_label_selector(&explicit_empty),
            serialize_label_selector(&LabelSelector::default())
        );
    }
}
