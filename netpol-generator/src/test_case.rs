//! Test cases, steps and the actions a step applies

use crate::tags::StringSet;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use netpol_core::{policy_name, Labels};
use netpol_probe::ProbeConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single mutation of cluster state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum Action {
    CreatePolicy {
        policy: NetworkPolicy,
    },
    UpdatePolicy {
        policy: NetworkPolicy,
    },
    DeletePolicy {
        namespace: String,
        name: String,
    },
    /// Replace the logical policy set with what the cluster holds
    ReadPolicies {
        namespaces: Vec<String>,
    },
    SetPodLabels {
        namespace: String,
        pod: String,
        labels: Labels,
    },
    SetNamespaceLabels {
        namespace: String,
        labels: Labels,
    },
    CreateNamespace {
        namespace: String,
        labels: Labels,
    },
    DeleteNamespace {
        namespace: String,
    },
    CreatePod {
        namespace: String,
        pod: String,
        labels: Labels,
    },
    DeletePod {
        namespace: String,
        pod: String,
    },
}

impl Action {
    pub fn create_policy(policy: NetworkPolicy) -> Self {
        Action::CreatePolicy { policy }
    }

    pub fn update_policy(policy: NetworkPolicy) -> Self {
        Action::UpdatePolicy { policy }
    }

    pub fn delete_policy(namespace: &str, name: &str) -> Self {
        Action::DeletePolicy {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn read_policies(namespaces: &[String]) -> Self {
        Action::ReadPolicies {
            namespaces: namespaces.to_vec(),
        }
    }

    pub fn set_pod_labels(namespace: &str, pod: &str, labels: Labels) -> Self {
        Action::SetPodLabels {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            labels,
        }
    }

    pub fn set_namespace_labels(namespace: &str, labels: Labels) -> Self {
        Action::SetNamespaceLabels {
            namespace: namespace.to_string(),
            labels,
        }
    }

    /// The policy this action writes, if any
    pub fn policy(&self) -> Option<&NetworkPolicy> {
        match self {
            Action::CreatePolicy { policy } | Action::UpdatePolicy { policy } => Some(policy),
            _ => None,
        }
    }

    pub fn policy_mut(&mut self) -> Option<&mut NetworkPolicy> {
        match self {
            Action::CreatePolicy { policy } | Action::UpdatePolicy { policy } => Some(policy),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::CreatePolicy { policy } => write!(f, "create policy {}", policy_name(policy)),
            Action::UpdatePolicy { policy } => write!(f, "update policy {}", policy_name(policy)),
            Action::DeletePolicy { namespace, name } => {
                write!(f, "delete policy {}/{}", namespace, name)
            }
            Action::ReadPolicies { namespaces } => {
                write!(f, "read policies in [{}]", namespaces.join(", "))
            }
            Action::SetPodLabels {
                namespace,
                pod,
                labels,
            } => write!(f, "set labels of pod {}/{} to {:?}", namespace, pod, labels),
            Action::SetNamespaceLabels { namespace, labels } => {
                write!(f, "set labels of namespace {} to {:?}", namespace, labels)
            }
            Action::CreateNamespace { namespace, .. } => write!(f, "create namespace {}", namespace),
            Action::DeleteNamespace { namespace } => write!(f, "delete namespace {}", namespace),
            Action::CreatePod { namespace, pod, .. } => write!(f, "create pod {}/{}", namespace, pod),
            Action::DeletePod { namespace, pod } => write!(f, "delete pod {}/{}", namespace, pod),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    pub probe: ProbeConfig,
    pub actions: Vec<Action>,
}

impl TestStep {
    pub fn new(probe: ProbeConfig, actions: Vec<Action>) -> Self {
        Self { probe, actions }
    }

    /// A step that creates each policy and probes every served port
    pub fn create_policies(policies: Vec<NetworkPolicy>) -> Self {
        Self::new(
            ProbeConfig::AllAvailable,
            policies.into_iter().map(Action::create_policy).collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub description: String,
    pub tags: StringSet,
    pub steps: Vec<TestStep>,
}

impl TestCase {
    pub fn new<'a>(
        description: impl Into<String>,
        tags: impl IntoIterator<Item = &'a str>,
        steps: Vec<TestStep>,
    ) -> Self {
        Self {
            description: description.into(),
            tags: tags.into_iter().map(String::from).collect(),
            steps,
        }
    }

    /// Every policy written by any step, in order
    pub fn policies(&self) -> Vec<&NetworkPolicy> {
        self.steps
            .iter()
            .flat_map(|s| s.actions.iter())
            .filter_map(Action::policy)
            .collect()
    }

    pub fn has_any_tag(&self, tags: &StringSet) -> bool {
        !self.tags.is_disjoint(tags)
    }
}
