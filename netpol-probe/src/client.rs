//! Cluster access seam used by deployment, the interpreter and cluster probes

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use netpol_core::Labels;

/// Output of a command run inside a container.
///
/// `command_error` is set when the command ran but exited unsuccessfully.
/// Failing to start the command at all is reported as `ProbeError::Transport`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub command_error: Option<String>,
}

impl ExecOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            command_error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.command_error.is_none()
    }
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;
    async fn create_or_update_namespace(&self, name: &str, labels: &Labels) -> Result<Namespace>;
    async fn set_namespace_labels(&self, name: &str, labels: &Labels) -> Result<Namespace>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn get_network_policies_in_namespaces(
        &self,
        namespaces: &[String],
    ) -> Result<Vec<NetworkPolicy>>;
    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<NetworkPolicy>;
    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<NetworkPolicy>;
    async fn delete_network_policy(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_all_network_policies_in_namespaces(&self, namespaces: &[String]) -> Result<()>;

    async fn get_pods_in_namespaces(&self, namespaces: &[String]) -> Result<Vec<Pod>>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
    async fn create_pod_if_not_exists(&self, pod: &Pod) -> Result<Pod>;
    async fn set_pod_labels(&self, namespace: &str, name: &str, labels: &Labels) -> Result<Pod>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;
    async fn create_service_if_not_exists(&self, service: &Service) -> Result<Service>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    async fn execute_remote_command(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput>;
}
