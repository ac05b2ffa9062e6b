//! `ClusterClient` backed by a live Kubernetes API server

use crate::client::{ClusterClient, ExecOutput};
use crate::error::{ProbeError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, PostParams};
use kube::Client;
use netpol_core::{policy_namespace, Labels};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn policies(&self, namespace: &str) -> Api<NetworkPolicy> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_name(meta: &ObjectMeta, kind: &'static str) -> Result<String> {
    meta.name
        .clone()
        .ok_or_else(|| ProbeError::Cluster(format!("{} has no name", kind)))
}

async fn read_stream(reader: Option<impl AsyncRead + Unpin>) -> String {
    let mut out = String::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_string(&mut out).await {
            debug!("Failed to read exec stream: {}", e);
        }
    }
    out
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        Ok(self.namespaces().get(name).await?)
    }

    async fn create_or_update_namespace(&self, name: &str, labels: &Labels) -> Result<Namespace> {
        let api = self.namespaces();
        match api.get_opt(name).await? {
            Some(mut ns) => {
                ns.metadata.labels = Some(labels.clone());
                Ok(api.replace(name, &PostParams::default(), &ns).await?)
            }
            None => {
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        labels: Some(labels.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                Ok(api.create(&PostParams::default(), &ns).await?)
            }
        }
    }

    async fn set_namespace_labels(&self, name: &str, labels: &Labels) -> Result<Namespace> {
        let api = self.namespaces();
        let mut ns = api.get(name).await?;
        ns.metadata.labels = Some(labels.clone());
        Ok(api.replace(name, &PostParams::default(), &ns).await?)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_network_policies_in_namespaces(
        &self,
        namespaces: &[String],
    ) -> Result<Vec<NetworkPolicy>> {
        let mut policies = Vec::new();
        for ns in namespaces {
            policies.extend(self.policies(ns).list(&ListParams::default()).await?.items);
        }
        Ok(policies)
    }

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<NetworkPolicy> {
        Ok(self
            .policies(policy_namespace(policy))
            .create(&PostParams::default(), policy)
            .await?)
    }

    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<NetworkPolicy> {
        let name = object_name(&policy.metadata, "network policy")?;
        Ok(self
            .policies(policy_namespace(policy))
            .replace(&name, &PostParams::default(), policy)
            .await?)
    }

    async fn delete_network_policy(&self, namespace: &str, name: &str) -> Result<()> {
        self.policies(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn delete_all_network_policies_in_namespaces(&self, namespaces: &[String]) -> Result<()> {
        for ns in namespaces {
            self.policies(ns)
                .delete_collection(&DeleteParams::default(), &ListParams::default())
                .await?;
        }
        Ok(())
    }

    async fn get_pods_in_namespaces(&self, namespaces: &[String]) -> Result<Vec<Pod>> {
        let mut pods = Vec::new();
        for ns in namespaces {
            pods.extend(self.pods(ns).list(&ListParams::default()).await?.items);
        }
        Ok(pods)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        Ok(self.pods(namespace).get(name).await?)
    }

    async fn create_pod_if_not_exists(&self, pod: &Pod) -> Result<Pod> {
        let name = object_name(&pod.metadata, "pod")?;
        let api = self.pods(pod.metadata.namespace.as_deref().unwrap_or("default"));
        match api.get_opt(&name).await? {
            Some(existing) => Ok(existing),
            None => Ok(api.create(&PostParams::default(), pod).await?),
        }
    }

    async fn set_pod_labels(&self, namespace: &str, name: &str, labels: &Labels) -> Result<Pod> {
        let api = self.pods(namespace);
        let mut pod = api.get(name).await?;
        pod.metadata.labels = Some(labels.clone());
        Ok(api.replace(name, &PostParams::default(), &pod).await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        Ok(self.services(namespace).get(name).await?)
    }

    async fn create_service_if_not_exists(&self, service: &Service) -> Result<Service> {
        let name = object_name(&service.metadata, "service")?;
        let api = self.services(service.metadata.namespace.as_deref().unwrap_or("default"));
        match api.get_opt(&name).await? {
            Some(existing) => Ok(existing),
            None => Ok(api.create(&PostParams::default(), service).await?),
        }
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn execute_remote_command(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let params = AttachParams::default().container(container);
        let mut attached = self
            .pods(namespace)
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| ProbeError::Transport {
                pod: format!("{}/{}/{}", namespace, pod, container),
                message: e.to_string(),
            })?;

        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let (stdout, stderr) = tokio::join!(read_stream(stdout_reader), read_stream(stderr_reader));

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        if let Err(e) = attached.join().await {
            debug!("Exec session for {}/{} ended with error: {}", namespace, pod, e);
        }

        let command_error = status.and_then(|s| {
            if s.status.as_deref() == Some("Success") {
                None
            } else {
                Some(s.message.unwrap_or_else(|| "command failed".to_string()))
            }
        });

        Ok(ExecOutput {
            stdout,
            stderr,
            command_error,
        })
    }
}
