//! In-memory `ClusterClient` for tests and dry runs
//!
//! Pods get sequential IPs and are immediately `Running`. Remote commands
//! either succeed with a configured probability, or are answered by
//! evaluating the stored NetworkPolicies against the connection the command
//! describes.

use crate::client::{ClusterClient, ExecOutput};
use crate::error::{ProbeError, Result};
use crate::job::{parse_batch_script, parse_client_command, ProbeTarget, BATCH_RESULT_MARKER};
use crate::resources::with_namespace_name_label;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, PodStatus, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use netpol_core::{
    build_network_policies, policy_namespace, policy_name, with_default_policy_types, Labels,
    Traffic, TrafficPeer,
};
use rand::Rng;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

type ObjectKey = (String, String);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecMode {
    /// Each command succeeds with this probability
    PassRate(f64),
    /// Commands succeed when the stored policies allow the connection
    EnforcePolicies,
}

#[derive(Default)]
struct MockState {
    namespaces: BTreeMap<String, Namespace>,
    pods: BTreeMap<ObjectKey, Pod>,
    services: BTreeMap<ObjectKey, Service>,
    policies: BTreeMap<ObjectKey, NetworkPolicy>,
    next_pod_id: u32,
    exec_count: usize,
}

pub struct MockClusterClient {
    mode: ExecMode,
    state: Mutex<MockState>,
}

impl MockClusterClient {
    pub fn new(pass_rate: f64) -> Self {
        Self::with_mode(ExecMode::PassRate(pass_rate))
    }

    pub fn enforcing_policies() -> Self {
        Self::with_mode(ExecMode::EnforcePolicies)
    }

    pub fn with_mode(mode: ExecMode) -> Self {
        Self {
            mode,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Number of remote commands executed so far
    pub async fn exec_count(&self) -> usize {
        self.state.lock().await.exec_count
    }
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn labels_of(meta: &ObjectMeta) -> Labels {
    meta.labels.clone().unwrap_or_default()
}

fn selector_matches(selector: &BTreeMap<String, String>, labels: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

impl MockState {
    fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespaces.contains_key(namespace) {
            Ok(())
        } else {
            Err(ProbeError::not_found("namespace", namespace))
        }
    }

    fn namespace_labels(&self, namespace: &str) -> Labels {
        self.namespaces
            .get(namespace)
            .map(|ns| labels_of(&ns.metadata))
            .unwrap_or_default()
    }

    fn pod_ip(pod: &Pod) -> Option<std::net::IpAddr> {
        pod.status.as_ref()?.pod_ip.as_ref()?.parse().ok()
    }

    fn traffic_peer(&self, pod: &Pod) -> TrafficPeer {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        TrafficPeer::internal(
            namespace.clone(),
            self.namespace_labels(&namespace),
            labels_of(&pod.metadata),
            Self::pod_ip(pod),
        )
    }

    /// Pod behind a service DNS name or pod IP
    fn resolve_host(&self, host: &str) -> Option<&Pod> {
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            return self.pods.values().find(|p| Self::pod_ip(p) == Some(ip));
        }
        let mut parts = host.split('.');
        let service_name = parts.next()?;
        let namespace = parts.next()?;
        let selector = self
            .services
            .get(&key(namespace, service_name))?
            .spec
            .as_ref()?
            .selector
            .clone()
            .unwrap_or_default();
        self.pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod)
            .find(|pod| selector_matches(&selector, &labels_of(&pod.metadata)))
    }

    fn connect(&self, source: &Pod, target: &ProbeTarget) -> Result<bool> {
        let (destination, port_name) = match self.resolve_host(&target.host) {
            Some(pod) => {
                let served = pod
                    .spec
                    .iter()
                    .flat_map(|s| s.containers.iter())
                    .flat_map(|c| c.ports.iter().flatten())
                    .find(|p| {
                        p.container_port == i32::from(target.port)
                            && p.protocol.as_deref().unwrap_or("TCP") == target.protocol.as_str()
                    });
                let Some(served) = served else {
                    return Ok(false);
                };
                (self.traffic_peer(pod), served.name.clone())
            }
            None => match target.ip() {
                Some(ip) => (TrafficPeer::external(ip), None),
                None => return Ok(false),
            },
        };

        let policies: Vec<NetworkPolicy> = self.policies.values().cloned().collect();
        let policy = build_network_policies(false, &policies)?;
        let traffic = Traffic {
            source: self.traffic_peer(source),
            destination,
            resolved_port: target.port,
            resolved_port_name: port_name,
            protocol: target.protocol,
        };
        Ok(policy.is_traffic_allowed(&traffic).is_allowed())
    }

    fn run_one(&self, mode: ExecMode, source: &Pod, argv: &[String]) -> Result<bool> {
        match mode {
            ExecMode::PassRate(rate) => Ok(rand::thread_rng().gen::<f64>() < rate),
            ExecMode::EnforcePolicies => match parse_client_command(argv) {
                Some(target) => self.connect(source, &target),
                None => Ok(false),
            },
        }
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let state = self.state.lock().await;
        state
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| ProbeError::not_found("namespace", name))
    }

    async fn create_or_update_namespace(&self, name: &str, labels: &Labels) -> Result<Namespace> {
        let mut state = self.state.lock().await;
        let ns = state
            .namespaces
            .entry(name.to_string())
            .or_insert_with(|| Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            });
        ns.metadata.labels = Some(with_namespace_name_label(name, labels.clone()));
        Ok(ns.clone())
    }

    async fn set_namespace_labels(&self, name: &str, labels: &Labels) -> Result<Namespace> {
        let mut state = self.state.lock().await;
        let ns = state
            .namespaces
            .get_mut(name)
            .ok_or_else(|| ProbeError::not_found("namespace", name))?;
        ns.metadata.labels = Some(with_namespace_name_label(name, labels.clone()));
        Ok(ns.clone())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.namespaces.remove(name).is_none() {
            return Err(ProbeError::not_found("namespace", name));
        }
        state.pods.retain(|(ns, _), _| ns != name);
        state.services.retain(|(ns, _), _| ns != name);
        state.policies.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn get_network_policies_in_namespaces(
        &self,
        namespaces: &[String],
    ) -> Result<Vec<NetworkPolicy>> {
        let state = self.state.lock().await;
        Ok(state
            .policies
            .iter()
            .filter(|((ns, _), _)| namespaces.contains(ns))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<NetworkPolicy> {
        let policy = &with_default_policy_types(policy);
        build_network_policies(false, std::slice::from_ref(policy))?;
        let ns = policy_namespace(policy).to_string();
        let name = policy.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().await;
        state.require_namespace(&ns)?;
        if state.policies.contains_key(&key(&ns, &name)) {
            return Err(ProbeError::AlreadyExists {
                kind: "network policy",
                name: policy_name(policy),
            });
        }
        state.policies.insert(key(&ns, &name), policy.clone());
        Ok(policy.clone())
    }

    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<NetworkPolicy> {
        let policy = &with_default_policy_types(policy);
        build_network_policies(false, std::slice::from_ref(policy))?;
        let ns = policy_namespace(policy).to_string();
        let name = policy.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().await;
        let existing = state
            .policies
            .get_mut(&key(&ns, &name))
            .ok_or_else(|| ProbeError::not_found("network policy", policy_name(policy)))?;
        *existing = policy.clone();
        Ok(policy.clone())
    }

    async fn delete_network_policy(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .policies
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ProbeError::not_found("network policy", format!("{}/{}", namespace, name)))
    }

    async fn delete_all_network_policies_in_namespaces(&self, namespaces: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.policies.retain(|(ns, _), _| !namespaces.contains(ns));
        Ok(())
    }

    async fn get_pods_in_namespaces(&self, namespaces: &[String]) -> Result<Vec<Pod>> {
        let state = self.state.lock().await;
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| namespaces.contains(ns))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let state = self.state.lock().await;
        state
            .pods
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ProbeError::not_found("pod", format!("{}/{}", namespace, name)))
    }

    async fn create_pod_if_not_exists(&self, pod: &Pod) -> Result<Pod> {
        let ns = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().await;
        state.require_namespace(&ns)?;
        if let Some(existing) = state.pods.get(&key(&ns, &name)) {
            return Ok(existing.clone());
        }

        state.next_pod_id += 1;
        let id = state.next_pod_id;
        let mut created = pod.clone();
        created.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: Some(format!("192.168.{}.{}", id / 256, id % 256)),
            ..Default::default()
        });
        debug!("Mock created pod {}/{}", ns, name);
        state.pods.insert(key(&ns, &name), created.clone());
        Ok(created)
    }

    async fn set_pod_labels(&self, namespace: &str, name: &str, labels: &Labels) -> Result<Pod> {
        let mut state = self.state.lock().await;
        let pod = state
            .pods
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ProbeError::not_found("pod", format!("{}/{}", namespace, name)))?;
        pod.metadata.labels = Some(labels.clone());
        Ok(pod.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .pods
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ProbeError::not_found("pod", format!("{}/{}", namespace, name)))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let state = self.state.lock().await;
        state
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ProbeError::not_found("service", format!("{}/{}", namespace, name)))
    }

    async fn create_service_if_not_exists(&self, service: &Service) -> Result<Service> {
        let ns = service.metadata.namespace.clone().unwrap_or_default();
        let name = service.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().await;
        state.require_namespace(&ns)?;
        Ok(state
            .services
            .entry(key(&ns, &name))
            .or_insert_with(|| service.clone())
            .clone())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .services
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ProbeError::not_found("service", format!("{}/{}", namespace, name)))
    }

    async fn execute_remote_command(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let mut state = self.state.lock().await;
        state.exec_count += 1;

        let transport = |message: &str| ProbeError::Transport {
            pod: format!("{}/{}/{}", namespace, pod, container),
            message: message.to_string(),
        };
        let source = state
            .pods
            .get(&key(namespace, pod))
            .ok_or_else(|| transport("pod not found"))?;
        let has_container = source
            .spec
            .iter()
            .flat_map(|s| s.containers.iter())
            .any(|c| c.name == container);
        if !has_container {
            return Err(transport("container not found"));
        }

        if let [shell, flag, script] = command {
            if shell == "sh" && flag == "-c" {
                let mut stdout = String::new();
                for (index, argv) in parse_batch_script(script) {
                    let code = if state.run_one(self.mode, source, &argv)? { 0 } else { 1 };
                    stdout.push_str(&format!("{} {} {}\n", BATCH_RESULT_MARKER, index, code));
                }
                return Ok(ExecOutput::success(stdout));
            }
        }

        if state.run_one(self.mode, source, command)? {
            Ok(ExecOutput::success(""))
        } else {
            Ok(ExecOutput::failure("command terminated with non-zero exit code: 1"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Resources, DEFAULT_SERVER_IMAGE, NAMESPACE_NAME_LABEL_KEY};
    use netpol_core::{PortValue, Protocol};
    use std::time::Duration;

    fn resources() -> Resources {
        Resources::new_default(
            &["x".to_string(), "y".to_string()],
            &["a".to_string(), "b".to_string()],
            &[80],
            &[Protocol::Tcp],
            &[],
        )
        .unwrap()
    }

    fn deny_ingress_in_x() -> NetworkPolicy {
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": "deny", "namespace": "x"},
            "spec": {"podSelector": {}, "policyTypes": ["Ingress"]}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_assigns_sequential_ips() {
        let client = MockClusterClient::new(1.0);
        let deployed = resources()
            .deploy(&client, DEFAULT_SERVER_IMAGE, Duration::from_secs(5))
            .await
            .unwrap();

        let ips: Vec<&str> = deployed.pods.iter().map(|p| p.ip.as_str()).collect();
        assert_eq!(ips, vec!["192.168.0.1", "192.168.0.2", "192.168.0.3", "192.168.0.4"]);
        deployed.verify_cluster_state(&client).await.unwrap();

        let service = client
            .get_service("x", &deployed.pods[0].service_name())
            .await
            .unwrap();
        assert_eq!(service.metadata.namespace.as_deref(), Some("x"));
        client
            .delete_service("x", &deployed.pods[0].service_name())
            .await
            .unwrap();
        assert!(matches!(
            deployed.verify_cluster_state(&client).await,
            Err(ProbeError::NotFound { kind: "service", .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_detects_label_drift() {
        let client = MockClusterClient::new(1.0);
        let deployed = resources()
            .deploy(&client, DEFAULT_SERVER_IMAGE, Duration::from_secs(5))
            .await
            .unwrap();
        client
            .set_pod_labels("x", "a", &Labels::from([("pod".to_string(), "zzz".to_string())]))
            .await
            .unwrap();

        assert!(matches!(
            deployed.verify_cluster_state(&client).await,
            Err(ProbeError::StateMismatch(_))
        ));
        deployed.reset_labels(&client).await.unwrap();
        deployed.verify_cluster_state(&client).await.unwrap();
    }

    #[tokio::test]
    async fn test_namespace_name_label_added_by_server() {
        let client = MockClusterClient::new(1.0);
        let deployed = resources()
            .deploy(&client, DEFAULT_SERVER_IMAGE, Duration::from_secs(5))
            .await
            .unwrap();
        let ns = client.get_namespace("y").await.unwrap();
        assert_eq!(
            ns.metadata.labels.unwrap().get(NAMESPACE_NAME_LABEL_KEY).map(String::as_str),
            Some("y")
        );

        // Written without the name label, read back with it
        let user = Labels::from([("user".to_string(), "bob".to_string())]);
        client.set_namespace_labels("y", &user).await.unwrap();
        let next = deployed.set_namespace_labels("y", user).unwrap();
        next.verify_cluster_state(&client).await.unwrap();

        // A model loaded without the name label still matches the cluster
        let mut stripped = deployed.clone();
        for labels in stripped.namespaces.values_mut() {
            labels.remove(NAMESPACE_NAME_LABEL_KEY);
        }
        stripped.reset_labels(&client).await.unwrap();
        stripped.verify_cluster_state(&client).await.unwrap();
        deployed.verify_cluster_state(&client).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_restores_deployed_pods() {
        let client = MockClusterClient::new(1.0);
        let deployed = resources()
            .deploy(&client, DEFAULT_SERVER_IMAGE, Duration::from_secs(5))
            .await
            .unwrap();

        let a = &deployed.pods[0];
        client.delete_service("x", &a.service_name()).await.unwrap();
        client.delete_pod("x", "a").await.unwrap();
        let stray = crate::resources::Pod::new("x", "z", Labels::new(), a.containers.clone());
        client.create_service_if_not_exists(&stray.kube_service()).await.unwrap();
        client
            .create_pod_if_not_exists(&stray.kube_pod(DEFAULT_SERVER_IMAGE))
            .await
            .unwrap();
        client
            .set_namespace_labels("y", &Labels::from([("ns".to_string(), "other".to_string())]))
            .await
            .unwrap();

        let reconciled = deployed
            .reconcile(&client, DEFAULT_SERVER_IMAGE, Duration::from_secs(5))
            .await
            .unwrap();
        reconciled.verify_cluster_state(&client).await.unwrap();
        assert!(client.get_pod("x", "z").await.unwrap_err().is_not_found());
        assert!(client.get_service("x", &stray.service_name()).await.is_err());
        // recreated pods get a new address
        assert_ne!(reconciled.pods[0].ip, a.ip);
        assert_eq!(reconciled.pods[1].ip, deployed.pods[1].ip);
    }

    #[tokio::test]
    async fn test_pass_rate_extremes() {
        let client = MockClusterClient::new(0.0);
        let deployed = resources()
            .deploy(&client, DEFAULT_SERVER_IMAGE, Duration::from_secs(5))
            .await
            .unwrap();
        let jobs = deployed.get_jobs_for_port_protocol(&PortValue::Number(80), Protocol::Tcp);
        let job = &jobs.valid[0];
        let out = client
            .execute_remote_command("x", "a", &job.source.container, &job.client_command())
            .await
            .unwrap();
        assert!(!out.is_success());
        assert_eq!(client.exec_count().await, 1);
    }

    #[tokio::test]
    async fn test_enforces_stored_policies() {
        let client = MockClusterClient::enforcing_policies();
        let deployed = resources()
            .deploy(&client, DEFAULT_SERVER_IMAGE, Duration::from_secs(5))
            .await
            .unwrap();
        client.create_network_policy(&deny_ingress_in_x()).await.unwrap();

        let jobs = deployed.get_jobs_for_port_protocol(&PortValue::Number(80), Protocol::Tcp);
        for job in &jobs.valid {
            let out = client
                .execute_remote_command(
                    &job.source.namespace,
                    &job.source.pod,
                    &job.source.container,
                    &job.client_command(),
                )
                .await
                .unwrap();
            let into_x = job.to_key().starts_with("x/");
            assert_eq!(out.is_success(), !into_x, "{}", job.traffic());
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_policy_and_duplicates() {
        let client = MockClusterClient::enforcing_policies();
        resources()
            .deploy(&client, DEFAULT_SERVER_IMAGE, Duration::from_secs(5))
            .await
            .unwrap();

        let mut invalid = deny_ingress_in_x();
        invalid.spec = None;
        assert!(matches!(
            client.create_network_policy(&invalid).await,
            Err(ProbeError::Policy(_))
        ));

        // Stored with the types the API server fills in
        let mut untyped = deny_ingress_in_x();
        untyped.metadata.name = Some("untyped".to_string());
        if let Some(spec) = untyped.spec.as_mut() {
            spec.policy_types = None;
        }
        let stored = client.create_network_policy(&untyped).await.unwrap();
        assert_eq!(
            stored.spec.and_then(|s| s.policy_types),
            Some(vec!["Ingress".to_string()])
        );

        client.create_network_policy(&deny_ingress_in_x()).await.unwrap();
        assert!(matches!(
            client.create_network_policy(&deny_ingress_in_x()).await,
            Err(ProbeError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_exec_in_missing_pod_is_transport_error() {
        let client = MockClusterClient::new(1.0);
        let result = client
            .execute_remote_command("x", "a", "cont-80-tcp", &["true".to_string()])
            .await;
        assert!(matches!(result, Err(ProbeError::Transport { .. })));
    }
}
