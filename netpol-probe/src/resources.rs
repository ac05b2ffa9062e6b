//! Resource model: namespaces, pods and the server containers they run
//!
//! A `Resources` value is an immutable snapshot. Mutators return a new
//! snapshot so that each test step can be compared against the one before it.

use crate::client::ClusterClient;
use crate::error::{ProbeError, Result};
use k8s_openapi::api::core::v1::{
    Container as KubeContainer, ContainerPort, EnvVar, Pod as KubePod, PodSpec, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use netpol_core::{Labels, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Label key carrying a pod's own name; services select on it
pub const POD_LABEL_KEY: &str = "pod";
/// Label key carrying a namespace's own name
pub const NAMESPACE_LABEL_KEY: &str = "ns";
/// Label the API server sets on every namespace and restores after each write
pub const NAMESPACE_NAME_LABEL_KEY: &str = "kubernetes.io/metadata.name";

pub const DEFAULT_SERVER_IMAGE: &str = "registry.k8s.io/e2e-test-images/agnhost:2.43";

const POD_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default)]
    pub port_name: Option<String>,
}

impl Container {
    /// Default server container: `cont-<port>-<proto>` serving port `serve-<port>-<proto>`
    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self {
            name: format!("cont-{}-{}", port, protocol.lower()),
            port,
            protocol,
            port_name: Some(format!("serve-{}-{}", port, protocol.lower())),
        }
    }

    fn server_command(&self) -> Vec<String> {
        let port = self.port.to_string();
        let args: Vec<&str> = match self.protocol {
            Protocol::Tcp => vec![
                "/agnhost",
                "serve-hostname",
                "--tcp",
                "--http=false",
                "--port",
                &port,
            ],
            Protocol::Udp => vec![
                "/agnhost",
                "serve-hostname",
                "--udp",
                "--http=false",
                "--port",
                &port,
            ],
            Protocol::Sctp => vec!["/agnhost", "porter"],
        };
        args.into_iter().map(String::from).collect()
    }

    fn kube_container(&self, image: &str) -> KubeContainer {
        let env = match self.protocol {
            Protocol::Sctp => Some(vec![EnvVar {
                name: format!("SERVE_SCTP_PORT_{}", self.port),
                value: Some("foo".to_string()),
                ..Default::default()
            }]),
            _ => None,
        };
        KubeContainer {
            name: self.name.clone(),
            image: Some(image.to_string()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            command: Some(self.server_command()),
            env,
            ports: Some(vec![ContainerPort {
                container_port: i32::from(self.port),
                name: self.port_name.clone(),
                protocol: Some(self.protocol.as_str().to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub labels: Labels,
    /// Empty until the pod has been deployed and assigned an address
    #[serde(default)]
    pub ip: String,
    pub containers: Vec<Container>,
}

impl Pod {
    pub fn new(namespace: &str, name: &str, labels: Labels, containers: Vec<Container>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels,
            ip: String::new(),
            containers,
        }
    }

    /// `namespace/name`, the truth table key for this pod
    pub fn key(&self) -> String {
        pod_key(&self.namespace, &self.name)
    }

    pub fn service_name(&self) -> String {
        service_name(&self.namespace, &self.name)
    }

    /// Cluster DNS name of the pod's service
    pub fn host(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local",
            self.service_name(),
            self.namespace
        )
    }

    pub fn parsed_ip(&self) -> Option<IpAddr> {
        self.ip.parse().ok()
    }

    pub fn resolve_named_port(&self, name: &str) -> Option<&Container> {
        self.containers
            .iter()
            .find(|c| c.port_name.as_deref() == Some(name))
    }

    pub fn resolve_numbered_port(&self, port: u16, protocol: Protocol) -> Option<&Container> {
        self.containers
            .iter()
            .find(|c| c.port == port && c.protocol == protocol)
    }

    pub fn kube_pod(&self, image: &str) -> KubePod {
        KubePod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: self
                    .containers
                    .iter()
                    .map(|c| c.kube_container(image))
                    .collect(),
                termination_grace_period_seconds: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn kube_service(&self) -> Service {
        let ports = self
            .containers
            .iter()
            .map(|c| ServicePort {
                name: Some(format!("service-port-{}-{}", c.protocol.lower(), c.port)),
                port: i32::from(c.port),
                protocol: Some(c.protocol.as_str().to_string()),
                ..Default::default()
            })
            .collect();
        Service {
            metadata: ObjectMeta {
                name: Some(self.service_name()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([(
                    POD_LABEL_KEY.to_string(),
                    self.name.clone(),
                )])),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Name of the service fronting a pod
pub fn service_name(namespace: &str, pod: &str) -> String {
    format!("s-{}-{}", namespace, pod)
}

pub fn pod_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Snapshot of every namespace, pod and external address in scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    pub namespaces: BTreeMap<String, Labels>,
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub external_ips: Vec<String>,
}

impl Resources {
    /// Build the default model: every namespace holds every pod, and every pod
    /// serves every port on every protocol
    pub fn new_default(
        namespaces: &[String],
        pod_names: &[String],
        ports: &[u16],
        protocols: &[Protocol],
        external_ips: &[String],
    ) -> Result<Self> {
        let containers: Vec<Container> = ports
            .iter()
            .flat_map(|port| protocols.iter().map(move |p| Container::new(*port, *p)))
            .collect();

        let mut resources = Resources::default();
        for ns in namespaces {
            resources
                .namespaces
                .insert(ns.clone(), default_namespace_labels(ns));
            for name in pod_names {
                resources.pods.push(Pod::new(
                    ns,
                    name,
                    default_pod_labels(name),
                    containers.clone(),
                ));
            }
        }

        for ip in external_ips {
            if ip.parse::<IpAddr>().is_err() {
                return Err(netpol_core::PolicyError::InvalidIp { ip: ip.clone() }.into());
            }
        }
        let mut external_ips = external_ips.to_vec();
        external_ips.sort();
        external_ips.dedup();
        resources.external_ips = external_ips;
        resources.sort_pods();

        Ok(resources)
    }

    fn sort_pods(&mut self) {
        self.pods
            .sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.keys().cloned().collect()
    }

    pub fn namespace_labels(&self, namespace: &str) -> Option<&Labels> {
        self.namespaces.get(namespace)
    }

    pub fn get_pod(&self, namespace: &str, name: &str) -> Option<&Pod> {
        self.pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
    }

    /// Pod keys in lexicographic order
    pub fn sorted_pod_keys(&self) -> Vec<String> {
        let keys: BTreeSet<String> = self.pods.iter().map(Pod::key).collect();
        keys.into_iter().collect()
    }

    /// Truth table column keys: pods followed by external IPs
    pub fn sorted_destination_keys(&self) -> Vec<String> {
        let mut keys = self.sorted_pod_keys();
        keys.extend(self.external_ips.iter().cloned());
        keys
    }

    /// Every distinct (port, protocol) served by some container
    pub fn served_ports(&self) -> BTreeSet<(u16, Protocol)> {
        self.pods
            .iter()
            .flat_map(|p| p.containers.iter().map(|c| (c.port, c.protocol)))
            .collect()
    }

    pub fn set_namespace_labels(&self, namespace: &str, labels: Labels) -> Result<Resources> {
        let mut next = self.clone();
        let current = next
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| ProbeError::not_found("namespace", namespace))?;
        *current = with_namespace_name_label(namespace, labels);
        Ok(next)
    }

    pub fn set_pod_labels(&self, namespace: &str, name: &str, labels: Labels) -> Result<Resources> {
        let mut next = self.clone();
        let pod = next
            .pods
            .iter_mut()
            .find(|p| p.namespace == namespace && p.name == name)
            .ok_or_else(|| ProbeError::not_found("pod", pod_key(namespace, name)))?;
        pod.labels = labels;
        Ok(next)
    }

    pub fn create_namespace(&self, namespace: &str, labels: Labels) -> Result<Resources> {
        if self.namespaces.contains_key(namespace) {
            return Err(ProbeError::AlreadyExists {
                kind: "namespace",
                name: namespace.to_string(),
            });
        }
        let mut next = self.clone();
        next.namespaces
            .insert(namespace.to_string(), with_namespace_name_label(namespace, labels));
        Ok(next)
    }

    /// Remove a namespace along with every pod in it
    pub fn delete_namespace(&self, namespace: &str) -> Result<Resources> {
        let mut next = self.clone();
        if next.namespaces.remove(namespace).is_none() {
            return Err(ProbeError::not_found("namespace", namespace));
        }
        next.pods.retain(|p| p.namespace != namespace);
        Ok(next)
    }

    pub fn create_pod(&self, namespace: &str, name: &str, labels: Labels) -> Result<Resources> {
        if !self.namespaces.contains_key(namespace) {
            return Err(ProbeError::not_found("namespace", namespace));
        }
        if self.get_pod(namespace, name).is_some() {
            return Err(ProbeError::AlreadyExists {
                kind: "pod",
                name: pod_key(namespace, name),
            });
        }
        let containers = self
            .served_ports()
            .into_iter()
            .map(|(port, protocol)| Container::new(port, protocol))
            .collect();
        let mut next = self.clone();
        next.pods.push(Pod::new(namespace, name, labels, containers));
        next.sort_pods();
        Ok(next)
    }

    pub fn delete_pod(&self, namespace: &str, name: &str) -> Result<Resources> {
        let mut next = self.clone();
        let before = next.pods.len();
        next.pods
            .retain(|p| !(p.namespace == namespace && p.name == name));
        if next.pods.len() == before {
            return Err(ProbeError::not_found("pod", pod_key(namespace, name)));
        }
        Ok(next)
    }

    /// Return a copy with pod IPs filled in from `namespace/name` keys
    pub fn with_pod_ips(&self, ips: &BTreeMap<String, String>) -> Resources {
        let mut next = self.clone();
        for pod in &mut next.pods {
            if let Some(ip) = ips.get(&pod.key()) {
                pod.ip = ip.clone();
            }
        }
        next
    }

    /// Create namespaces, services and pods, then wait until every pod has an IP
    pub async fn deploy(
        &self,
        client: &dyn ClusterClient,
        server_image: &str,
        timeout: Duration,
    ) -> Result<Resources> {
        self.create_all(client, server_image).await?;
        info!(
            "Created {} namespaces and {} pods, waiting for pod IPs",
            self.namespaces.len(),
            self.pods.len()
        );
        self.wait_for_pod_ips(client, timeout).await
    }

    /// Bring the cluster back to this snapshot: delete pods the snapshot does
    /// not have, recreate the ones it has that went missing, restore labels,
    /// and return the snapshot with current pod IPs.
    pub async fn reconcile(
        &self,
        client: &dyn ClusterClient,
        server_image: &str,
        timeout: Duration,
    ) -> Result<Resources> {
        let wanted: BTreeSet<String> = self.pods.iter().map(Pod::key).collect();
        for pod in client.get_pods_in_namespaces(&self.namespace_names()).await? {
            let (Some(ns), Some(name)) = (pod.metadata.namespace, pod.metadata.name) else {
                continue;
            };
            if wanted.contains(&pod_key(&ns, &name)) {
                continue;
            }
            info!("Deleting stray pod {}/{}", ns, name);
            ignore_not_found(client.delete_service(&ns, &service_name(&ns, &name)).await)?;
            ignore_not_found(client.delete_pod(&ns, &name).await)?;
        }

        self.create_all(client, server_image).await?;
        self.reset_labels(client).await?;
        self.wait_for_pod_ips(client, timeout).await
    }

    async fn create_all(&self, client: &dyn ClusterClient, server_image: &str) -> Result<()> {
        for (ns, labels) in &self.namespaces {
            client.create_or_update_namespace(ns, labels).await?;
        }
        for pod in &self.pods {
            client.create_service_if_not_exists(&pod.kube_service()).await?;
            client
                .create_pod_if_not_exists(&pod.kube_pod(server_image))
                .await?;
        }
        Ok(())
    }

    async fn wait_for_pod_ips(
        &self,
        client: &dyn ClusterClient,
        timeout: Duration,
    ) -> Result<Resources> {
        let deadline = Instant::now() + timeout;
        let wanted: BTreeSet<String> = self.pods.iter().map(Pod::key).collect();

        loop {
            let ips = running_pod_ips(client, &self.namespace_names()).await?;
            let ready = wanted.iter().filter(|k| ips.contains_key(*k)).count();
            debug!("{}/{} pods running", ready, wanted.len());
            if ready == wanted.len() {
                return Ok(self.with_pod_ips(&ips));
            }
            if Instant::now() >= deadline {
                return Err(ProbeError::Timeout {
                    what: format!("{} pods to be running", wanted.len() - ready),
                });
            }
            tokio::time::sleep(POD_POLL_INTERVAL).await;
        }
    }

    /// Check that labels, pod IPs and services in the cluster match this snapshot
    pub async fn verify_cluster_state(&self, client: &dyn ClusterClient) -> Result<()> {
        for (ns, labels) in &self.namespaces {
            let actual = client.get_namespace(ns).await?;
            let actual_labels = actual.metadata.labels.unwrap_or_default();
            let expected = with_namespace_name_label(ns, labels.clone());
            if actual_labels != expected {
                return Err(ProbeError::StateMismatch(format!(
                    "namespace {} labels {:?}, expected {:?}",
                    ns, actual_labels, expected
                )));
            }
        }

        for pod in &self.pods {
            let actual = client.get_pod(&pod.namespace, &pod.name).await?;
            let actual_labels = actual.metadata.labels.unwrap_or_default();
            if actual_labels != pod.labels {
                return Err(ProbeError::StateMismatch(format!(
                    "pod {} labels {:?}, expected {:?}",
                    pod.key(),
                    actual_labels,
                    pod.labels
                )));
            }
            let actual_ip = actual
                .status
                .and_then(|s| s.pod_ip)
                .unwrap_or_default();
            if !pod.ip.is_empty() && actual_ip != pod.ip {
                return Err(ProbeError::StateMismatch(format!(
                    "pod {} ip {}, expected {}",
                    pod.key(),
                    actual_ip,
                    pod.ip
                )));
            }
            client
                .get_service(&pod.namespace, &pod.service_name())
                .await?;
        }

        Ok(())
    }

    /// Push this snapshot's namespace and pod labels to the cluster
    pub async fn reset_labels(&self, client: &dyn ClusterClient) -> Result<()> {
        for (ns, labels) in &self.namespaces {
            client.set_namespace_labels(ns, labels).await?;
        }
        for pod in &self.pods {
            client
                .set_pod_labels(&pod.namespace, &pod.name, &pod.labels)
                .await?;
        }
        Ok(())
    }
}

pub fn default_namespace_labels(namespace: &str) -> Labels {
    with_namespace_name_label(
        namespace,
        BTreeMap::from([(NAMESPACE_LABEL_KEY.to_string(), namespace.to_string())]),
    )
}

/// Labels as the API server stores them: the name label is always present
pub fn with_namespace_name_label(namespace: &str, mut labels: Labels) -> Labels {
    labels.insert(NAMESPACE_NAME_LABEL_KEY.to_string(), namespace.to_string());
    labels
}

pub fn default_pod_labels(name: &str) -> Labels {
    BTreeMap::from([(POD_LABEL_KEY.to_string(), name.to_string())])
}

/// Treat a delete of an object that is already gone as done
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

async fn running_pod_ips(
    client: &dyn ClusterClient,
    namespaces: &[String],
) -> Result<BTreeMap<String, String>> {
    let pods = client.get_pods_in_namespaces(namespaces).await?;
    let mut ips = BTreeMap::new();
    for pod in pods {
        let (Some(ns), Some(name)) = (pod.metadata.namespace, pod.metadata.name) else {
            continue;
        };
        let Some(status) = pod.status else { continue };
        if status.phase.as_deref() != Some("Running") {
            continue;
        }
        if let Some(ip) = status.pod_ip.filter(|ip| !ip.is_empty()) {
            ips.insert(pod_key(&ns, &name), ip);
        }
    }
    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn default_resources() -> Resources {
        Resources::new_default(
            &strings(&["x", "y"]),
            &strings(&["a", "b"]),
            &[80, 81],
            &[Protocol::Tcp, Protocol::Udp],
            &strings(&["8.8.8.8"]),
        )
        .unwrap()
    }

    #[test]
    fn test_default_resources() {
        let resources = default_resources();
        assert_eq!(resources.pods.len(), 4);
        assert_eq!(
            resources.sorted_pod_keys(),
            strings(&["x/a", "x/b", "y/a", "y/b"])
        );
        assert_eq!(
            resources.sorted_destination_keys().last().map(String::as_str),
            Some("8.8.8.8")
        );

        let pod = resources.get_pod("x", "a").unwrap();
        assert_eq!(pod.labels, default_pod_labels("a"));
        assert_eq!(pod.containers.len(), 4);
        assert_eq!(pod.containers[0].name, "cont-80-tcp");
        assert_eq!(
            pod.containers[0].port_name.as_deref(),
            Some("serve-80-tcp")
        );
        assert_eq!(pod.host(), "s-x-a.x.svc.cluster.local");
        assert_eq!(resources.namespace_labels("y"), Some(&default_namespace_labels("y")));
    }

    #[test]
    fn test_invalid_external_ip() {
        let result = Resources::new_default(
            &strings(&["x"]),
            &strings(&["a"]),
            &[80],
            &[Protocol::Tcp],
            &strings(&["not-an-ip"]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_label_mutation_returns_new_snapshot() {
        let resources = default_resources();
        let labels = BTreeMap::from([("pod".to_string(), "a".to_string()), ("role".to_string(), "db".to_string())]);
        let next = resources.set_pod_labels("x", "a", labels.clone()).unwrap();

        assert_eq!(next.get_pod("x", "a").unwrap().labels, labels);
        assert_eq!(
            resources.get_pod("x", "a").unwrap().labels,
            default_pod_labels("a")
        );
        assert!(resources.set_pod_labels("x", "zzz", Labels::new()).is_err());
        assert!(resources.set_namespace_labels("nope", Labels::new()).is_err());
    }

    #[test]
    fn test_namespace_name_label_always_present() {
        let resources = default_resources();
        assert_eq!(
            resources.namespace_labels("x").and_then(|l| l.get(NAMESPACE_NAME_LABEL_KEY)),
            Some(&"x".to_string())
        );

        let user = BTreeMap::from([("user".to_string(), "alice".to_string())]);
        let next = resources.set_namespace_labels("y", user).unwrap();
        assert_eq!(
            next.namespace_labels("y"),
            Some(&BTreeMap::from([
                (NAMESPACE_NAME_LABEL_KEY.to_string(), "y".to_string()),
                ("user".to_string(), "alice".to_string()),
            ]))
        );

        let next = next.create_namespace("z", Labels::new()).unwrap();
        assert_eq!(next.namespace_labels("z").map(|l| l.len()), Some(1));
    }

    #[test]
    fn test_create_and_delete() {
        let resources = default_resources();
        let next = resources
            .create_namespace("z", default_namespace_labels("z"))
            .unwrap()
            .create_pod("z", "c", default_pod_labels("c"))
            .unwrap();
        assert_eq!(next.get_pod("z", "c").unwrap().containers.len(), 4);
        assert!(next.create_namespace("z", Labels::new()).is_err());

        let next = next.delete_namespace("z").unwrap();
        assert!(next.get_pod("z", "c").is_none());
        assert!(next.delete_pod("x", "zzz").is_err());
        assert_eq!(next.delete_pod("x", "a").unwrap().pods.len(), 3);
    }

    #[test]
    fn test_kube_specs() {
        let resources = default_resources();
        let pod = resources.get_pod("y", "b").unwrap();

        let kube_pod = pod.kube_pod(DEFAULT_SERVER_IMAGE);
        let containers = kube_pod.spec.unwrap().containers;
        assert_eq!(containers.len(), 4);
        let udp = containers.iter().find(|c| c.name == "cont-81-udp").unwrap();
        assert!(udp.command.as_ref().unwrap().contains(&"--udp".to_string()));

        let service = pod.kube_service();
        assert_eq!(service.metadata.name.as_deref(), Some("s-y-b"));
        let spec = service.spec.unwrap();
        assert_eq!(spec.selector.unwrap().get("pod").map(String::as_str), Some("b"));
        assert_eq!(spec.ports.unwrap().len(), 4);
    }

    #[test]
    fn test_sctp_container_uses_porter() {
        let container = Container::new(82, Protocol::Sctp);
        let kube = container.kube_container(DEFAULT_SERVER_IMAGE);
        assert_eq!(kube.command.unwrap(), strings(&["/agnhost", "porter"]));
        assert_eq!(kube.env.unwrap()[0].name, "SERVE_SCTP_PORT_82");
    }
}
