//! Test case execution against a cluster
//!
//! Each test case starts from the deployed resource snapshot with no policies:
//! before it runs, the cluster is reconciled back to that snapshot, undoing
//! whatever pods and namespaces an earlier case created or deleted. Steps apply their actions to both the logical state and the cluster, wait
//! for the data plane to converge, then compare a simulated probe of the
//! logical state with one or more cluster probes.

use crate::comparison::ComparisonTable;
use crate::config::{ClusterConfig, Config, InterpreterConfig};
use crate::error::{ConnectivityError, Result};
use crate::result::{ProbeAttempt, StepResult, TestCaseResult};
use indexmap::IndexMap;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use netpol_core::{build_network_policies, policy_name, with_default_policy_types};
use netpol_generator::{Action, TestCase, TestStep};
use netpol_probe::resources::ignore_not_found;
use netpol_probe::{ClusterClient, ProbeError, Resources, Runner};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const POD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Logical view of the cluster while a test case runs
struct TestState {
    resources: Resources,
    policies: IndexMap<String, NetworkPolicy>,
}

impl TestState {
    fn new(resources: Resources) -> Self {
        Self {
            resources,
            policies: IndexMap::new(),
        }
    }

    fn policy_list(&self) -> Vec<NetworkPolicy> {
        self.policies.values().cloned().collect()
    }
}

fn precondition(error: ProbeError) -> ConnectivityError {
    ConnectivityError::ActionPrecondition(error.to_string())
}

pub struct Interpreter {
    client: Arc<dyn ClusterClient>,
    /// Deployed snapshot; pod IPs change when a reset recreates pods
    resources: RwLock<Resources>,
    /// Namespaces created by test cases, deleted on the next reset
    created_namespaces: Mutex<BTreeSet<String>>,
    config: InterpreterConfig,
    server_image: String,
    pod_creation_timeout: Duration,
    cluster_runner: Runner,
}

impl Interpreter {
    /// Deploy the configured resources and build an interpreter over them
    pub async fn deploy(client: Arc<dyn ClusterClient>, config: &Config) -> Result<Self> {
        let cluster = &config.cluster;
        let resources = Resources::new_default(
            &cluster.namespaces,
            &cluster.pods,
            &cluster.port_numbers(),
            &cluster.parsed_protocols(),
            &cluster.external_ips,
        )?;
        let deployed = resources
            .deploy(client.as_ref(), &cluster.server_image, cluster.pod_creation_timeout())
            .await?;
        Ok(Self::new(client, deployed, config.interpreter.clone(), cluster))
    }

    /// Build an interpreter over resources that are already deployed
    pub fn new(
        client: Arc<dyn ClusterClient>,
        resources: Resources,
        config: InterpreterConfig,
        cluster: &ClusterConfig,
    ) -> Self {
        let cluster_runner = Runner::cluster(client.clone(), config.runner_options(), config.batch_jobs);
        Self {
            client,
            resources: RwLock::new(resources),
            created_namespaces: Mutex::new(BTreeSet::new()),
            config,
            server_image: cluster.server_image.clone(),
            pod_creation_timeout: cluster.pod_creation_timeout(),
            cluster_runner,
        }
    }

    /// The deployed snapshot as of the last reset
    pub async fn resources(&self) -> Resources {
        self.resources.read().await.clone()
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Run every test case in order. Execution errors are recorded on the
    /// case's result; with fail_fast, stops after the first case that fails.
    pub async fn execute_test_cases(&self, cases: &[TestCase]) -> Vec<TestCaseResult> {
        let mut results = Vec::with_capacity(cases.len());
        for (index, case) in cases.iter().enumerate() {
            info!("Test case {}/{}: {}", index + 1, cases.len(), case.description);
            let result = self.execute_test_case(case).await;
            let passed = result.passed();
            results.push(result);
            if !passed && self.config.fail_fast {
                warn!("Stopping after failed test case '{}'", case.description);
                break;
            }
        }
        results
    }

    /// Run one case. An error aborts the remaining steps; the steps that
    /// completed are kept on the result alongside the error.
    pub async fn execute_test_case(&self, case: &TestCase) -> TestCaseResult {
        let mut result = TestCaseResult::new(case);
        if let Err(e) = self.run_steps(case, &mut result).await {
            warn!(
                "Test case '{}' aborted after {} steps: {}",
                case.description,
                result.steps.len(),
                e
            );
            result.error = Some(e.to_string());
        }
        result.finish();
        info!(
            "Test case '{}' {}",
            case.description,
            if result.passed() { "passed" } else { "failed" }
        );
        result
    }

    async fn run_steps(&self, case: &TestCase, result: &mut TestCaseResult) -> Result<()> {
        let resources = self.prepare_cluster().await?;
        let mut state = TestState::new(resources);
        for (index, step) in case.steps.iter().enumerate() {
            debug!("Step {}/{} of '{}'", index + 1, case.steps.len(), case.description);
            let step_result = self.execute_step(&mut state, step).await?;
            if !step_result.passed() {
                warn!("Step {} of '{}' disagrees with simulation", index + 1, case.description);
            }
            result.steps.push(step_result);
        }
        Ok(())
    }

    /// Reset the cluster to the deployed snapshot and return that snapshot
    async fn prepare_cluster(&self) -> Result<Resources> {
        let client = self.client.as_ref();
        if self.config.reset_cluster_before_test_case {
            let created: Vec<String> = self.created_namespaces.lock().await.iter().cloned().collect();
            for namespace in created {
                info!("Deleting namespace {} left by an earlier case", namespace);
                ignore_not_found(client.delete_namespace(&namespace).await)?;
                self.created_namespaces.lock().await.remove(&namespace);
            }

            let mut resources = self.resources.write().await;
            let namespaces = resources.namespace_names();
            debug!("Resetting pods, labels and policies in {:?}", namespaces);
            *resources = resources
                .reconcile(client, &self.server_image, self.pod_creation_timeout)
                .await?;
            client
                .delete_all_network_policies_in_namespaces(&namespaces)
                .await?;
        }

        let resources = self.resources().await;
        if self.config.verify_cluster_state_before_test_case {
            resources.verify_cluster_state(client).await?;
        }
        Ok(resources)
    }

    async fn execute_step(&self, state: &mut TestState, step: &TestStep) -> Result<StepResult> {
        for action in &step.actions {
            info!("Action: {}", action);
            self.apply_action(state, action).await?;
        }

        let wait = self.config.perturbation_wait();
        if !wait.is_zero() {
            debug!("Waiting {:?} for the data plane to converge", wait);
            tokio::time::sleep(wait).await;
        }

        let policies = state.policy_list();
        let policy = Arc::new(build_network_policies(false, &policies)?);
        let simulated = Runner::simulated(policy)
            .run_probe(&state.resources, &step.probe)
            .await;

        let mut attempts = Vec::new();
        for attempt in 0..=self.config.retries {
            let probe = self
                .cluster_runner
                .run_probe(&state.resources, &step.probe)
                .await;
            let comparison = ComparisonTable::new(&simulated, &probe, self.config.ignore_loopback);
            let different = comparison.counts().different;
            attempts.push(ProbeAttempt { probe, comparison });
            if different == 0 {
                break;
            }
            warn!(
                "Cluster probe attempt {} found {} differences",
                attempt + 1,
                different
            );
        }

        Ok(StepResult {
            policies,
            simulated,
            attempts,
        })
    }

    async fn apply_action(&self, state: &mut TestState, action: &Action) -> Result<()> {
        let client = self.client.as_ref();
        match action {
            Action::CreatePolicy { policy } => {
                let key = policy_name(policy);
                if state.policies.contains_key(&key) {
                    return Err(ConnectivityError::ActionPrecondition(format!(
                        "policy {} already exists",
                        key
                    )));
                }
                client.create_network_policy(policy).await?;
                state.policies.insert(key, with_default_policy_types(policy));
            }
            Action::UpdatePolicy { policy } => {
                let key = policy_name(policy);
                if !state.policies.contains_key(&key) {
                    return Err(ConnectivityError::ActionPrecondition(format!(
                        "policy {} does not exist",
                        key
                    )));
                }
                client.update_network_policy(policy).await?;
                state.policies.insert(key, with_default_policy_types(policy));
            }
            Action::DeletePolicy { namespace, name } => {
                let key = format!("{}/{}", namespace, name);
                if !state.policies.contains_key(&key) {
                    return Err(ConnectivityError::ActionPrecondition(format!(
                        "policy {} does not exist",
                        key
                    )));
                }
                client.delete_network_policy(namespace, name).await?;
                state.policies.shift_remove(&key);
            }
            Action::ReadPolicies { namespaces } => {
                let policies = client.get_network_policies_in_namespaces(namespaces).await?;
                debug!("Read {} policies from the cluster", policies.len());
                state.policies = policies
                    .into_iter()
                    .map(|p| (policy_name(&p), p))
                    .collect();
            }
            Action::SetPodLabels {
                namespace,
                pod,
                labels,
            } => {
                let next = state
                    .resources
                    .set_pod_labels(namespace, pod, labels.clone())
                    .map_err(precondition)?;
                client.set_pod_labels(namespace, pod, labels).await?;
                state.resources = next;
            }
            Action::SetNamespaceLabels { namespace, labels } => {
                let next = state
                    .resources
                    .set_namespace_labels(namespace, labels.clone())
                    .map_err(precondition)?;
                client.set_namespace_labels(namespace, labels).await?;
                state.resources = next;
            }
            Action::CreateNamespace { namespace, labels } => {
                let next = state
                    .resources
                    .create_namespace(namespace, labels.clone())
                    .map_err(precondition)?;
                if !self.resources.read().await.namespaces.contains_key(namespace) {
                    self.created_namespaces.lock().await.insert(namespace.clone());
                }
                client.create_or_update_namespace(namespace, labels).await?;
                state.resources = next;
            }
            Action::DeleteNamespace { namespace } => {
                let next = state
                    .resources
                    .delete_namespace(namespace)
                    .map_err(precondition)?;
                client.delete_namespace(namespace).await?;
                state
                    .policies
                    .retain(|key, _| !key.starts_with(&format!("{}/", namespace)));
                state.resources = next;
            }
            Action::CreatePod {
                namespace,
                pod,
                labels,
            } => {
                let next = state
                    .resources
                    .create_pod(namespace, pod, labels.clone())
                    .map_err(precondition)?;
                let created = next
                    .get_pod(namespace, pod)
                    .ok_or_else(|| precondition(ProbeError::NotFound {
                        kind: "pod",
                        name: format!("{}/{}", namespace, pod),
                    }))?;
                client
                    .create_service_if_not_exists(&created.kube_service())
                    .await?;
                client
                    .create_pod_if_not_exists(&created.kube_pod(&self.server_image))
                    .await?;
                let ip = self.wait_for_pod_ip(namespace, pod).await?;
                state.resources = next.with_pod_ips(&BTreeMap::from([(created.key(), ip)]));
            }
            Action::DeletePod { namespace, pod } => {
                let next = state
                    .resources
                    .delete_pod(namespace, pod)
                    .map_err(precondition)?;
                if let Some(existing) = state.resources.get_pod(namespace, pod) {
                    client
                        .delete_service(namespace, &existing.service_name())
                        .await?;
                }
                client.delete_pod(namespace, pod).await?;
                state.resources = next;
            }
        }
        Ok(())
    }

    async fn wait_for_pod_ip(&self, namespace: &str, name: &str) -> Result<String> {
        let deadline = Instant::now() + self.pod_creation_timeout;
        loop {
            let pod = self.client.get_pod(namespace, name).await?;
            let status = pod.status.unwrap_or_default();
            if status.phase.as_deref() == Some("Running") {
                if let Some(ip) = status.pod_ip.filter(|ip| !ip.is_empty()) {
                    return Ok(ip);
                }
            }
            if Instant::now() >= deadline {
                return Err(ProbeError::Timeout {
                    what: format!("pod {}/{} to be running", namespace, name),
                }
                .into());
            }
            tokio::time::sleep(POD_POLL_INTERVAL).await;
        }
    }
}
