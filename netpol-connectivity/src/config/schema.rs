//! Configuration schema types

use netpol_core::Protocol;
use netpol_probe::resources::DEFAULT_SERVER_IMAGE;
use netpol_probe::ClusterRunnerOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommonConfig {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    #[serde(default)]
    pub verbose: bool,
}

fn default_config_version() -> String {
    "1.0".to_string()
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            verbose: false,
        }
    }
}

/// How test cases are executed against the cluster
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InterpreterConfig {
    #[serde(default = "default_true")]
    pub reset_cluster_before_test_case: bool,
    #[serde(default = "default_true")]
    pub verify_cluster_state_before_test_case: bool,
    /// Extra cluster probe attempts per step after a mismatch
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_perturbation_wait")]
    pub perturbation_wait_seconds: u64,
    #[serde(default)]
    pub batch_jobs: bool,
    #[serde(default)]
    pub ignore_loopback: bool,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_seconds: u64,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    1
}

fn default_perturbation_wait() -> u64 {
    5
}

fn default_job_timeout() -> u64 {
    10
}

fn default_worker_count() -> usize {
    15
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            reset_cluster_before_test_case: true,
            verify_cluster_state_before_test_case: true,
            retries: default_retries(),
            perturbation_wait_seconds: default_perturbation_wait(),
            batch_jobs: false,
            ignore_loopback: false,
            job_timeout_seconds: default_job_timeout(),
            fail_fast: false,
            worker_count: default_worker_count(),
        }
    }
}

impl InterpreterConfig {
    pub fn perturbation_wait(&self) -> Duration {
        Duration::from_secs(self.perturbation_wait_seconds)
    }

    pub fn runner_options(&self) -> ClusterRunnerOptions {
        ClusterRunnerOptions {
            workers: self.worker_count.max(1),
            job_timeout: Duration::from_secs(self.job_timeout_seconds),
        }
    }
}

/// The namespaces, pods and servers deployed for probing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,
    #[serde(default = "default_pods")]
    pub pods: Vec<String>,
    #[serde(default = "default_ports")]
    pub ports: Vec<u32>,
    #[serde(default = "default_protocols")]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub external_ips: Vec<String>,
    #[serde(default = "default_server_image")]
    pub server_image: String,
    #[serde(default = "default_pod_creation_timeout")]
    pub pod_creation_timeout_seconds: u64,
}

fn default_namespaces() -> Vec<String> {
    vec!["x".to_string(), "y".to_string(), "z".to_string()]
}

fn default_pods() -> Vec<String> {
    vec!["a".to_string(), "b".to_string(), "c".to_string()]
}

fn default_ports() -> Vec<u32> {
    vec![80, 81]
}

fn default_protocols() -> Vec<String> {
    Protocol::ALL.iter().map(|p| p.to_string()).collect()
}

fn default_server_image() -> String {
    DEFAULT_SERVER_IMAGE.to_string()
}

fn default_pod_creation_timeout() -> u64 {
    300
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespaces: default_namespaces(),
            pods: default_pods(),
            ports: default_ports(),
            protocols: default_protocols(),
            external_ips: Vec::new(),
            server_image: default_server_image(),
            pod_creation_timeout_seconds: default_pod_creation_timeout(),
        }
    }
}

impl ClusterConfig {
    /// Ports that fit in a u16; out-of-range values are rejected by validation
    pub fn port_numbers(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter_map(|p| u16::try_from(*p).ok())
            .filter(|p| *p != 0)
            .collect()
    }

    /// Protocols that parse; unknown names are rejected by validation
    pub fn parsed_protocols(&self) -> Vec<Protocol> {
        self.protocols.iter().filter_map(|p| p.parse().ok()).collect()
    }

    pub fn pod_creation_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_creation_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_dns: bool,
    #[serde(default = "default_dns_port")]
    pub dns_port: u16,
    /// Address used for generated IPBlock peers; a deployed pod's IP when unset
    #[serde(default)]
    pub pod_ip: Option<String>,
}

fn default_dns_port() -> u16 {
    netpol_generator::DEFAULT_DNS_PORT
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            allow_dns: true,
            dns_port: default_dns_port(),
            pod_ip: None,
        }
    }
}
