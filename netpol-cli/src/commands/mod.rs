//! Subcommand implementations and the arguments they share

pub mod analyze;
pub mod generate;
pub mod probe;

use anyhow::{Context, Result};
use clap::Args;
use netpol_connectivity::config::ClusterConfig;
use netpol_connectivity::{Config, ConfigLoader, ConfigValidator};
use netpol_probe::{ClusterClient, KubeClusterClient, MockClusterClient};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    ConfigLoader::load_with_priority(path).context("Failed to load configuration")
}

pub fn validate(config: &Config) -> Result<()> {
    ConfigValidator::validate(config).context("Invalid configuration")
}

/// Overrides for the deployed namespaces, pods and servers
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// Namespace to deploy probe pods in (repeatable)
    #[arg(long = "namespace", value_name = "NAME")]
    pub namespaces: Vec<String>,

    /// Pod name deployed in every namespace (repeatable)
    #[arg(long = "pod", value_name = "NAME")]
    pub pods: Vec<String>,

    /// Port served by every pod (repeatable)
    #[arg(long = "port", value_name = "PORT")]
    pub ports: Vec<u32>,

    /// Protocol served on every port: TCP, UDP or SCTP (repeatable)
    #[arg(long = "protocol", value_name = "PROTOCOL")]
    pub protocols: Vec<String>,

    /// External IP to probe from every pod (repeatable)
    #[arg(long = "external-ip", value_name = "IP")]
    pub external_ips: Vec<String>,
}

impl ClusterArgs {
    pub fn apply(&self, cluster: &mut ClusterConfig) {
        if !self.namespaces.is_empty() {
            cluster.namespaces = self.namespaces.clone();
        }
        if !self.pods.is_empty() {
            cluster.pods = self.pods.clone();
        }
        if !self.ports.is_empty() {
            cluster.ports = self.ports.clone();
        }
        if !self.protocols.is_empty() {
            cluster.protocols = self.protocols.clone();
        }
        if !self.external_ips.is_empty() {
            cluster.external_ips = self.external_ips.clone();
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct MockArgs {
    /// Use an in-memory cluster that enforces the policies it is given
    #[arg(long)]
    pub mock: bool,

    /// With --mock, let each probe succeed with this probability instead
    #[arg(long, value_name = "RATE", requires = "mock")]
    pub mock_pass_rate: Option<f64>,
}

pub async fn cluster_client(mock: &MockArgs) -> Result<Arc<dyn ClusterClient>> {
    if !mock.mock {
        let client = KubeClusterClient::try_default()
            .await
            .context("Failed to connect to the Kubernetes cluster")?;
        return Ok(Arc::new(client));
    }
    match mock.mock_pass_rate {
        Some(rate) => {
            info!("Using mock cluster with pass rate {}", rate);
            Ok(Arc::new(MockClusterClient::new(rate)))
        }
        None => {
            info!("Using mock cluster enforcing stored policies");
            Ok(Arc::new(MockClusterClient::enforcing_policies()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_args_override_only_given_fields() {
        let mut cluster = ClusterConfig::default();
        let args = ClusterArgs {
            namespaces: vec!["p".to_string()],
            ports: vec![8080],
            ..Default::default()
        };
        args.apply(&mut cluster);
        assert_eq!(cluster.namespaces, vec!["p"]);
        assert_eq!(cluster.ports, vec![8080]);
        assert_eq!(cluster.pods, vec!["a", "b", "c"]);
    }
}
