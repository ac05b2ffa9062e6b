//! `netpol analyze`: explain, query and simulate policies without touching pods

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use netpol_connectivity::Config;
use netpol_core::{build_network_policies, load_policies_from_path, Labels, Policy, Traffic};
use netpol_probe::{ClusterClient, KubeClusterClient, ProbeConfig, Resources, Runner};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AnalyzeMode {
    /// Print every target with its source policies and peers
    Explain,
    /// Show which targets select each pod in --target-pod-path
    QueryTarget,
    /// Evaluate each connection in --traffic-path
    QueryTraffic,
    /// Simulate a probe over the configured (or --probe-path) resources
    Probe,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// NetworkPolicy file or directory (YAML or JSON)
    #[arg(long, value_name = "PATH")]
    pub policy_path: Option<PathBuf>,

    /// Read policies from the cluster as well
    #[arg(long)]
    pub use_cluster: bool,

    /// Namespaces to read policies from with --use-cluster (repeatable)
    #[arg(long = "namespace", value_name = "NAME")]
    pub namespaces: Vec<String>,

    /// Analysis to run (repeatable)
    #[arg(long, value_enum, default_values_t = vec![AnalyzeMode::Explain])]
    pub mode: Vec<AnalyzeMode>,

    /// Simplify peer matchers after compiling
    #[arg(long)]
    pub simplify: bool,

    /// JSON list of {"namespace", "labels"} pods for query-target
    #[arg(long, value_name = "PATH")]
    pub target_pod_path: Option<PathBuf>,

    /// JSON list of traffic tuples for query-traffic
    #[arg(long, value_name = "PATH")]
    pub traffic_path: Option<PathBuf>,

    /// JSON resource model for probe mode
    #[arg(long, value_name = "PATH")]
    pub probe_path: Option<PathBuf>,

    /// Print query-traffic verdicts as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct TargetPod {
    namespace: String,
    #[serde(default)]
    labels: Labels,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))
}

fn required<'a>(path: &'a Option<PathBuf>, flag: &str, mode: &str) -> Result<&'a Path> {
    match path {
        Some(path) => Ok(path.as_path()),
        None => bail!("--mode {} requires {}", mode, flag),
    }
}

async fn load_policies(args: &AnalyzeArgs, config: &Config) -> Result<Vec<NetworkPolicy>> {
    if args.policy_path.is_none() && !args.use_cluster {
        bail!("Either --policy-path or --use-cluster is required");
    }

    let mut policies = Vec::new();
    if let Some(path) = &args.policy_path {
        let loaded = load_policies_from_path(path)
            .with_context(|| format!("Failed to load policies from {:?}", path))?;
        info!("Loaded {} policies from {:?}", loaded.len(), path);
        policies.extend(loaded);
    }
    if args.use_cluster {
        let namespaces = if args.namespaces.is_empty() {
            config.cluster.namespaces.clone()
        } else {
            args.namespaces.clone()
        };
        let client = KubeClusterClient::try_default()
            .await
            .context("Failed to connect to the Kubernetes cluster")?;
        let listed = client.get_network_policies_in_namespaces(&namespaces).await?;
        info!("Read {} policies from namespaces {:?}", listed.len(), namespaces);
        policies.extend(listed);
    }
    Ok(policies)
}

fn query_targets(policy: &Policy, pods: &[TargetPod]) -> String {
    let mut out = String::new();
    for pod in pods {
        let (ingress, egress) = policy.targets_for_pod(&pod.namespace, &pod.labels);
        let _ = writeln!(out, "Pod in {} with labels {:?}:", pod.namespace, pod.labels);
        for (direction, targets) in [("Ingress", ingress), ("Egress", egress)] {
            if targets.is_empty() {
                let _ = writeln!(out, "{}: no targets", direction);
                continue;
            }
            let _ = writeln!(out, "{}:", direction);
            for target in targets {
                out.push_str(&policy.explain_target(target));
            }
        }
        out.push('\n');
    }
    out
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrafficVerdict<'a> {
    traffic: &'a Traffic,
    ingress: bool,
    egress: bool,
    allowed: bool,
}

fn query_traffic_json(policy: &Policy, traffic: &[Traffic]) -> Result<String> {
    let verdicts: Vec<TrafficVerdict> = traffic
        .iter()
        .map(|t| {
            let result = policy.is_traffic_allowed(t);
            TrafficVerdict {
                traffic: t,
                ingress: result.ingress.is_allowed(),
                egress: result.egress.is_allowed(),
                allowed: result.is_allowed(),
            }
        })
        .collect();
    Ok(serde_json::to_string_pretty(&verdicts)?)
}

fn query_traffic(policy: &Policy, traffic: &[Traffic]) -> String {
    let mut out = String::new();
    for t in traffic {
        let result = policy.is_traffic_allowed(t);
        let _ = writeln!(out, "{}", t);
        let _ = writeln!(out, "{}\n", result.explain(policy));
    }
    out
}

async fn simulate_probe(policy: Policy, resources: &Resources) -> String {
    let probe = Runner::simulated(Arc::new(policy))
        .run_probe(resources, &ProbeConfig::AllAvailable)
        .await;
    format!(
        "Ingress:\n{}\nEgress:\n{}\nCombined:\n{}",
        probe.render_ingress(),
        probe.render_egress(),
        probe.render_combined()
    )
}

pub async fn run(args: AnalyzeArgs, config: Config) -> Result<()> {
    let policies = load_policies(&args, &config).await?;
    let mut policy = build_network_policies(false, &policies).context("Failed to compile policies")?;
    if args.simplify {
        policy.simplify();
    }

    for mode in &args.mode {
        match mode {
            AnalyzeMode::Explain => print!("{}", policy.explain()),
            AnalyzeMode::QueryTarget => {
                let path = required(&args.target_pod_path, "--target-pod-path", "query-target")?;
                let pods: Vec<TargetPod> = read_json(path)?;
                print!("{}", query_targets(&policy, &pods));
            }
            AnalyzeMode::QueryTraffic => {
                let path = required(&args.traffic_path, "--traffic-path", "query-traffic")?;
                let traffic: Vec<Traffic> = read_json(path)?;
                if args.json {
                    println!("{}", query_traffic_json(&policy, &traffic)?);
                } else {
                    print!("{}", query_traffic(&policy, &traffic));
                }
            }
            AnalyzeMode::Probe => {
                let resources = match &args.probe_path {
                    Some(path) => read_json(path)?,
                    None => {
                        let cluster = &config.cluster;
                        Resources::new_default(
                            &cluster.namespaces,
                            &cluster.pods,
                            &cluster.port_numbers(),
                            &cluster.parsed_protocols(),
                            &cluster.external_ips,
                        )?
                    }
                };
                print!("{}", simulate_probe(policy.clone(), &resources).await);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_core::parse_policies;

    const POLICY: &str = r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata:
  name: allow-b
  namespace: x
spec:
  podSelector:
    matchLabels:
      pod: a
  policyTypes: [Ingress]
  ingress:
    - from:
        - podSelector:
            matchLabels:
              pod: b
"#;

    fn policy() -> Policy {
        build_network_policies(false, &parse_policies(POLICY).unwrap()).unwrap()
    }

    #[test]
    fn test_query_targets() {
        let pods: Vec<TargetPod> = serde_json::from_str(
            r#"[{"namespace": "x", "labels": {"pod": "a"}}, {"namespace": "y"}]"#,
        )
        .unwrap();
        let out = query_targets(&policy(), &pods);
        assert!(out.contains("x/allow-b"));
        assert!(out.contains("Egress: no targets"));
    }

    #[test]
    fn test_query_traffic() {
        let traffic: Vec<Traffic> = serde_json::from_str(
            r#"[{
                "source": {"internal": {"namespace": "x", "podLabels": {"pod": "c"}}},
                "destination": {"internal": {"namespace": "x", "podLabels": {"pod": "a"}}},
                "resolvedPort": 80,
                "protocol": "TCP"
            }]"#,
        )
        .unwrap();
        let out = query_traffic(&policy(), &traffic);
        assert!(out.contains("Combined: blocked"));

        let json: serde_json::Value =
            serde_json::from_str(&query_traffic_json(&policy(), &traffic).unwrap()).unwrap();
        assert_eq!(json[0]["ingress"], false);
        assert_eq!(json[0]["egress"], true);
        assert_eq!(json[0]["allowed"], false);
        assert_eq!(json[0]["traffic"]["resolvedPort"], 80);
    }

    #[tokio::test]
    async fn test_simulate_probe() {
        let resources = Resources::new_default(
            &["x".to_string()],
            &["a".to_string(), "b".to_string()],
            &[80],
            &[netpol_core::Protocol::Tcp],
            &[],
        )
        .unwrap();
        let out = simulate_probe(policy(), &resources).await;
        assert!(out.starts_with("Ingress:\n80/TCP:"));
        assert!(out.contains("Combined:"));
    }

    #[test]
    fn test_mode_requires_path() {
        assert!(required(&None, "--traffic-path", "query-traffic").is_err());
    }
}
