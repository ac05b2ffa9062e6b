//! `netpol probe`: one probe of the deployed pods under a chosen policy set

use super::{cluster_client, validate, ClusterArgs, MockArgs};
use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use netpol_connectivity::printer;
use netpol_connectivity::{Config, Interpreter};
use netpol_core::{load_policies_from_path, PortValue, Protocol};
use netpol_generator::{Action, TestCase, TestStep};
use netpol_probe::ProbeConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicySource {
    /// Replace the cluster's policies with those in --policy-path
    File,
    /// Probe under whatever policies the cluster already has
    Cluster,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub mock: MockArgs,

    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Where the policies under test come from
    #[arg(long, value_enum, default_value_t = PolicySource::File)]
    pub policy_source: PolicySource,

    /// NetworkPolicy file or directory for --policy-source file
    #[arg(long, value_name = "PATH")]
    pub policy_path: Option<PathBuf>,

    /// Probe a single PORT/PROTOCOL (port may be a name) instead of every served port
    #[arg(long, value_name = "PORT/PROTOCOL", value_parser = parse_port_protocol)]
    pub server_port_protocol: Option<ProbeConfig>,

    /// Skip checking pod labels and IPs before probing
    #[arg(long)]
    pub skip_verify: bool,
}

fn parse_port_protocol(value: &str) -> std::result::Result<ProbeConfig, String> {
    let (port, protocol) = value
        .split_once('/')
        .ok_or_else(|| format!("expected PORT/PROTOCOL, got '{}'", value))?;
    let protocol: Protocol = protocol.parse().map_err(|e| format!("{}", e))?;
    let port = match port.parse::<u16>() {
        Ok(0) => return Err("port must be in 1..=65535".to_string()),
        Ok(n) => PortValue::Number(n),
        Err(_) if port.is_empty() => return Err("port must not be empty".to_string()),
        Err(_) => PortValue::Name(port.to_string()),
    };
    Ok(ProbeConfig::port_protocol(port, protocol))
}

/// The single-step case this command runs
fn probe_case(args: &ProbeArgs, namespaces: &[String]) -> Result<TestCase> {
    let probe = args
        .server_port_protocol
        .clone()
        .unwrap_or(ProbeConfig::AllAvailable);
    let actions = match args.policy_source {
        PolicySource::File => {
            let Some(path) = &args.policy_path else {
                bail!("--policy-source file requires --policy-path");
            };
            let policies = load_policies_from_path(path)
                .with_context(|| format!("Failed to load policies from {:?}", path))?;
            info!("Loaded {} policies from {:?}", policies.len(), path);
            policies.into_iter().map(Action::create_policy).collect()
        }
        PolicySource::Cluster => vec![Action::read_policies(namespaces)],
    };
    Ok(TestCase::new(
        "probe",
        std::iter::empty::<&str>(),
        vec![TestStep::new(probe, actions)],
    ))
}

pub async fn run(args: ProbeArgs, mut config: Config, verbose: bool) -> Result<()> {
    args.cluster.apply(&mut config.cluster);
    // Existing policies are the subject of a cluster-sourced probe
    config.interpreter.reset_cluster_before_test_case = args.policy_source == PolicySource::File;
    config.interpreter.verify_cluster_state_before_test_case = !args.skip_verify;
    validate(&config)?;

    let case = probe_case(&args, &config.cluster.namespaces)?;
    let client = cluster_client(&args.mock).await?;
    let interpreter = Interpreter::deploy(client, &config)
        .await
        .context("Failed to deploy probe resources")?;

    let result = interpreter.execute_test_case(&case).await;
    print!("{}", printer::render_test_case(&result, verbose));

    if let Some(error) = &result.error {
        bail!("Probe failed: {}", error);
    }
    if !result.passed() {
        bail!("Cluster connectivity differs from the simulation");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_port_protocol() {
        assert_eq!(
            parse_port_protocol("80/tcp").unwrap(),
            ProbeConfig::port_protocol(PortValue::Number(80), Protocol::Tcp)
        );
        assert_eq!(
            parse_port_protocol("serve-81-udp/UDP").unwrap(),
            ProbeConfig::port_protocol(PortValue::Name("serve-81-udp".to_string()), Protocol::Udp)
        );
        assert!(parse_port_protocol("80").is_err());
        assert!(parse_port_protocol("0/TCP").is_err());
        assert!(parse_port_protocol("80/ICMP").is_err());
    }

    fn args(source: PolicySource, path: Option<PathBuf>) -> ProbeArgs {
        ProbeArgs {
            mock: MockArgs {
                mock: true,
                mock_pass_rate: None,
            },
            cluster: ClusterArgs::default(),
            policy_source: source,
            policy_path: path,
            server_port_protocol: None,
            skip_verify: false,
        }
    }

    #[test]
    fn test_probe_case_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apiVersion: networking.k8s.io/v1\nkind: NetworkPolicy\nmetadata:\n  name: deny\n  namespace: x\nspec:\n  podSelector: {{}}\n  policyTypes: [Ingress]"
        )
        .unwrap();

        let case = probe_case(&args(PolicySource::File, Some(file.path().to_path_buf())), &[]).unwrap();
        assert_eq!(case.steps.len(), 1);
        assert_eq!(case.policies().len(), 1);
        assert_eq!(case.steps[0].probe, ProbeConfig::AllAvailable);

        assert!(probe_case(&args(PolicySource::File, None), &[]).is_err());
    }

    #[test]
    fn test_probe_case_from_cluster_reads_policies() {
        let namespaces = vec!["x".to_string()];
        let case = probe_case(&args(PolicySource::Cluster, None), &namespaces).unwrap();
        assert!(matches!(
            &case.steps[0].actions[..],
            [Action::ReadPolicies { namespaces }] if namespaces == &["x".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_run_against_enforcing_mock() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apiVersion: networking.k8s.io/v1\nkind: NetworkPolicy\nmetadata:\n  name: deny\n  namespace: x\nspec:\n  podSelector: {{}}\n  policyTypes: [Ingress]"
        )
        .unwrap();
        let mut config = Config::default();
        config.interpreter.perturbation_wait_seconds = 0;
        config.cluster.namespaces = vec!["x".to_string(), "y".to_string()];
        config.cluster.pods = vec!["a".to_string()];
        config.cluster.ports = vec![80];
        config.cluster.protocols = vec!["TCP".to_string()];

        run(args(PolicySource::File, Some(file.path().to_path_buf())), config, false)
            .await
            .unwrap();
    }
}
