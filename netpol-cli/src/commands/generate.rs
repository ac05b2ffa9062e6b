//! `netpol generate`: run generated conformance cases against a cluster

use super::{cluster_client, validate, ClusterArgs, MockArgs};
use anyhow::{bail, Context, Result};
use clap::Args;
use netpol_connectivity::{junit, printer};
use netpol_connectivity::{Config, Interpreter, Summary};
use netpol_core::policy_name;
use netpol_generator::{Generator, GeneratorOptions, TestCase};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args, Debug, Default)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub mock: MockArgs,

    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Only run cases carrying one of these tags or tag categories (repeatable)
    #[arg(long, value_name = "TAG")]
    pub include: Vec<String>,

    /// Skip cases carrying any of these tags or tag categories (repeatable)
    #[arg(long, value_name = "TAG")]
    pub exclude: Vec<String>,

    /// Extra cluster probes for a step that disagrees with the simulation
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Stop after the first failing case
    #[arg(long)]
    pub fail_fast: bool,

    /// Seconds to wait after applying a step's actions
    #[arg(long, value_name = "SECONDS")]
    pub perturbation_wait_seconds: Option<u64>,

    /// Seconds allowed for one probe command
    #[arg(long, value_name = "SECONDS")]
    pub job_timeout_seconds: Option<u64>,

    /// Do not compare a pod's connections to itself
    #[arg(long)]
    pub ignore_loopback: bool,

    /// Run one command per source pod instead of one per connection
    #[arg(long)]
    pub batch_jobs: bool,

    /// Do not add the DNS egress rule to generated egress policies
    #[arg(long)]
    pub no_allow_dns: bool,

    /// Write JUnit XML results to this file
    #[arg(long, value_name = "PATH")]
    pub junit_results: Option<PathBuf>,

    /// List the selected cases without touching a cluster
    #[arg(long)]
    pub dry_run: bool,
}

impl GenerateArgs {
    fn apply(&self, config: &mut Config) {
        self.cluster.apply(&mut config.cluster);
        let interpreter = &mut config.interpreter;
        if let Some(retries) = self.retries {
            interpreter.retries = retries;
        }
        if let Some(wait) = self.perturbation_wait_seconds {
            interpreter.perturbation_wait_seconds = wait;
        }
        if let Some(timeout) = self.job_timeout_seconds {
            interpreter.job_timeout_seconds = timeout;
        }
        interpreter.fail_fast |= self.fail_fast;
        interpreter.ignore_loopback |= self.ignore_loopback;
        interpreter.batch_jobs |= self.batch_jobs;

        let generator = &mut config.generator;
        if !self.include.is_empty() {
            generator.include = self.include.clone();
        }
        if !self.exclude.is_empty() {
            generator.exclude = self.exclude.clone();
        }
        if self.no_allow_dns {
            generator.allow_dns = false;
        }
    }
}

fn generate_cases(config: &Config, pod_ip: IpAddr) -> Vec<TestCase> {
    let cluster = &config.cluster;
    let generator = Generator::new(GeneratorOptions {
        allow_dns: config.generator.allow_dns,
        dns_port: config.generator.dns_port,
        pod_ip,
        namespaces: cluster.namespaces.clone(),
        pods: cluster.pods.clone(),
        ports: cluster.port_numbers(),
        protocols: cluster.parsed_protocols(),
    });
    let cases = generator.generate(&config.generator.include, &config.generator.exclude);
    info!("Selected {} test cases", cases.len());
    cases
}

fn configured_pod_ip(config: &Config) -> Result<Option<IpAddr>> {
    config
        .generator
        .pod_ip
        .as_deref()
        .map(|ip| ip.parse().with_context(|| format!("Invalid generator pod_ip '{}'", ip)))
        .transpose()
}

fn render_dry_run(cases: &[TestCase]) -> String {
    let mut out = String::new();
    for (index, case) in cases.iter().enumerate() {
        let tags: Vec<&str> = case.tags.iter().map(String::as_str).collect();
        out.push_str(&format!(
            "{:>4}. {} [{}]\n",
            index + 1,
            case.description,
            tags.join(", ")
        ));
        for step in &case.steps {
            out.push_str(&format!("      probe {}\n", step.probe));
            for action in &step.actions {
                out.push_str(&format!("        {}\n", action));
            }
        }
        let names: Vec<String> = case.policies().into_iter().map(policy_name).collect();
        if !names.is_empty() {
            out.push_str(&format!("      policies: {}\n", names.join(", ")));
        }
    }
    out
}

pub async fn run(args: GenerateArgs, mut config: Config, verbose: bool) -> Result<()> {
    args.apply(&mut config);
    validate(&config)?;

    if args.dry_run {
        let pod_ip = configured_pod_ip(&config)?.unwrap_or(GeneratorOptions::default().pod_ip);
        print!("{}", render_dry_run(&generate_cases(&config, pod_ip)));
        return Ok(());
    }

    let client = cluster_client(&args.mock).await?;
    let interpreter = Interpreter::deploy(client, &config)
        .await
        .context("Failed to deploy probe resources")?;

    let pod_ip = match configured_pod_ip(&config)? {
        Some(ip) => ip,
        None => interpreter
            .resources()
            .await
            .pods
            .first()
            .and_then(|pod| pod.parsed_ip())
            .context("No deployed pod has an IP to use for IPBlock cases")?,
    };
    let cases = generate_cases(&config, pod_ip);

    let results = interpreter.execute_test_cases(&cases).await;
    for result in &results {
        print!("{}", printer::render_test_case(result, verbose));
    }

    let summary = Summary::from_results(&results);
    print!("{}", printer::render_summary(&summary));

    if let Some(path) = &args.junit_results {
        junit::write_report(path, &results)
            .with_context(|| format!("Failed to write JUnit results to {:?}", path))?;
    }

    if summary.failed + summary.errored > 0 {
        warn!(
            "{} of {} test cases did not pass",
            summary.failed + summary.errored,
            summary.total()
        );
        if config.interpreter.fail_fast {
            bail!("Stopped after a failing test case");
        }
    }
    Ok(())
}
