//! Job runners: simulated, one exec per job, or one exec per source container

use crate::client::{ClusterClient, ExecOutput};
use crate::job::{batch_script, parse_batch_output, Job, Jobs};
use crate::pool::run_worker_pool;
use crate::probe::{Connectivity, JobResult, Probe, ProbeConfig, Verdict};
use crate::resources::Resources;
use async_trait::async_trait;
use netpol_core::Policy;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 15;
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_jobs(&self, jobs: Vec<Job>) -> Vec<JobResult>;
}

/// Answers jobs from a compiled policy without touching a cluster
pub struct SimulatedJobRunner {
    policy: Arc<Policy>,
}

impl SimulatedJobRunner {
    pub fn new(policy: Arc<Policy>) -> Self {
        Self { policy }
    }

    pub fn run_job(&self, job: Job) -> JobResult {
        let allowed = self.policy.is_traffic_allowed(&job.traffic());
        let verdict = Verdict::simulated(allowed.ingress.is_allowed(), allowed.egress.is_allowed());
        JobResult { job, verdict }
    }
}

#[async_trait]
impl JobRunner for SimulatedJobRunner {
    async fn run_jobs(&self, jobs: Vec<Job>) -> Vec<JobResult> {
        jobs.into_iter().map(|job| self.run_job(job)).collect()
    }
}

/// Timing and parallelism shared by the cluster runners
#[derive(Debug, Clone, Copy)]
pub struct ClusterRunnerOptions {
    pub workers: usize,
    pub job_timeout: Duration,
}

impl Default for ClusterRunnerOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

async fn exec_with_timeout(
    client: &dyn ClusterClient,
    job: &Job,
    command: &[String],
    timeout: Duration,
) -> Option<ExecOutput> {
    let exec = client.execute_remote_command(
        &job.source.namespace,
        &job.source.pod,
        &job.source.container,
        command,
    );
    match tokio::time::timeout(timeout, exec).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            warn!("Probe {} -> {} could not run: {}", job.from_key(), job.to_key(), e);
            None
        }
        Err(_) => {
            warn!("Probe {} -> {} timed out after {:?}", job.from_key(), job.to_key(), timeout);
            None
        }
    }
}

/// Runs each job as its own remote command
pub struct ClusterJobRunner {
    client: Arc<dyn ClusterClient>,
    options: ClusterRunnerOptions,
}

impl ClusterJobRunner {
    pub fn new(client: Arc<dyn ClusterClient>, options: ClusterRunnerOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl JobRunner for ClusterJobRunner {
    async fn run_jobs(&self, jobs: Vec<Job>) -> Vec<JobResult> {
        let client = Arc::clone(&self.client);
        let timeout = self.options.job_timeout;
        run_worker_pool(jobs, self.options.workers, move |job: Job| {
            let client = Arc::clone(&client);
            async move {
                let command = job.client_command();
                let combined = match exec_with_timeout(client.as_ref(), &job, &command, timeout).await {
                    Some(output) if output.is_success() => Connectivity::Allowed,
                    Some(output) => {
                        debug!(
                            "Probe {} -> {} failed: {}",
                            job.from_key(),
                            job.to_key(),
                            output.command_error.as_deref().unwrap_or_default()
                        );
                        Connectivity::Blocked
                    }
                    None => Connectivity::CheckFailed,
                };
                JobResult {
                    job,
                    verdict: Verdict::combined(combined),
                }
            }
        })
        .await
    }
}

/// Runs every job from one source container in a single shell script
pub struct BatchJobRunner {
    client: Arc<dyn ClusterClient>,
    options: ClusterRunnerOptions,
}

impl BatchJobRunner {
    pub fn new(client: Arc<dyn ClusterClient>, options: ClusterRunnerOptions) -> Self {
        Self { client, options }
    }
}

fn group_by_source(jobs: Vec<Job>) -> Vec<Vec<Job>> {
    let mut groups: BTreeMap<(String, String, String), Vec<Job>> = BTreeMap::new();
    for job in jobs {
        let source = (
            job.source.namespace.clone(),
            job.source.pod.clone(),
            job.source.container.clone(),
        );
        groups.entry(source).or_default().push(job);
    }
    groups.into_values().collect()
}

#[async_trait]
impl JobRunner for BatchJobRunner {
    async fn run_jobs(&self, jobs: Vec<Job>) -> Vec<JobResult> {
        let client = Arc::clone(&self.client);
        let timeout = self.options.job_timeout;
        let batches = group_by_source(jobs);
        debug!("Running {} batches", batches.len());

        let results = run_worker_pool(batches, self.options.workers, move |batch: Vec<Job>| {
            let client = Arc::clone(&client);
            async move {
                let Some(first) = batch.first() else {
                    return Vec::new();
                };
                let command = vec!["sh".to_string(), "-c".to_string(), batch_script(&batch)];
                // one timeout per job, since the script runs them sequentially
                let budget = timeout.saturating_mul(u32::try_from(batch.len()).unwrap_or(u32::MAX));
                let codes = exec_with_timeout(client.as_ref(), first, &command, budget)
                    .await
                    .map(|output| parse_batch_output(&output.stdout));

                batch
                    .into_iter()
                    .enumerate()
                    .map(|(index, job)| {
                        let combined = match codes.as_ref().map(|c| c.get(&index).copied()) {
                            Some(Some(0)) => Connectivity::Allowed,
                            Some(Some(_)) => Connectivity::Blocked,
                            Some(None) | None => Connectivity::CheckFailed,
                        };
                        JobResult {
                            job,
                            verdict: Verdict::combined(combined),
                        }
                    })
                    .collect::<Vec<_>>()
            }
        })
        .await;

        results.into_iter().flatten().collect()
    }
}

/// Turns a probe request into jobs, runs them, and assembles the table
pub struct Runner {
    job_runner: Arc<dyn JobRunner>,
}

impl Runner {
    pub fn new(job_runner: Arc<dyn JobRunner>) -> Self {
        Self { job_runner }
    }

    pub fn simulated(policy: Arc<Policy>) -> Self {
        Self::new(Arc::new(SimulatedJobRunner::new(policy)))
    }

    pub fn cluster(client: Arc<dyn ClusterClient>, options: ClusterRunnerOptions, batch: bool) -> Self {
        if batch {
            Self::new(Arc::new(BatchJobRunner::new(client, options)))
        } else {
            Self::new(Arc::new(ClusterJobRunner::new(client, options)))
        }
    }

    pub fn jobs_for(resources: &Resources, config: &ProbeConfig) -> Jobs {
        match config {
            ProbeConfig::AllAvailable => resources.get_jobs_all_available_servers(),
            ProbeConfig::PortProtocol { port, protocol } => {
                resources.get_jobs_for_port_protocol(port, *protocol)
            }
        }
    }

    /// Run a probe. Jobs whose port did not resolve are never dispatched.
    pub async fn run_probe(&self, resources: &Resources, config: &ProbeConfig) -> Probe {
        let jobs = Self::jobs_for(resources, config);
        info!(
            "Probing {}: {} jobs ({} bad named port, {} bad port/protocol)",
            config,
            jobs.valid.len(),
            jobs.bad_named_port.len(),
            jobs.bad_port_protocol.len()
        );

        let mut probe = Probe::new(resources);
        for job in &jobs.bad_named_port {
            probe.set(job, Verdict::invalid(Connectivity::InvalidNamedPort));
        }
        for job in &jobs.bad_port_protocol {
            probe.set(job, Verdict::invalid(Connectivity::InvalidPortProtocol));
        }
        for result in self.job_runner.run_jobs(jobs.valid).await {
            probe.set(&result.job, result.verdict);
        }
        probe
    }
}
