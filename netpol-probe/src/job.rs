//! Probe jobs: one connection attempt from a source container to a destination

use crate::resources::{Pod, Resources};
use netpol_core::{Labels, PortValue, Protocol, Traffic, TrafficPeer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Marker prefix for per-job exit codes in batch script output
pub const BATCH_RESULT_MARKER: &str = "netpol-result";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSource {
    pub namespace: String,
    pub namespace_labels: Labels,
    pub pod: String,
    pub pod_labels: Labels,
    pub container: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum JobDestination {
    Pod {
        namespace: String,
        namespace_labels: Labels,
        pod: String,
        pod_labels: Labels,
        ip: String,
        host: String,
    },
    External {
        ip: String,
    },
}

impl JobDestination {
    fn from_pod(pod: &Pod, namespace_labels: Labels) -> Self {
        JobDestination::Pod {
            namespace: pod.namespace.clone(),
            namespace_labels,
            pod: pod.name.clone(),
            pod_labels: pod.labels.clone(),
            ip: pod.ip.clone(),
            host: pod.host(),
        }
    }

    /// Truth table column key
    pub fn key(&self) -> String {
        match self {
            JobDestination::Pod { namespace, pod, .. } => crate::resources::pod_key(namespace, pod),
            JobDestination::External { ip } => ip.clone(),
        }
    }

    /// Address the client connects to
    pub fn address(&self) -> &str {
        match self {
            JobDestination::Pod { host, .. } => host,
            JobDestination::External { ip } => ip,
        }
    }

    fn traffic_peer(&self) -> TrafficPeer {
        match self {
            JobDestination::Pod {
                namespace,
                namespace_labels,
                pod_labels,
                ip,
                ..
            } => TrafficPeer::internal(
                namespace.clone(),
                namespace_labels.clone(),
                pod_labels.clone(),
                ip.parse().ok(),
            ),
            JobDestination::External { ip } => TrafficPeer {
                internal: None,
                ip: ip.parse().ok(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub source: JobSource,
    pub destination: JobDestination,
    pub resolved_port: u16,
    #[serde(default)]
    pub resolved_port_name: Option<String>,
    pub protocol: Protocol,
    /// Port-protocol label this job reports under, e.g. `80/TCP`
    pub probe_key: String,
}

impl Job {
    pub fn from_key(&self) -> String {
        crate::resources::pod_key(&self.source.namespace, &self.source.pod)
    }

    pub fn to_key(&self) -> String {
        self.destination.key()
    }

    pub fn traffic(&self) -> Traffic {
        Traffic {
            source: TrafficPeer::internal(
                self.source.namespace.clone(),
                self.source.namespace_labels.clone(),
                self.source.pod_labels.clone(),
                self.source.ip.parse().ok(),
            ),
            destination: self.destination.traffic_peer(),
            resolved_port: self.resolved_port,
            resolved_port_name: self.resolved_port_name.clone(),
            protocol: self.protocol,
        }
    }

    /// argv of the connectivity check run in the source container
    pub fn client_command(&self) -> Vec<String> {
        let host = self.destination.address();
        let port = self.resolved_port.to_string();
        match self.protocol {
            Protocol::Tcp | Protocol::Sctp => vec![
                "/agnhost".to_string(),
                "connect".to_string(),
                join_host_port(host, &port),
                "--timeout=1s".to_string(),
                format!("--protocol={}", self.protocol.lower()),
            ],
            Protocol::Udp => vec![
                "nc".to_string(),
                "-v".to_string(),
                "-z".to_string(),
                "-w".to_string(),
                "1".to_string(),
                "-u".to_string(),
                host.to_string(),
                port,
            ],
        }
    }
}

fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Destination and port recovered from a client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl ProbeTarget {
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

/// Inverse of `Job::client_command`
pub fn parse_client_command(argv: &[String]) -> Option<ProbeTarget> {
    match argv.first().map(String::as_str) {
        Some("/agnhost") if argv.get(1).map(String::as_str) == Some("connect") => {
            let (host, port) = argv.get(2)?.rsplit_once(':')?;
            let protocol = argv
                .iter()
                .find_map(|a| a.strip_prefix("--protocol="))
                .unwrap_or("tcp")
                .parse()
                .ok()?;
            Some(ProbeTarget {
                host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                port: port.parse().ok()?,
                protocol,
            })
        }
        Some("nc") if argv.len() >= 2 => {
            let protocol = if argv.iter().any(|a| a == "-u") {
                Protocol::Udp
            } else {
                Protocol::Tcp
            };
            Some(ProbeTarget {
                host: argv[argv.len() - 2].clone(),
                port: argv[argv.len() - 1].parse().ok()?,
                protocol,
            })
        }
        _ => None,
    }
}

/// Shell script running each job in turn and echoing its exit code
pub fn batch_script(jobs: &[Job]) -> String {
    jobs.iter()
        .enumerate()
        .map(|(index, job)| {
            let quoted: Vec<String> = job
                .client_command()
                .iter()
                .map(|arg| format!("'{}'", arg))
                .collect();
            format!(
                "{} >/dev/null 2>&1; echo \"{} {} $?\"",
                quoted.join(" "),
                BATCH_RESULT_MARKER,
                index
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split a batch script back into `(index, argv)` pairs
pub fn parse_batch_script(script: &str) -> Vec<(usize, Vec<String>)> {
    script
        .lines()
        .filter_map(|line| {
            let (command, rest) = line.split_once(" >/dev/null 2>&1; echo \"")?;
            let index = rest
                .strip_prefix(BATCH_RESULT_MARKER)?
                .split_whitespace()
                .next()?
                .parse()
                .ok()?;
            let argv = command
                .split_whitespace()
                .map(|arg| arg.trim_matches('\'').to_string())
                .collect();
            Some((index, argv))
        })
        .collect()
}

/// Exit codes by job index from batch script output
pub fn parse_batch_output(stdout: &str) -> BTreeMap<usize, i32> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.strip_prefix(BATCH_RESULT_MARKER)?.split_whitespace();
            let index = fields.next()?.parse().ok()?;
            let code = fields.next()?.parse().ok()?;
            Some((index, code))
        })
        .collect()
}

/// Jobs for one probe, split by whether the port could be resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jobs {
    pub valid: Vec<Job>,
    pub bad_named_port: Vec<Job>,
    pub bad_port_protocol: Vec<Job>,
}

impl Jobs {
    pub fn extend(&mut self, other: Jobs) {
        self.valid.extend(other.valid);
        self.bad_named_port.extend(other.bad_named_port);
        self.bad_port_protocol.extend(other.bad_port_protocol);
    }

    pub fn len(&self) -> usize {
        self.valid.len() + self.bad_named_port.len() + self.bad_port_protocol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn probe_key(port: &PortValue, protocol: Protocol) -> String {
    format!("{}/{}", port, protocol)
}

impl Resources {
    /// Jobs from every pod to every pod and external IP on one port and protocol
    pub fn get_jobs_for_port_protocol(&self, port: &PortValue, protocol: Protocol) -> Jobs {
        let key = probe_key(port, protocol);
        let mut jobs = Jobs::default();

        for from in &self.pods {
            let Some(source) = self.job_source(from, protocol) else {
                continue;
            };

            for to in &self.pods {
                let ns_labels = self.namespace_labels(&to.namespace).cloned().unwrap_or_default();
                let mut job = Job {
                    source: source.clone(),
                    destination: JobDestination::from_pod(to, ns_labels),
                    resolved_port: 0,
                    resolved_port_name: None,
                    protocol,
                    probe_key: key.clone(),
                };
                match port {
                    PortValue::Number(number) => {
                        job.resolved_port = *number;
                        match to.resolve_numbered_port(*number, protocol) {
                            Some(container) => {
                                job.resolved_port_name = container.port_name.clone();
                                jobs.valid.push(job);
                            }
                            None => jobs.bad_port_protocol.push(job),
                        }
                    }
                    PortValue::Name(name) => match to.resolve_named_port(name) {
                        Some(container) => {
                            job.resolved_port = container.port;
                            job.resolved_port_name = Some(name.clone());
                            if container.protocol == protocol {
                                jobs.valid.push(job);
                            } else {
                                jobs.bad_port_protocol.push(job);
                            }
                        }
                        None => jobs.bad_named_port.push(job),
                    },
                }
            }

            for ip in &self.external_ips {
                let mut job = Job {
                    source: source.clone(),
                    destination: JobDestination::External { ip: ip.clone() },
                    resolved_port: 0,
                    resolved_port_name: None,
                    protocol,
                    probe_key: key.clone(),
                };
                match port {
                    PortValue::Number(number) => {
                        job.resolved_port = *number;
                        jobs.valid.push(job);
                    }
                    PortValue::Name(_) => jobs.bad_named_port.push(job),
                }
            }
        }

        jobs
    }

    /// Jobs for every (port, protocol) some container serves
    pub fn get_jobs_all_available_servers(&self) -> Jobs {
        let mut jobs = Jobs::default();
        for (port, protocol) in self.served_ports() {
            jobs.extend(self.get_jobs_for_port_protocol(&PortValue::Number(port), protocol));
        }
        jobs
    }

    /// Source side of a job: the pod's container serving `protocol`, or its first container
    fn job_source(&self, pod: &Pod, protocol: Protocol) -> Option<JobSource> {
        let container = pod
            .containers
            .iter()
            .find(|c| c.protocol == protocol)
            .or_else(|| pod.containers.first())?;
        Some(JobSource {
            namespace: pod.namespace.clone(),
            namespace_labels: self
                .namespace_labels(&pod.namespace)
                .cloned()
                .unwrap_or_default(),
            pod: pod.name.clone(),
            pod_labels: pod.labels.clone(),
            container: container.name.clone(),
            ip: pod.ip.clone(),
        })
    }
}
