//! Probe verdicts and the truth tables built from them

use crate::job::Job;
use crate::resources::Resources;
use crate::table::TruthTable;
use netpol_core::{PortValue, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Outcome of a single connection check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Connectivity {
    Unknown,
    CheckFailed,
    Blocked,
    Allowed,
    InvalidNamedPort,
    InvalidPortProtocol,
}

impl Connectivity {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Connectivity::Allowed
        } else {
            Connectivity::Blocked
        }
    }

    /// Single-character table cell
    pub fn short(&self) -> &'static str {
        match self {
            Connectivity::Unknown => "?",
            Connectivity::CheckFailed => "!",
            Connectivity::Blocked => "X",
            Connectivity::Allowed => ".",
            Connectivity::InvalidNamedPort => "N",
            Connectivity::InvalidPortProtocol => "P",
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Connectivity::Unknown => "unknown",
            Connectivity::CheckFailed => "check failed",
            Connectivity::Blocked => "blocked",
            Connectivity::Allowed => "allowed",
            Connectivity::InvalidNamedPort => "invalid named port",
            Connectivity::InvalidPortProtocol => "invalid port protocol",
        };
        f.write_str(s)
    }
}

/// Verdict for one job. Simulated results carry per-direction verdicts;
/// cluster results only know the combined outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub ingress: Option<Connectivity>,
    pub egress: Option<Connectivity>,
    pub combined: Connectivity,
}

impl Verdict {
    pub fn combined(combined: Connectivity) -> Self {
        Self {
            ingress: None,
            egress: None,
            combined,
        }
    }

    /// Verdict for a job whose port never resolved
    pub fn invalid(connectivity: Connectivity) -> Self {
        Self {
            ingress: Some(connectivity),
            egress: None,
            combined: connectivity,
        }
    }

    pub fn simulated(ingress_allowed: bool, egress_allowed: bool) -> Self {
        Self {
            ingress: Some(Connectivity::from_allowed(ingress_allowed)),
            egress: Some(Connectivity::from_allowed(egress_allowed)),
            combined: Connectivity::from_allowed(ingress_allowed && egress_allowed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job: Job,
    pub verdict: Verdict,
}

/// Which ports and protocols a probe sweeps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum ProbeConfig {
    AllAvailable,
    PortProtocol { port: PortValue, protocol: Protocol },
}

impl ProbeConfig {
    pub fn port_protocol(port: PortValue, protocol: Protocol) -> Self {
        ProbeConfig::PortProtocol { port, protocol }
    }
}

impl fmt::Display for ProbeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeConfig::AllAvailable => f.write_str("all available ports"),
            ProbeConfig::PortProtocol { port, protocol } => write!(f, "{}/{}", port, protocol),
        }
    }
}

/// Cell contents: verdicts keyed by port-protocol label
pub type ProbeCell = BTreeMap<String, Verdict>;

/// Results of one probe over every (source, destination) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub table: TruthTable<ProbeCell>,
}

impl Probe {
    /// An empty table shaped by the resources: pods as rows, pods then external IPs as columns
    pub fn new(resources: &Resources) -> Self {
        Self {
            table: TruthTable::new(
                resources.sorted_pod_keys(),
                resources.sorted_destination_keys(),
            ),
        }
    }

    pub fn from_results(resources: &Resources, results: &[JobResult]) -> Self {
        let mut probe = Probe::new(resources);
        for result in results {
            probe.set(&result.job, result.verdict);
        }
        probe
    }

    pub fn set(&mut self, job: &Job, verdict: Verdict) {
        self.table
            .get_or_insert_with(&job.from_key(), &job.to_key(), BTreeMap::new)
            .insert(job.probe_key.clone(), verdict);
    }

    pub fn get(&self, from: &str, to: &str, probe_key: &str) -> Option<&Verdict> {
        self.table.get(from, to)?.get(probe_key)
    }

    pub fn probe_keys(&self) -> BTreeSet<String> {
        self.table
            .iter()
            .filter_map(|(_, _, cell)| cell)
            .flat_map(|cell| cell.keys().cloned())
            .collect()
    }

    /// Number of cells per combined verdict
    pub fn counts(&self) -> BTreeMap<Connectivity, usize> {
        let mut counts = BTreeMap::new();
        for (_, _, cell) in self.table.iter() {
            for verdict in cell.into_iter().flat_map(|c| c.values()) {
                *counts.entry(verdict.combined).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Render one grid per port-protocol label using `select` to pick the verdict shown
    pub fn render_with(&self, select: impl Fn(&Verdict) -> Option<Connectivity>) -> String {
        let mut out = String::new();
        for key in self.probe_keys() {
            out.push_str(&format!("{}:\n", key));
            out.push_str(&self.table.render(|cell| {
                cell.and_then(|c| c.get(&key))
                    .and_then(&select)
                    .unwrap_or(Connectivity::Unknown)
                    .short()
                    .to_string()
            }));
            out.push('\n');
        }
        out
    }

    pub fn render_combined(&self) -> String {
        self.render_with(|v| Some(v.combined))
    }

    pub fn render_ingress(&self) -> String {
        self.render_with(|v| v.ingress)
    }

    pub fn render_egress(&self) -> String {
        self.render_with(|v| v.egress)
    }
}
