//! Resource model and connectivity probes
//!
//! Builds the pod/namespace model a test runs against, turns it into probe
//! jobs, and runs those jobs either by simulation against a compiled policy or
//! by executing client commands inside a cluster.

pub mod client;
pub mod error;
pub mod job;
pub mod kube_client;
pub mod mock;
pub mod pool;
pub mod probe;
pub mod resources;
pub mod runner;
pub mod table;

// Re-export commonly used types
pub use client::{ClusterClient, ExecOutput};
pub use error::{ProbeError, Result};
pub use job::{Job, JobDestination, JobSource, Jobs};
pub use kube_client::KubeClusterClient;
pub use mock::{ExecMode, MockClusterClient};
pub use probe::{Connectivity, JobResult, Probe, ProbeCell, ProbeConfig, Verdict};
pub use resources::{Container, Pod, Resources};
pub use runner::{ClusterRunnerOptions, JobRunner, Runner};
pub use table::TruthTable;
