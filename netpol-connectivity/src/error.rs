//! Error types for test case execution and configuration

use netpol_core::PolicyError;
use netpol_probe::ProbeError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConnectivityError>;

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("Action precondition failed: {0}")]
    ActionPrecondition(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid port: {port}")]
    InvalidPort { port: u32 },

    #[error("Invalid protocol: {protocol}")]
    InvalidProtocol { protocol: String },

    #[error("{kind} list is empty")]
    Empty { kind: &'static str },

    #[error("Duplicate {kind}: {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("Unknown tag or category: {tag}")]
    UnknownTag { tag: String },

    #[error("Invalid IP address: {ip}")]
    InvalidIp { ip: String },

    #[error("worker_count must be at least 1")]
    NoWorkers,
}
