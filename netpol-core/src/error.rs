//! Error types for policy compilation and input decoding

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Malformed network policy {policy}: {reason}")]
    MalformedPolicy { policy: String, reason: String },

    #[error("Network policy {policy} is missing policyTypes")]
    MissingPolicyTypes { policy: String },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Invalid IP address: {ip}")]
    InvalidIp { ip: String },

    #[error("Invalid protocol: {protocol}")]
    InvalidProtocol { protocol: String },

    #[error("Invalid port: {port}")]
    InvalidPort { port: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PolicyError {
    pub(crate) fn malformed(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::MalformedPolicy {
            policy: policy.into(),
            reason: reason.into(),
        }
    }
}
