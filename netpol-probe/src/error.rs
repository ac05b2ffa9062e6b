//! Error types for cluster access and probing

use netpol_core::PolicyError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Cluster API error: {0}")]
    Cluster(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Remote command failed to start in {pod}: {message}")]
    Transport { pod: String, message: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Timed out waiting for {what}")]
    Timeout { what: String },

    #[error("Cluster state does not match resource model: {0}")]
    StateMismatch(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl ProbeError {
    /// Missing object, from the mock or a 404 from the API server
    pub fn is_not_found(&self) -> bool {
        match self {
            ProbeError::NotFound { .. } => true,
            ProbeError::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ProbeError::NotFound {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(ProbeError::not_found("pod", "x/a").is_not_found());
        let gone = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "pods \"a\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(ProbeError::from(gone).is_not_found());
        let conflict = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "conflict".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        });
        assert!(!ProbeError::from(conflict).is_not_found());
        assert!(!ProbeError::Timeout { what: "pods".to_string() }.is_not_found());
    }
}
