//! Configuration validation

use super::schema::{ClusterConfig, Config, GeneratorConfig, InterpreterConfig};
use crate::error::{Result, ValidationError};
use netpol_core::Protocol;
use std::collections::HashSet;
use std::net::IpAddr;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate entire configuration
    pub fn validate(config: &Config) -> Result<()> {
        Self::validate_interpreter(&config.interpreter)?;
        Self::validate_cluster(&config.cluster)?;
        Self::validate_generator(&config.generator)?;
        Ok(())
    }

    fn validate_interpreter(interpreter: &InterpreterConfig) -> Result<()> {
        if interpreter.worker_count == 0 {
            return Err(ValidationError::NoWorkers.into());
        }
        Ok(())
    }

    fn validate_cluster(cluster: &ClusterConfig) -> Result<()> {
        Self::check_names("namespace", &cluster.namespaces)?;
        Self::check_names("pod", &cluster.pods)?;

        if cluster.ports.is_empty() {
            return Err(ValidationError::Empty { kind: "port" }.into());
        }
        for port in &cluster.ports {
            if !(1..=65535).contains(port) {
                return Err(ValidationError::InvalidPort { port: *port }.into());
            }
        }

        if cluster.protocols.is_empty() {
            return Err(ValidationError::Empty { kind: "protocol" }.into());
        }
        for protocol in &cluster.protocols {
            if protocol.parse::<Protocol>().is_err() {
                return Err(ValidationError::InvalidProtocol {
                    protocol: protocol.clone(),
                }
                .into());
            }
        }

        for ip in &cluster.external_ips {
            Self::check_ip(ip)?;
        }
        Ok(())
    }

    fn validate_generator(generator: &GeneratorConfig) -> Result<()> {
        for tag in generator.include.iter().chain(&generator.exclude) {
            if !netpol_generator::tags::is_known(tag) {
                return Err(ValidationError::UnknownTag { tag: tag.clone() }.into());
            }
        }
        if let Some(ip) = &generator.pod_ip {
            Self::check_ip(ip)?;
        }
        Ok(())
    }

    fn check_names(kind: &'static str, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Err(ValidationError::Empty { kind }.into());
        }
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name) {
                return Err(ValidationError::Duplicate {
                    kind,
                    name: name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn check_ip(ip: &str) -> Result<()> {
        ip.parse::<IpAddr>()
            .map(|_| ())
            .map_err(|_| ValidationError::InvalidIp { ip: ip.to_string() }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectivityError;

    fn validation_error(config: &Config) -> ValidationError {
        match ConfigValidator::validate(config) {
            Err(ConnectivityError::Validation(e)) => e,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_bad_ports_and_protocols() {
        let mut config = Config::default();
        config.cluster.ports = vec![80, 70000];
        assert_eq!(validation_error(&config), ValidationError::InvalidPort { port: 70000 });

        let mut config = Config::default();
        config.cluster.protocols = vec!["TCP".to_string(), "ICMP".to_string()];
        assert_eq!(
            validation_error(&config),
            ValidationError::InvalidProtocol {
                protocol: "ICMP".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        let mut config = Config::default();
        config.cluster.pods = vec!["a".to_string(), "a".to_string()];
        assert_eq!(
            validation_error(&config),
            ValidationError::Duplicate {
                kind: "pod",
                name: "a".to_string()
            }
        );

        let mut config = Config::default();
        config.cluster.namespaces.clear();
        assert_eq!(validation_error(&config), ValidationError::Empty { kind: "namespace" });
    }

    #[test]
    fn test_tags_and_ips() {
        let mut config = Config::default();
        config.generator.include = vec!["peer".to_string(), "port-named".to_string()];
        assert!(ConfigValidator::validate(&config).is_ok());

        config.generator.exclude = vec!["no-such-tag".to_string()];
        assert_eq!(
            validation_error(&config),
            ValidationError::UnknownTag {
                tag: "no-such-tag".to_string()
            }
        );

        let mut config = Config::default();
        config.cluster.external_ips = vec!["8.8.8.256".to_string()];
        assert!(matches!(validation_error(&config), ValidationError::InvalidIp { .. }));
    }

    #[test]
    fn test_zero_workers() {
        let mut config = Config::default();
        config.interpreter.worker_count = 0;
        assert_eq!(validation_error(&config), ValidationError::NoWorkers);
    }
}
