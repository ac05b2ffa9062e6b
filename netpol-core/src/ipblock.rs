//! CIDR membership with exceptions

use crate::error::{PolicyError, Result};
use ipnet::IpNet;
use k8s_openapi::api::networking::v1::IPBlock;
use std::fmt;
use std::net::IpAddr;

/// Matcher for an `ipBlock` peer: a CIDR minus a set of excepted CIDRs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpBlock {
    cidr: IpNet,
    except: Vec<IpNet>,
}

impl IpBlock {
    /// Create a block from CIDR strings, rejecting malformed notation
    pub fn new(cidr: &str, except: &[String]) -> Result<Self> {
        let cidr = parse_cidr(cidr)?;
        let mut except = except
            .iter()
            .map(|e| parse_cidr(e))
            .collect::<Result<Vec<_>>>()?;
        except.sort();
        except.dedup();
        Ok(Self { cidr, except })
    }

    /// Build from the API representation
    pub fn from_api(block: &IPBlock) -> Result<Self> {
        Self::new(&block.cidr, block.except.as_deref().unwrap_or_default())
    }

    pub fn cidr(&self) -> &IpNet {
        &self.cidr
    }

    pub fn except(&self) -> &[IpNet] {
        &self.except
    }

    /// IP is in the CIDR and in none of the exceptions
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.cidr.contains(&ip) && !self.except.iter().any(|net| net.contains(&ip))
    }

    /// Parse an IP string and check membership
    pub fn contains_str(&self, ip: &str) -> Result<bool> {
        Ok(self.contains(parse_ip(ip)?))
    }

    /// Deterministic key used to group equivalent blocks
    pub fn primary_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for IpBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cidr)?;
        if !self.except.is_empty() {
            let except: Vec<String> = self.except.iter().map(|e| e.to_string()).collect();
            write!(f, " except [{}]", except.join(", "))?;
        }
        Ok(())
    }
}

/// Parse CIDR notation; host bits are truncated to the network address
pub fn parse_cidr(cidr: &str) -> Result<IpNet> {
    cidr.trim()
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|_| PolicyError::InvalidCidr {
            cidr: cidr.to_string(),
        })
}

pub fn parse_ip(ip: &str) -> Result<IpAddr> {
    ip.trim().parse::<IpAddr>().map_err(|_| PolicyError::InvalidIp {
        ip: ip.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_membership() {
        let block = IpBlock::new("192.168.242.0/24", &[]).unwrap();
        assert!(block.contains_str("192.168.242.249").unwrap());
        assert!(!block.contains_str("192.168.243.1").unwrap());
    }

    #[test]
    fn test_exceptions() {
        let block = IpBlock::new(
            "10.0.0.0/8",
            &["10.1.0.0/16".to_string(), "10.2.3.4/32".to_string()],
        )
        .unwrap();

        assert!(block.contains_str("10.3.0.1").unwrap());
        assert!(!block.contains_str("10.1.2.3").unwrap());
        assert!(!block.contains_str("10.2.3.4").unwrap());
        assert!(block.contains_str("10.2.3.5").unwrap());
    }

    #[test]
    fn test_ipv6_membership() {
        let block = IpBlock::new("fd00::/8", &["fd00:1::/32".to_string()]).unwrap();
        assert!(block.contains_str("fd00:2::1").unwrap());
        assert!(!block.contains_str("fd00:1::1").unwrap());
        // families never cross
        assert!(!block.contains_str("10.0.0.1").unwrap());
    }

    #[test]
    fn test_host_bits_are_truncated() {
        let block = IpBlock::new("192.168.1.77/24", &[]).unwrap();
        assert_eq!(block.cidr().to_string(), "192.168.1.0/24");
        assert!(block.contains_str("192.168.1.1").unwrap());
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(
            IpBlock::new("not-a-cidr", &[]),
            Err(PolicyError::InvalidCidr { .. })
        ));
        assert!(matches!(
            IpBlock::new("10.0.0.0/8", &["10.0.0.0/99".to_string()]),
            Err(PolicyError::InvalidCidr { .. })
        ));
        let block = IpBlock::new("10.0.0.0/8", &[]).unwrap();
        assert!(matches!(
            block.contains_str("10.0.0"),
            Err(PolicyError::InvalidIp { .. })
        ));
    }
}
