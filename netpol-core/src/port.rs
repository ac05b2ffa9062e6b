//! Port and protocol matching

use crate::error::{PolicyError, Result};
use crate::protocol::Protocol;
use k8s_openapi::api::networking::v1::NetworkPolicyPort;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A port given either by number or by container port name.
///
/// Variant order matters: names sort before numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Name(String),
    Number(u16),
}

impl PortValue {
    /// Validate an API port value: numbers must be in 1..=65535
    pub fn from_api(port: &IntOrString) -> Result<Self> {
        match port {
            IntOrString::Int(n) => u16::try_from(*n)
                .ok()
                .filter(|n| *n >= 1)
                .map(PortValue::Number)
                .ok_or_else(|| PolicyError::InvalidPort {
                    port: n.to_string(),
                }),
            IntOrString::String(s) if s.is_empty() => Err(PolicyError::InvalidPort {
                port: s.clone(),
            }),
            IntOrString::String(s) => Ok(PortValue::Name(s.clone())),
        }
    }

    pub fn to_api(&self) -> IntOrString {
        match self {
            PortValue::Name(s) => IntOrString::String(s.clone()),
            PortValue::Number(n) => IntOrString::Int(i32::from(*n)),
        }
    }
}

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortValue::Name(s) => f.write_str(s),
            PortValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// One `(port?, protocol)` entry; a missing port means every port on the protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortProtocolMatcher {
    pub port: Option<PortValue>,
    pub protocol: Protocol,
}

impl PortProtocolMatcher {
    pub fn allows(&self, port: u16, port_name: Option<&str>, protocol: Protocol) -> bool {
        if self.protocol != protocol {
            return false;
        }
        match &self.port {
            None => true,
            Some(PortValue::Number(n)) => *n == port,
            Some(PortValue::Name(name)) => port_name == Some(name.as_str()),
        }
    }
}

impl fmt::Display for PortProtocolMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            None => write!(f, "all ports on {}", self.protocol),
            Some(port) => write!(f, "{}/{}", port, self.protocol),
        }
    }
}

/// Inclusive numeric range on one protocol, from `endPort`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRangeMatcher {
    pub from: u16,
    pub to: u16,
    pub protocol: Protocol,
}

impl PortRangeMatcher {
    pub fn new(from: u16, to: u16, protocol: Protocol) -> Result<Self> {
        if from == 0 || from > to {
            return Err(PolicyError::InvalidPort {
                port: format!("{}-{}", from, to),
            });
        }
        Ok(Self { from, to, protocol })
    }

    pub fn allows(&self, port: u16, protocol: Protocol) -> bool {
        self.protocol == protocol && self.from <= port && port <= self.to
    }

    fn covers(&self, other: &PortRangeMatcher) -> bool {
        self.protocol == other.protocol && self.from <= other.from && other.to <= self.to
    }
}

impl fmt::Display for PortRangeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}/{}", self.from, self.to, self.protocol)
    }
}

/// Explicit set of ports and ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecificPortMatcher {
    pub ports: Vec<PortProtocolMatcher>,
    pub ranges: Vec<PortRangeMatcher>,
}

impl SpecificPortMatcher {
    pub fn allows(&self, port: u16, port_name: Option<&str>, protocol: Protocol) -> bool {
        self.ports.iter().any(|p| p.allows(port, port_name, protocol))
            || self.ranges.iter().any(|r| r.allows(port, protocol))
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty() && self.ranges.is_empty()
    }

    /// Sort and deduplicate: nil ports first, then names, then numbers
    fn normalize(&mut self) {
        self.ports.sort();
        self.ports.dedup();
        self.ranges.sort();
        self.ranges.dedup();
    }

    fn covers_port(&self, port: &PortProtocolMatcher) -> bool {
        self.ports.iter().any(|p| {
            p == port || (p.port.is_none() && p.protocol == port.protocol)
        }) || match &port.port {
            Some(PortValue::Number(n)) => self.ranges.iter().any(|r| r.allows(*n, port.protocol)),
            _ => false,
        }
    }

    fn covers_range(&self, range: &PortRangeMatcher) -> bool {
        self.ports
            .iter()
            .any(|p| p.port.is_none() && p.protocol == range.protocol)
            || self.ranges.iter().any(|r| r.covers(range))
    }
}

/// Port/protocol condition of a peer matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortMatcher {
    /// Any port on any protocol
    All,
    Specific(SpecificPortMatcher),
}

impl PortMatcher {
    /// Build from a rule's `ports` list; an empty list matches everything
    pub fn from_api(ports: &[NetworkPolicyPort]) -> Result<Self> {
        if ports.is_empty() {
            return Ok(PortMatcher::All);
        }

        let mut matcher = SpecificPortMatcher::default();
        for port in ports {
            let protocol = Protocol::from_api(port.protocol.as_deref())?;
            let value = port.port.as_ref().map(PortValue::from_api).transpose()?;

            match (value, port.end_port) {
                (value, None) => matcher.ports.push(PortProtocolMatcher {
                    port: value,
                    protocol,
                }),
                (Some(PortValue::Number(from)), Some(end)) => {
                    let to = u16::try_from(end).map_err(|_| PolicyError::InvalidPort {
                        port: end.to_string(),
                    })?;
                    matcher.ranges.push(PortRangeMatcher::new(from, to, protocol)?);
                }
                (_, Some(end)) => {
                    return Err(PolicyError::InvalidPort {
                        port: format!("endPort {} requires a numeric port", end),
                    })
                }
            }
        }
        matcher.normalize();

        Ok(PortMatcher::Specific(matcher))
    }

    pub fn specific(ports: Vec<PortProtocolMatcher>, ranges: Vec<PortRangeMatcher>) -> Self {
        let mut matcher = SpecificPortMatcher { ports, ranges };
        matcher.normalize();
        PortMatcher::Specific(matcher)
    }

    pub fn allows(&self, port: u16, port_name: Option<&str>, protocol: Protocol) -> bool {
        match self {
            PortMatcher::All => true,
            PortMatcher::Specific(specific) => specific.allows(port, port_name, protocol),
        }
    }

    /// Union of two matchers; `All` absorbs anything
    pub fn combine(self, other: PortMatcher) -> PortMatcher {
        match (self, other) {
            (PortMatcher::All, _) | (_, PortMatcher::All) => PortMatcher::All,
            (PortMatcher::Specific(mut a), PortMatcher::Specific(b)) => {
                a.ports.extend(b.ports);
                a.ranges.extend(b.ranges);
                a.normalize();
                PortMatcher::Specific(a)
            }
        }
    }

    /// Remove everything `other` already covers.
    ///
    /// Returns `None` when nothing of `self` remains.
    pub fn subtract(&self, other: &PortMatcher) -> Option<PortMatcher> {
        match (self, other) {
            (_, PortMatcher::All) => None,
            (PortMatcher::All, PortMatcher::Specific(_)) => Some(PortMatcher::All),
            (PortMatcher::Specific(a), PortMatcher::Specific(b)) => {
                let remainder = SpecificPortMatcher {
                    ports: a
                        .ports
                        .iter()
                        .filter(|p| !b.covers_port(p))
                        .cloned()
                        .collect(),
                    ranges: a
                        .ranges
                        .iter()
                        .filter(|r| !b.covers_range(r))
                        .cloned()
                        .collect(),
                };
                if remainder.is_empty() {
                    None
                } else {
                    Some(PortMatcher::Specific(remainder))
                }
            }
        }
    }

    /// Canonical key, used to group identical port conditions
    pub fn primary_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PortMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortMatcher::All => f.write_str("all ports and protocols"),
            PortMatcher::Specific(specific) => {
                let parts: Vec<String> = specific
                    .ports
                    .iter()
                    .map(|p| p.to_string())
                    .chain(specific.ranges.iter().map(|r| r.to_string()))
                    .collect();
                f.write_str(&parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn np_port(port: Option<IntOrString>, protocol: Option<&str>, end: Option<i32>) -> NetworkPolicyPort {
        NetworkPolicyPort {
            port,
            protocol: protocol.map(|p| p.to_string()),
            end_port: end,
        }
    }

    #[test]
    fn test_empty_ports_match_all() {
        let matcher = PortMatcher::from_api(&[]).unwrap();
        assert_eq!(matcher, PortMatcher::All);
        assert!(matcher.allows(1, None, Protocol::Sctp));
    }

    #[test]
    fn test_protocol_only() {
        let matcher = PortMatcher::from_api(&[np_port(None, Some("SCTP"), None)]).unwrap();
        assert!(matcher.allows(103, None, Protocol::Sctp));
        assert!(!matcher.allows(103, None, Protocol::Tcp));
    }

    #[test]
    fn test_numeric_and_named() {
        let matcher = PortMatcher::from_api(&[
            np_port(Some(IntOrString::Int(80)), None, None),
            np_port(Some(IntOrString::String("port-hello".to_string())), Some("UDP"), None),
        ])
        .unwrap();

        assert!(matcher.allows(80, None, Protocol::Tcp));
        assert!(!matcher.allows(81, None, Protocol::Tcp));
        assert!(!matcher.allows(80, None, Protocol::Udp));
        assert!(matcher.allows(9000, Some("port-hello"), Protocol::Udp));
        assert!(!matcher.allows(9000, Some("port-hello"), Protocol::Tcp));
    }

    #[test]
    fn test_range() {
        let matcher =
            PortMatcher::from_api(&[np_port(Some(IntOrString::Int(80)), Some("TCP"), Some(90))])
                .unwrap();
        assert!(matcher.allows(80, None, Protocol::Tcp));
        assert!(matcher.allows(90, None, Protocol::Tcp));
        assert!(!matcher.allows(91, None, Protocol::Tcp));
        assert!(!matcher.allows(85, None, Protocol::Udp));
    }

    #[test]
    fn test_invalid_ports() {
        assert!(PortMatcher::from_api(&[np_port(Some(IntOrString::Int(0)), None, None)]).is_err());
        assert!(PortMatcher::from_api(&[np_port(Some(IntOrString::Int(70000)), None, None)]).is_err());
        assert!(PortMatcher::from_api(&[np_port(Some(IntOrString::Int(90)), None, Some(80))]).is_err());
        assert!(PortMatcher::from_api(&[np_port(
            Some(IntOrString::String("http".to_string())),
            None,
            Some(80)
        )])
        .is_err());
        assert!(PortMatcher::from_api(&[np_port(None, Some("ICMP"), None)]).is_err());
    }

    #[test]
    fn test_combine_sort_order() {
        let a = PortMatcher::specific(
            vec![PortProtocolMatcher {
                port: Some(PortValue::Number(80)),
                protocol: Protocol::Tcp,
            }],
            vec![],
        );
        let b = PortMatcher::specific(
            vec![
                PortProtocolMatcher {
                    port: Some(PortValue::Name("dns".to_string())),
                    protocol: Protocol::Udp,
                },
                PortProtocolMatcher {
                    port: None,
                    protocol: Protocol::Sctp,
                },
            ],
            vec![],
        );

        let PortMatcher::Specific(combined) = a.combine(b) else {
            panic!("expected specific matcher");
        };
        assert_eq!(combined.ports[0].port, None);
        assert_eq!(combined.ports[1].port, Some(PortValue::Name("dns".to_string())));
        assert_eq!(combined.ports[2].port, Some(PortValue::Number(80)));
    }

    #[test]
    fn test_combine_all_absorbs() {
        let specific = PortMatcher::specific(
            vec![PortProtocolMatcher {
                port: Some(PortValue::Number(80)),
                protocol: Protocol::Tcp,
            }],
            vec![],
        );
        assert_eq!(specific.clone().combine(PortMatcher::All), PortMatcher::All);
        assert_eq!(PortMatcher::All.combine(specific), PortMatcher::All);
    }

    #[test]
    fn test_subtract() {
        let tcp80 = PortProtocolMatcher {
            port: Some(PortValue::Number(80)),
            protocol: Protocol::Tcp,
        };
        let udp53 = PortProtocolMatcher {
            port: Some(PortValue::Number(53)),
            protocol: Protocol::Udp,
        };
        let a = PortMatcher::specific(vec![tcp80.clone(), udp53.clone()], vec![]);

        assert_eq!(a.subtract(&PortMatcher::All), None);
        assert_eq!(PortMatcher::All.subtract(&a), Some(PortMatcher::All));

        let all_tcp = PortMatcher::specific(
            vec![PortProtocolMatcher {
                port: None,
                protocol: Protocol::Tcp,
            }],
            vec![],
        );
        assert_eq!(
            a.subtract(&all_tcp),
            Some(PortMatcher::specific(vec![udp53.clone()], vec![]))
        );

        let range = PortMatcher::specific(vec![], vec![PortRangeMatcher::new(50, 60, Protocol::Udp).unwrap()]);
        assert_eq!(a.subtract(&range), Some(PortMatcher::specific(vec![tcp80], vec![])));

        assert_eq!(a.subtract(&a), None);
    }
}
