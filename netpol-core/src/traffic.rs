//! Traffic tuples evaluated against a compiled policy

use crate::protocol::Protocol;
use crate::selector::Labels;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Identity of a pod endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalPeer {
    #[serde(default)]
    pub pod_labels: Labels,
    #[serde(default)]
    pub namespace_labels: Labels,
    pub namespace: String,
}

/// One side of a connection: a pod (with optional IP) or a bare external IP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPeer {
    #[serde(default)]
    pub internal: Option<InternalPeer>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

impl TrafficPeer {
    pub fn internal(
        namespace: impl Into<String>,
        namespace_labels: Labels,
        pod_labels: Labels,
        ip: Option<IpAddr>,
    ) -> Self {
        Self {
            internal: Some(InternalPeer {
                pod_labels,
                namespace_labels,
                namespace: namespace.into(),
            }),
            ip,
        }
    }

    pub fn external(ip: IpAddr) -> Self {
        Self {
            internal: None,
            ip: Some(ip),
        }
    }

    pub fn is_external(&self) -> bool {
        self.internal.is_none()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.internal.as_ref().map(|i| i.namespace.as_str())
    }
}

impl fmt::Display for TrafficPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.internal, &self.ip) {
            (Some(internal), ip) => {
                let labels: Vec<String> = internal
                    .pod_labels
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                write!(f, "{}/[{}]", internal.namespace, labels.join(","))?;
                if let Some(ip) = ip {
                    write!(f, " ({})", ip)?;
                }
                Ok(())
            }
            (None, Some(ip)) => write!(f, "{}", ip),
            (None, None) => f.write_str("<unknown peer>"),
        }
    }
}

/// A connection attempt with its port already resolved against the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traffic {
    pub source: TrafficPeer,
    pub destination: TrafficPeer,
    pub resolved_port: u16,
    #[serde(default)]
    pub resolved_port_name: Option<String>,
    pub protocol: Protocol,
}

impl fmt::Display for Traffic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} on {}", self.source, self.destination, self.resolved_port)?;
        if let Some(name) = &self.resolved_port_name {
            write!(f, " ({})", name)?;
        }
        write!(f, "/{}", self.protocol)
    }
}
