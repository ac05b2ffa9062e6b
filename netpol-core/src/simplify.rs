//! Peer matcher simplification
//!
//! Collapses a target's peer list into an equivalent, shorter one. The result
//! allows exactly the same traffic as the input.

use crate::peer::{IpPeerMatcher, PeerMatcher, PodPeerMatcher};
use crate::port::PortMatcher;
use indexmap::IndexMap;

pub fn simplify(peers: Vec<PeerMatcher>) -> Vec<PeerMatcher> {
    if peers.iter().any(|p| matches!(p, PeerMatcher::All)) {
        return vec![PeerMatcher::All];
    }

    let mut all_peers_port: Option<PortMatcher> = None;
    let mut ip_peers: IndexMap<String, IpPeerMatcher> = IndexMap::new();
    let mut pod_peers: IndexMap<String, PodPeerMatcher> = IndexMap::new();

    for peer in peers {
        match peer {
            PeerMatcher::All | PeerMatcher::None => {}
            PeerMatcher::PortsForAllPeers(port) => {
                all_peers_port = Some(match all_peers_port.take() {
                    Some(existing) => existing.combine(port),
                    None => port,
                });
            }
            PeerMatcher::IpBlock(m) => {
                let key = m.ip_block.primary_key();
                match ip_peers.get_mut(&key) {
                    Some(existing) => {
                        existing.port = existing.port.clone().combine(m.port);
                    }
                    None => {
                        ip_peers.insert(key, m);
                    }
                }
            }
            PeerMatcher::Pod(m) => {
                let key = m.peer_key();
                match pod_peers.get_mut(&key) {
                    Some(existing) => {
                        existing.port = existing.port.clone().combine(m.port);
                    }
                    None => {
                        pod_peers.insert(key, m);
                    }
                }
            }
        }
    }

    if all_peers_port == Some(PortMatcher::All) {
        return vec![PeerMatcher::All];
    }

    let mut simplified = Vec::new();

    for (_, mut m) in ip_peers {
        if let Some(covered) = &all_peers_port {
            match m.port.subtract(covered) {
                Some(remainder) => m.port = remainder,
                None => continue,
            }
        }
        simplified.push(PeerMatcher::IpBlock(m));
    }

    for (_, mut m) in pod_peers {
        if let Some(covered) = &all_peers_port {
            match m.port.subtract(covered) {
                Some(remainder) => m.port = remainder,
                None => continue,
            }
        }
        simplified.push(PeerMatcher::Pod(m));
    }

    if let Some(port) = all_peers_port {
        simplified.insert(0, PeerMatcher::PortsForAllPeers(port));
    }

    if simplified.is_empty() {
        simplified.push(PeerMatcher::None);
    }

    simplified
}
