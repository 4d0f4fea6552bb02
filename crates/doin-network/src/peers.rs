use crate::messages::PeerDiscoveryPayload;
use chrono::{DateTime, Utc};
use doin_types::PeerId;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// Protocol errors tolerated from a peer before it is downgraded.
const DEFAULT_DOWNGRADE_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub addresses: Vec<String>,
    pub domains: Vec<String>,
    pub roles: Vec<String>,
    pub untrusted: bool,
    pub protocol_errors: u32,
    pub last_seen: DateTime<Utc>,
}

impl PeerInfo {
    pub fn is_evaluator(&self) -> bool {
        self.roles.iter().any(|r| r == "evaluator")
    }
}

/// Known peers, their capabilities and standing.
#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, PeerInfo>,
    downgrade_threshold: u32,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            downgrade_threshold: DEFAULT_DOWNGRADE_THRESHOLD,
        }
    }

    pub fn upsert_from_discovery(&mut self, payload: &PeerDiscoveryPayload) {
        let entry = self
            .peers
            .entry(payload.peer_id)
            .or_insert_with(|| PeerInfo {
                peer_id: payload.peer_id,
                addresses: Vec::new(),
                domains: Vec::new(),
                roles: Vec::new(),
                untrusted: false,
                protocol_errors: 0,
                last_seen: Utc::now(),
            });
        entry.addresses = payload.addresses.clone();
        entry.domains = payload.domains.clone();
        entry.roles = payload.roles.clone();
        entry.last_seen = Utc::now();
    }

    pub fn touch(&mut self, peer_id: &PeerId) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.last_seen = Utc::now();
        }
    }

    /// Count a protocol/economic violation against a peer. Past the
    /// threshold the peer is downgraded to untrusted; returns true when the
    /// downgrade happens.
    pub fn record_protocol_error(&mut self, peer_id: &PeerId) -> bool {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return false;
        };
        peer.protocol_errors += 1;
        if !peer.untrusted && peer.protocol_errors >= self.downgrade_threshold {
            peer.untrusted = true;
            warn!(peer = %peer_id, errors = peer.protocol_errors, "Peer downgraded");
            return true;
        }
        false
    }

    /// Immediately distrust a peer (served an invalid block).
    pub fn mark_untrusted(&mut self, peer_id: &PeerId) {
        let entry = self.peers.entry(*peer_id).or_insert_with(|| PeerInfo {
            peer_id: *peer_id,
            addresses: Vec::new(),
            domains: Vec::new(),
            roles: Vec::new(),
            untrusted: false,
            protocol_errors: 0,
            last_seen: Utc::now(),
        });
        entry.untrusted = true;
        info!(peer = %peer_id, "Peer marked untrusted");
    }

    pub fn is_untrusted(&self, peer_id: &PeerId) -> bool {
        self.peers.get(peer_id).map(|p| p.untrusted).unwrap_or(false)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerInfo> {
        self.peers.get(peer_id)
    }

    pub fn trusted_peers(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| !p.untrusted)
            .map(|p| p.peer_id)
            .collect()
    }

    /// Registered evaluators for a domain (trusted only).
    pub fn evaluators_for_domain(&self, domain_id: &str) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| {
                !p.untrusted && p.is_evaluator() && p.domains.iter().any(|d| d == domain_id)
            })
            .map(|p| p.peer_id)
            .collect()
    }

    pub fn all(&self) -> Vec<&PeerInfo> {
        self.peers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
