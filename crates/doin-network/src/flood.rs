//! Controlled flooding with deduplication.
//!
//! Every node keeps a bounded cache of recently seen message ids. A known
//! id is dropped; an unknown one is validated, delivered locally, and
//! forwarded to all peers except the sender with `ttl − 1`.

use crate::envelope::Envelope;
use crate::messages::Payload;
use doin_crypto::Keypair;
use doin_types::{MessageId, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct FloodConfig {
    /// Dedup cache capacity.
    pub cache_entries: usize,
    /// Dedup entry lifetime.
    pub cache_ttl: Duration,
    /// Hop budget for originated messages.
    pub default_ttl: u8,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            cache_entries: 16_384,
            cache_ttl: Duration::from_secs(600),
            default_ttl: crate::envelope::DEFAULT_TTL,
        }
    }
}

struct DedupCache {
    entries: HashMap<MessageId, Instant>,
    capacity: usize,
    ttl: Duration,
}

impl DedupCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Insert an id; returns false if it was already present (and fresh).
    fn insert(&mut self, id: MessageId) -> bool {
        let now = Instant::now();
        self.entries
            .retain(|_, seen| now.duration_since(*seen) < self.ttl);

        if self.entries.contains_key(&id) {
            return false;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, seen)| **seen)
                .map(|(id, _)| *id)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(id, now);
        true
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// What to do with an incoming envelope.
#[derive(Debug)]
pub enum FloodDisposition {
    /// Deliver the payload locally; forward the enclosed envelope (if any)
    /// to all peers except the sender.
    Deliver {
        payload: Payload,
        forward: Option<Envelope>,
    },
    /// Seen before; drop silently.
    Duplicate,
    /// Failed validation; drop and count against the sender.
    Invalid(String),
}

pub struct FloodManager {
    cache: DedupCache,
    config: FloodConfig,
}

impl FloodManager {
    pub fn new(config: FloodConfig) -> Self {
        Self {
            cache: DedupCache::new(config.cache_entries, config.cache_ttl),
            config,
        }
    }

    /// Classify an incoming envelope.
    pub fn handle_incoming(&mut self, envelope: &Envelope) -> FloodDisposition {
        if !self.cache.insert(envelope.message_id) {
            trace!(id = %envelope.message_id, "Duplicate flood message dropped");
            return FloodDisposition::Duplicate;
        }

        if !envelope.verify() {
            return FloodDisposition::Invalid("bad envelope signature".to_string());
        }

        let payload = match envelope.decode_payload() {
            Ok(payload) => payload,
            Err(e) => return FloodDisposition::Invalid(e.to_string()),
        };

        let forward = envelope.forwarded();
        debug!(
            id = %envelope.message_id,
            msg_type = ?envelope.message_type,
            ttl = envelope.ttl,
            forwarding = forward.is_some(),
            "Flood message accepted"
        );
        FloodDisposition::Deliver { payload, forward }
    }

    /// Create, sign and pre-register an outgoing message so our own flood
    /// echo is dropped.
    pub fn originate(&mut self, payload: &Payload, keypair: &Keypair) -> Result<Envelope> {
        let envelope = Envelope::seal(payload, keypair, self.config.default_ttl)?;
        self.cache.insert(envelope.message_id);
        Ok(envelope)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{BlockRequestPayload, ChainStatusPayload};
    use doin_types::Digest;

    fn status_payload() -> Payload {
        Payload::ChainStatus(ChainStatusPayload {
            height: 1,
            tip_hash: Digest::hash(b"t"),
            finalized_height: 0,
        })
    }

    #[test]
    fn test_deliver_then_duplicate() {
        let keypair = Keypair::generate();
        let mut manager = FloodManager::new(FloodConfig::default());
        let envelope = Envelope::seal(&status_payload(), &keypair, 5).unwrap();

        match manager.handle_incoming(&envelope) {
            FloodDisposition::Deliver { forward, .. } => {
                let fwd = forward.expect("ttl 5 forwards");
                assert_eq!(fwd.ttl, 4);
            }
            other => panic!("expected Deliver, got {:?}", other),
        }
        assert!(matches!(
            manager.handle_incoming(&envelope),
            FloodDisposition::Duplicate
        ));
    }

    #[test]
    fn test_ttl_zero_delivers_without_forward() {
        let keypair = Keypair::generate();
        let mut manager = FloodManager::new(FloodConfig::default());
        let envelope = Envelope::seal(&status_payload(), &keypair, 0).unwrap();

        match manager.handle_incoming(&envelope) {
            FloodDisposition::Deliver { forward, .. } => assert!(forward.is_none()),
            other => panic!("expected Deliver, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_signature_invalid() {
        let keypair = Keypair::generate();
        let mut manager = FloodManager::new(FloodConfig::default());
        let mut envelope = Envelope::seal(&status_payload(), &keypair, 5).unwrap();
        envelope.payload[0] ^= 0xFF;

        assert!(matches!(
            manager.handle_incoming(&envelope),
            FloodDisposition::Invalid(_)
        ));
    }

    #[test]
    fn test_originate_registers_own_id() {
        let keypair = Keypair::generate();
        let mut manager = FloodManager::new(FloodConfig::default());
        let envelope = manager
            .originate(
                &Payload::BlockRequest(BlockRequestPayload { from: 0, to: 1 }),
                &keypair,
            )
            .unwrap();

        // Our own message echoed back is a duplicate.
        assert!(matches!(
            manager.handle_incoming(&envelope),
            FloodDisposition::Duplicate
        ));
    }

    #[test]
    fn test_cache_bounded() {
        let keypair = Keypair::generate();
        let mut manager = FloodManager::new(FloodConfig {
            cache_entries: 4,
            ..FloodConfig::default()
        });
        for _ in 0..10 {
            let envelope = Envelope::seal(&status_payload(), &keypair, 1).unwrap();
            manager.handle_incoming(&envelope);
        }
        assert!(manager.cache_len() <= 4);
    }
}
