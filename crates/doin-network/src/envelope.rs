//! Binary wire envelope.
//!
//! ```text
//! version:u8 || type:u8 || message_id:16B || ttl:u8
//!   || origin:32B || payload_len:u32be || payload || sig:64B
//! ```
//!
//! The signature covers every field except the TTL, which forwarding nodes
//! must be able to decrement without invalidating the origin's signature.

use crate::messages::{MessageType, Payload};
use doin_crypto::{verify_signature, Keypair};
use doin_types::{DoinError, MessageId, PeerId, Result, Signature};

pub const WIRE_VERSION: u8 = 1;
pub const DEFAULT_TTL: u8 = 5;

const SIGNATURE_LEN: usize = 64;
const HEADER_LEN: usize = 1 + 1 + 16 + 1 + 32 + 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: u8,
    pub message_type: MessageType,
    pub message_id: MessageId,
    pub ttl: u8,
    pub origin: PeerId,
    pub payload: Vec<u8>,
    pub signature: Signature,
}

impl Envelope {
    /// Build and sign an envelope for a payload.
    pub fn seal(payload: &Payload, keypair: &Keypair, ttl: u8) -> Result<Self> {
        let mut envelope = Self {
            version: WIRE_VERSION,
            message_type: payload.message_type(),
            message_id: MessageId::new(),
            ttl,
            origin: keypair.peer_id(),
            payload: payload.encode()?,
            signature: Signature::empty(),
        };
        envelope.signature = keypair.sign(&envelope.signable_bytes());
        Ok(envelope)
    }

    /// Signed bytes: the full header and payload minus the mutable TTL.
    fn signable_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.push(self.version);
        bytes.push(self.message_type.code());
        bytes.extend_from_slice(self.message_id.as_bytes());
        bytes.extend_from_slice(self.origin.as_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Verify the origin signature.
    pub fn verify(&self) -> bool {
        verify_signature(&self.origin, &self.signable_bytes(), &self.signature)
    }

    /// A copy with `ttl − 1` for forwarding; `None` once the TTL is spent.
    pub fn forwarded(&self) -> Option<Self> {
        if self.ttl == 0 {
            return None;
        }
        let mut copy = self.clone();
        copy.ttl -= 1;
        Some(copy)
    }

    pub fn decode_payload(&self) -> Result<Payload> {
        Payload::decode(self.message_type, &self.payload)
    }

    /// Serialize to the exact wire layout.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let sig = self.signature.as_bytes();
        if sig.len() != SIGNATURE_LEN {
            return Err(DoinError::MalformedMessage(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                sig.len()
            )));
        }
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len() + SIGNATURE_LEN);
        bytes.push(self.version);
        bytes.push(self.message_type.code());
        bytes.extend_from_slice(self.message_id.as_bytes());
        bytes.push(self.ttl);
        bytes.extend_from_slice(self.origin.as_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(sig);
        Ok(bytes)
    }

    /// Parse from the wire layout.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + SIGNATURE_LEN {
            return Err(DoinError::MalformedMessage(format!(
                "envelope too short: {} bytes",
                bytes.len()
            )));
        }

        let version = bytes[0];
        if version != WIRE_VERSION {
            return Err(DoinError::MalformedMessage(format!(
                "unsupported wire version {}",
                version
            )));
        }
        let message_type = MessageType::from_code(bytes[1])
            .ok_or_else(|| DoinError::MalformedMessage(format!("unknown type {:#04x}", bytes[1])))?;

        let mut message_id = [0u8; 16];
        message_id.copy_from_slice(&bytes[2..18]);
        let ttl = bytes[18];
        let mut origin = [0u8; 32];
        origin.copy_from_slice(&bytes[19..51]);

        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&bytes[51..55]);
        let payload_len = u32::from_be_bytes(len_buf) as usize;

        if bytes.len() != HEADER_LEN + payload_len + SIGNATURE_LEN {
            return Err(DoinError::MalformedMessage(format!(
                "envelope length {} does not match declared payload {}",
                bytes.len(),
                payload_len
            )));
        }
        let payload = bytes[55..55 + payload_len].to_vec();
        let signature = Signature::new(bytes[55 + payload_len..].to_vec());

        Ok(Self {
            version,
            message_type,
            message_id: MessageId::from_bytes(message_id),
            ttl,
            origin: PeerId::from_bytes(origin),
            payload,
            signature,
        })
    }
}
