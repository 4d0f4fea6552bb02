//! The closed message set of the flood protocol.
//!
//! Type codes are wire-stable; payloads travel as canonical JSON inside the
//! binary envelope.

use chrono::{DateTime, Utc};
use doin_consensus::DeclaredBudget;
use doin_types::{
    Block, Digest, DoinError, MessageId, OptimaId, PeerId, Result, Signature, TaskId,
};
use serde::{Deserialize, Serialize};

/// Stable wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    OptimaeCommit = 0x01,
    OptimaeReveal = 0x02,
    Vote = 0x03,
    BlockAnnouncement = 0x04,
    ChainStatus = 0x05,
    BlockRequest = 0x06,
    BlockResponse = 0x07,
    TaskCreated = 0x08,
    TaskClaimed = 0x09,
    TaskCompleted = 0x0A,
    PeerDiscovery = 0x0B,
}

impl MessageType {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::OptimaeCommit),
            0x02 => Some(Self::OptimaeReveal),
            0x03 => Some(Self::Vote),
            0x04 => Some(Self::BlockAnnouncement),
            0x05 => Some(Self::ChainStatus),
            0x06 => Some(Self::BlockRequest),
            0x07 => Some(Self::BlockResponse),
            0x08 => Some(Self::TaskCreated),
            0x09 => Some(Self::TaskClaimed),
            0x0A => Some(Self::TaskCompleted),
            0x0B => Some(Self::PeerDiscovery),
            _ => None,
        }
    }
}

/// Phase 1 of commit-reveal: the binding hash plus declared budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    pub optima_id: OptimaId,
    pub domain_id: String,
    pub optimizer_id: PeerId,
    pub commit_hash: Digest,
    pub reported_metric: f64,
    /// Optimization seed the optimizer claims to have trained under; must
    /// equal the deterministic derivation from the commitment.
    pub declared_seed: u64,
    pub declared_budget: DeclaredBudget,
    pub timestamp: DateTime<Utc>,
    pub signature: Signature,
}

/// Phase 2: full parameters and nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealPayload {
    pub optima_id: OptimaId,
    pub parameters: Vec<u8>,
    pub nonce: Vec<u8>,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotePayload {
    pub optima_id: OptimaId,
    pub evaluator_id: PeerId,
    pub measured_metric: f64,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAnnouncementPayload {
    pub index: u64,
    pub block_hash: Digest,
    pub previous_hash: Digest,
    pub generator_id: PeerId,
    pub transaction_count: u32,
    pub threshold_used: f64,
    /// The full block rides along so direct peers can append without a
    /// round trip; laggards fall back to the sync handshake.
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatusPayload {
    pub height: u64,
    pub tip_hash: Digest,
    pub finalized_height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRequestPayload {
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockResponsePayload {
    pub blocks: Vec<Block>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreatedPayload {
    pub task: doin_types::Task,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskClaimedPayload {
    pub task_id: TaskId,
    pub claimant: PeerId,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletedPayload {
    pub task_id: TaskId,
    pub claimant: PeerId,
    pub result_hash: Digest,
    pub measured_metric: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerDiscoveryPayload {
    pub peer_id: PeerId,
    pub addresses: Vec<String>,
    /// Domain ids this peer participates in.
    pub domains: Vec<String>,
    /// Roles this peer serves: "optimizer", "evaluator".
    pub roles: Vec<String>,
}

/// A decoded message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    OptimaeCommit(CommitPayload),
    OptimaeReveal(RevealPayload),
    Vote(VotePayload),
    BlockAnnouncement(BlockAnnouncementPayload),
    ChainStatus(ChainStatusPayload),
    BlockRequest(BlockRequestPayload),
    BlockResponse(BlockResponsePayload),
    TaskCreated(TaskCreatedPayload),
    TaskClaimed(TaskClaimedPayload),
    TaskCompleted(TaskCompletedPayload),
    PeerDiscovery(PeerDiscoveryPayload),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::OptimaeCommit(_) => MessageType::OptimaeCommit,
            Self::OptimaeReveal(_) => MessageType::OptimaeReveal,
            Self::Vote(_) => MessageType::Vote,
            Self::BlockAnnouncement(_) => MessageType::BlockAnnouncement,
            Self::ChainStatus(_) => MessageType::ChainStatus,
            Self::BlockRequest(_) => MessageType::BlockRequest,
            Self::BlockResponse(_) => MessageType::BlockResponse,
            Self::TaskCreated(_) => MessageType::TaskCreated,
            Self::TaskClaimed(_) => MessageType::TaskClaimed,
            Self::TaskCompleted(_) => MessageType::TaskCompleted,
            Self::PeerDiscovery(_) => MessageType::PeerDiscovery,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and check the payload against the envelope's declared type.
    pub fn decode(expected: MessageType, bytes: &[u8]) -> Result<Self> {
        let payload: Payload = serde_json::from_slice(bytes)
            .map_err(|e| DoinError::MalformedMessage(format!("payload: {}", e)))?;
        if payload.message_type() != expected {
            return Err(DoinError::MalformedMessage(format!(
                "payload type {:?} does not match envelope code {:#04x}",
                payload.message_type(),
                expected.code()
            )));
        }
        Ok(payload)
    }
}

/// Convenience used by tests and local loopback delivery.
pub fn fresh_message_id() -> MessageId {
    MessageId::new()
}
