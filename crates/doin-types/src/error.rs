use thiserror::Error;

/// Coarse error classification driving the handling policy: protocol and
/// economic failures are dropped locally, consistency failures reject the
/// offending artifact and flag its source, liveness failures progress the
/// coordinator state machine, external failures suspend progress, fatal
/// failures halt the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Consistency,
    Economic,
    Liveness,
    External,
    Fatal,
}

#[derive(Error, Debug)]
pub enum DoinError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("TTL exhausted")]
    TtlExhausted,

    #[error("Hash mismatch: {0}")]
    HashMismatch(String),

    #[error("Merkle root mismatch: expected {expected}, computed {computed}")]
    MerkleMismatch { expected: String, computed: String },

    #[error("Non-monotone block index: expected {expected}, got {actual}")]
    NonMonotoneIndex { expected: u64, actual: u64 },

    #[error("Block timestamp out of bounds: {0}")]
    TimestampOutOfBounds(String),

    #[error("Reorg would cross finalized height {finalized} (target {target})")]
    ReorgBelowFinality { finalized: u64, target: u64 },

    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error("Insufficient reputation: required {required}, actual {actual}")]
    InsufficientReputation { required: f64, actual: f64 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Bounds exceeded: {0}")]
    BoundsExceeded(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Insufficient quorum: required {required}, got {actual}")]
    InsufficientQuorum { required: usize, actual: usize },

    #[error("External anchor diverges at height {height}")]
    AnchorDivergence { height: u64 },

    #[error("Peer misbehavior: {0}")]
    PeerMisbehavior(String),

    #[error("Chain file corruption: {0}")]
    ChainCorruption(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DoinError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedMessage(_) | Self::SignatureVerification | Self::TtlExhausted => {
                ErrorKind::Protocol
            }
            Self::HashMismatch(_)
            | Self::MerkleMismatch { .. }
            | Self::NonMonotoneIndex { .. }
            | Self::TimestampOutOfBounds(_)
            | Self::ReorgBelowFinality { .. }
            | Self::Serialization(_) => ErrorKind::Consistency,
            Self::UnknownDomain(_)
            | Self::InsufficientReputation { .. }
            | Self::RateLimited(_)
            | Self::BoundsExceeded(_) => ErrorKind::Economic,
            Self::Timeout(_) | Self::InsufficientQuorum { .. } => ErrorKind::Liveness,
            Self::AnchorDivergence { .. } | Self::PeerMisbehavior(_) => ErrorKind::External,
            Self::ChainCorruption(_) | Self::Configuration(_) => ErrorKind::Fatal,
        }
    }
}

impl From<serde_json::Error> for DoinError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<crate::canonical::CanonicalError> for DoinError {
    fn from(e: crate::canonical::CanonicalError) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DoinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(DoinError::SignatureVerification.kind(), ErrorKind::Protocol);
        assert_eq!(
            DoinError::ReorgBelowFinality {
                finalized: 10,
                target: 9
            }
            .kind(),
            ErrorKind::Consistency
        );
        assert_eq!(
            DoinError::RateLimited("commits".into()).kind(),
            ErrorKind::Economic
        );
        assert_eq!(
            DoinError::InsufficientQuorum {
                required: 3,
                actual: 1
            }
            .kind(),
            ErrorKind::Liveness
        );
        assert_eq!(
            DoinError::AnchorDivergence { height: 100 }.kind(),
            ErrorKind::External
        );
        assert_eq!(
            DoinError::ChainCorruption("truncated log".into()).kind(),
            ErrorKind::Fatal
        );
    }
}
