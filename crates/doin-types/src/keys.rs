use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable peer identifier: the 32 raw bytes of an ed25519 public key.
///
/// Doubles as `optimizer_id` and `evaluator_id`; the ordering impl gives the
/// lexicographic tie-break used by quorum selection and task claims.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Signature(empty)")
        } else {
            write!(f, "Signature({}...)", &self.to_hex()[..8])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_round_trip() {
        let id = PeerId::from_bytes([7u8; 32]);
        assert_eq!(PeerId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn test_peer_id_ordering_is_lexicographic() {
        let a = PeerId::from_bytes([1u8; 32]);
        let b = PeerId::from_bytes([2u8; 32]);
        assert!(a < b);
    }

    #[test]
    fn test_signature() {
        let sig = Signature::new(vec![1, 2, 3, 4]);
        assert!(!sig.is_empty());
        assert_eq!(sig.as_bytes(), &[1, 2, 3, 4]);
        assert!(Signature::empty().is_empty());
    }
}
