use crate::id::OptimaId;
use crate::keys::{PeerId, Signature};
use serde::{Deserialize, Serialize};

/// A single evaluator's verification result for an optima.
///
/// Exactly one vote per (optima, evaluator); only members of the selected
/// quorum may vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub optima_id: OptimaId,
    pub evaluator_id: PeerId,
    pub measured_metric: f64,
    pub signature: Signature,
}

impl Vote {
    /// The bytes an evaluator signs: canonical encoding of everything but
    /// the signature itself.
    pub fn signing_bytes(optima_id: &OptimaId, evaluator_id: &PeerId, measured_metric: f64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + 32 + 8);
        bytes.extend_from_slice(optima_id.as_bytes());
        bytes.extend_from_slice(evaluator_id.as_bytes());
        bytes.extend_from_slice(&measured_metric.to_be_bytes());
        bytes
    }

    pub fn to_signing_bytes(&self) -> Vec<u8> {
        Self::signing_bytes(&self.optima_id, &self.evaluator_id, self.measured_metric)
    }
}
