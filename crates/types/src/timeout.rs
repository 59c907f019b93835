//! Timeout messages for round advancement.

use crate::{codec, Address, Hash, KeyPair, QuorumCertificate, Signature};

/// A signed declaration that a validator's round timer expired.
///
/// `high_qc` carries the highest QC the sender has observed, so that a round
/// skip cannot lose the network's highest lock. The signature covers
/// `(height, round, digest(high_qc))` — binding the carried QC prevents a
/// relay from swapping it under an honest signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutMessage {
    pub height: u64,
    pub round: u64,
    pub voter: Address,
    pub high_qc: Option<QuorumCertificate>,
    pub signature: Signature,
}

impl TimeoutMessage {
    /// Create and sign a timeout message.
    pub fn signed(
        height: u64,
        round: u64,
        high_qc: Option<QuorumCertificate>,
        key: &KeyPair,
    ) -> Self {
        let signature = key.sign(&codec::timeout_sign_bytes(height, round, high_qc.as_ref()));
        TimeoutMessage {
            height,
            round,
            voter: key.address(),
            high_qc,
            signature,
        }
    }

    /// The message the signature must cover.
    pub fn sign_bytes(&self) -> Vec<u8> {
        codec::timeout_sign_bytes(self.height, self.round, self.high_qc.as_ref())
    }

    /// Digest of the carried QC, [`Hash::ZERO`] when absent.
    pub fn high_qc_digest(&self) -> Hash {
        self.high_qc
            .as_ref()
            .map(|qc| qc.digest())
            .unwrap_or(Hash::ZERO)
    }
}
