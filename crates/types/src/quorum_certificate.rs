//! Quorum certificates.

use crate::{codec, Hash, ValidatorSet, Vote};
use std::collections::HashSet;
use thiserror::Error;

/// Errors from QC verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QcError {
    #[error("QC has no votes")]
    NoVotes,

    #[error("vote block hash {vote} does not match QC block hash {qc}")]
    BlockHashMismatch { qc: Hash, vote: Hash },

    #[error("vote round {vote} does not match QC round {qc}")]
    RoundMismatch { qc: u64, vote: u64 },

    #[error("votes disagree on height")]
    HeightMismatch,

    #[error("vote from validator outside the validator set")]
    UnknownVoter,

    #[error("duplicate vote from the same validator")]
    DuplicateVoter,

    #[error("invalid vote signature")]
    InvalidSignature,

    #[error("voting power {power} below quorum threshold {quorum}")]
    InsufficientPower { power: u64, quorum: u64 },
}

/// Proof that a quorum of voting power endorsed one block in one round.
///
/// Every vote agrees on `block_hash` and `round`, voters are distinct, and
/// the accumulated power of the voters is at least 2f+1. The canonical
/// encoding sorts votes by voter address, so two QCs over the same vote set
/// serialize identically regardless of collection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumCertificate {
    pub block_hash: Hash,
    pub round: u64,
    pub votes: Vec<Vote>,
}

impl QuorumCertificate {
    /// The bootstrap certificate: zero hash, round 0, no votes.
    pub fn genesis() -> Self {
        QuorumCertificate {
            block_hash: Hash::ZERO,
            round: 0,
            votes: Vec::new(),
        }
    }

    /// Whether this is the bootstrap certificate.
    pub fn is_genesis(&self) -> bool {
        self.votes.is_empty() && self.block_hash.is_zero()
    }

    /// The height this QC certifies, recovered from its votes (0 for
    /// genesis).
    pub fn height(&self) -> u64 {
        self.votes.first().map(|v| v.height).unwrap_or(0)
    }

    /// Digest of the canonical encoding; used when other messages commit to
    /// this QC by reference.
    pub fn digest(&self) -> Hash {
        Hash::digest(&codec::encode_qc(self))
    }

    /// Full verification against a validator set: vote agreement, distinct
    /// known voters, signature validity, and quorum power.
    ///
    /// The genesis certificate verifies trivially.
    pub fn verify(&self, validators: &ValidatorSet) -> Result<(), QcError> {
        if self.is_genesis() {
            return Ok(());
        }
        if self.votes.is_empty() {
            return Err(QcError::NoVotes);
        }

        let height = self.votes[0].height;
        let mut seen = HashSet::with_capacity(self.votes.len());
        let mut power: u64 = 0;

        for vote in &self.votes {
            if vote.block_hash != self.block_hash {
                return Err(QcError::BlockHashMismatch {
                    qc: self.block_hash,
                    vote: vote.block_hash,
                });
            }
            if vote.round != self.round {
                return Err(QcError::RoundMismatch {
                    qc: self.round,
                    vote: vote.round,
                });
            }
            if vote.height != height {
                return Err(QcError::HeightMismatch);
            }

            let validator = validators
                .get_by_address(&vote.voter)
                .ok_or(QcError::UnknownVoter)?;
            if !seen.insert(vote.voter) {
                return Err(QcError::DuplicateVoter);
            }
            if !validator
                .public_key
                .verify(&vote.sign_bytes(), &vote.signature)
            {
                return Err(QcError::InvalidSignature);
            }
            power += validator.voting_power;
        }

        if !validators.has_quorum(power) {
            return Err(QcError::InsufficientPower {
                power,
                quorum: validators.quorum_threshold(),
            });
        }
        Ok(())
    }
}
