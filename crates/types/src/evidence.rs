//! Equivocation evidence.

use crate::{Address, ValidatorSet, Vote};
use thiserror::Error;

/// Errors from evidence validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("votes are from different validators")]
    VoterMismatch,

    #[error("votes are for different heights or rounds")]
    LocationMismatch,

    #[error("votes endorse the same block")]
    SameBlock,

    #[error("voter is not in the validator set")]
    UnknownVoter,

    #[error("vote signature does not verify")]
    InvalidSignature,
}

/// Two conflicting signed votes from the same validator for the same
/// (height, round) — proof of Byzantine behavior, stored for later slashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equivocation {
    pub vote_a: Vote,
    pub vote_b: Vote,
}

impl Equivocation {
    /// Pair two conflicting votes. Callers are expected to have observed the
    /// conflict; [`Equivocation::verify`] proves it.
    pub fn new(vote_a: Vote, vote_b: Vote) -> Self {
        Equivocation { vote_a, vote_b }
    }

    /// The deduplication key: one record per (voter, height, round).
    pub fn key(&self) -> (Address, u64, u64) {
        (self.vote_a.voter, self.vote_a.height, self.vote_a.round)
    }

    /// Prove the equivocation: same voter and (height, round), different
    /// block hashes, both signatures valid against the validator set.
    pub fn verify(&self, validators: &ValidatorSet) -> Result<(), EvidenceError> {
        if self.vote_a.voter != self.vote_b.voter {
            return Err(EvidenceError::VoterMismatch);
        }
        if self.vote_a.height != self.vote_b.height || self.vote_a.round != self.vote_b.round {
            return Err(EvidenceError::LocationMismatch);
        }
        if self.vote_a.block_hash == self.vote_b.block_hash {
            return Err(EvidenceError::SameBlock);
        }

        let validator = validators
            .get_by_address(&self.vote_a.voter)
            .ok_or(EvidenceError::UnknownVoter)?;
        for vote in [&self.vote_a, &self.vote_b] {
            if !validator
                .public_key
                .verify(&vote.sign_bytes(), &vote.signature)
            {
                return Err(EvidenceError::InvalidSignature);
            }
        }
        Ok(())
    }
}
