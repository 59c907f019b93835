//! Per-round vote aggregation.

use bedrock_types::{Address, Equivocation, Hash, QuorumCertificate, ValidatorSet, Vote};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from vote aggregation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoteSetError {
    #[error("vote for height {got} does not match collector height {want}")]
    WrongHeight { want: u64, got: u64 },

    #[error("vote for round {got} does not match collector round {want}")]
    WrongRound { want: u64, got: u64 },

    #[error("vote from unknown validator {0}")]
    UnknownVoter(Address),

    #[error("invalid vote signature from {0}")]
    InvalidSignature(Address),

    #[error("cannot create QC: insufficient quorum")]
    InsufficientQuorum,
}

/// Result of adding a vote.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    /// Power behind the first-observed block hash reached quorum.
    pub quorum_reached: bool,
    /// Conflicting pair detected for the same voter, if any. The first
    /// vote's contribution is retained; the new vote is discarded.
    pub evidence: Option<Equivocation>,
}

/// Collects votes for one (height, round).
///
/// The first vote observed fixes the expected block hash; only votes for
/// that hash contribute power toward quorum. A second, conflicting vote from
/// a voter already counted yields equivocation evidence. Duplicate identical
/// votes are idempotent no-ops.
#[derive(Debug)]
pub struct VoteSet {
    height: u64,
    round: u64,
    validators: Arc<ValidatorSet>,
    expected_hash: Option<Hash>,
    votes: HashMap<Address, Vote>,
    power: u64,
}

impl VoteSet {
    /// Create an empty vote set for a (height, round).
    pub fn new(height: u64, round: u64, validators: Arc<ValidatorSet>) -> Self {
        VoteSet {
            height,
            round,
            validators,
            expected_hash: None,
            votes: HashMap::new(),
            power: 0,
        }
    }

    /// Add a vote.
    ///
    /// Rejects votes for the wrong (height, round), from unknown validators,
    /// or with invalid signatures. Detects equivocation against the voter's
    /// previously recorded vote.
    pub fn add_vote(&mut self, vote: Vote) -> Result<VoteOutcome, VoteSetError> {
        if vote.height != self.height {
            return Err(VoteSetError::WrongHeight {
                want: self.height,
                got: vote.height,
            });
        }
        if vote.round != self.round {
            return Err(VoteSetError::WrongRound {
                want: self.round,
                got: vote.round,
            });
        }

        let validator = self
            .validators
            .get_by_address(&vote.voter)
            .ok_or(VoteSetError::UnknownVoter(vote.voter))?;
        if !validator
            .public_key
            .verify(&vote.sign_bytes(), &vote.signature)
        {
            return Err(VoteSetError::InvalidSignature(vote.voter));
        }

        if let Some(previous) = self.votes.get(&vote.voter) {
            if previous.block_hash == vote.block_hash {
                // Idempotent duplicate.
                return Ok(VoteOutcome {
                    quorum_reached: self.has_quorum(),
                    evidence: None,
                });
            }
            // Conflicting vote from the same validator: keep the first,
            // surface the pair as evidence.
            let evidence = Equivocation::new(previous.clone(), vote);
            return Ok(VoteOutcome {
                quorum_reached: self.has_quorum(),
                evidence: Some(evidence),
            });
        }

        let expected = *self.expected_hash.get_or_insert(vote.block_hash);
        if vote.block_hash == expected {
            self.power += validator.voting_power;
        }
        self.votes.insert(vote.voter, vote);

        Ok(VoteOutcome {
            quorum_reached: self.has_quorum(),
            evidence: None,
        })
    }

    /// Whether power behind the expected hash reached quorum.
    pub fn has_quorum(&self) -> bool {
        self.validators.has_quorum(self.power)
    }

    /// Accumulated power behind the expected hash.
    pub fn voting_power(&self) -> u64 {
        self.power
    }

    /// Number of recorded voters.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// Whether no votes have been recorded.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Build a QC from the collected votes.
    ///
    /// Fails without quorum — calling it early is a programmer error, which
    /// is why the engine treats the failure as fatal in tests. The QC's
    /// block hash is the first-observed hash and its votes are exactly the
    /// contributing ones.
    pub fn make_qc(&self) -> Result<QuorumCertificate, VoteSetError> {
        if !self.has_quorum() {
            return Err(VoteSetError::InsufficientQuorum);
        }
        // has_quorum implies at least one contributing vote fixed the hash.
        let block_hash = self.expected_hash.ok_or(VoteSetError::InsufficientQuorum)?;

        let votes: Vec<Vote> = self
            .votes
            .values()
            .filter(|v| v.block_hash == block_hash)
            .cloned()
            .collect();

        Ok(QuorumCertificate {
            block_hash,
            round: self.round,
            votes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock_types::{KeyPair, Signature, Validator};

    fn harness() -> (Vec<KeyPair>, Arc<ValidatorSet>) {
        let keys: Vec<KeyPair> = (1..=4u8).map(|i| KeyPair::from_seed(&[i; 32])).collect();
        let validators = keys
            .iter()
            .map(|k| Validator::new(k.public_key(), 1))
            .collect();
        (keys, Arc::new(ValidatorSet::new(validators).unwrap()))
    }

    #[test]
    fn quorum_at_three_of_four() {
        let (keys, set) = harness();
        let mut votes = VoteSet::new(1, 0, set);
        let hash = Hash::digest(b"block");

        for (i, key) in keys.iter().take(3).enumerate() {
            let outcome = votes.add_vote(Vote::signed(hash, 1, 0, key)).unwrap();
            assert_eq!(outcome.quorum_reached, i == 2, "vote {i}");
        }
        assert!(votes.has_quorum());
        assert_eq!(votes.voting_power(), 3);
    }

    #[test]
    fn rejects_wrong_round_and_height() {
        let (keys, set) = harness();
        let mut votes = VoteSet::new(5, 2, set);
        let hash = Hash::digest(b"block");

        assert!(matches!(
            votes.add_vote(Vote::signed(hash, 4, 2, &keys[0])),
            Err(VoteSetError::WrongHeight { want: 5, got: 4 })
        ));
        assert!(matches!(
            votes.add_vote(Vote::signed(hash, 5, 1, &keys[0])),
            Err(VoteSetError::WrongRound { want: 2, got: 1 })
        ));
    }

    #[test]
    fn rejects_unknown_voter_and_bad_signature() {
        let (keys, set) = harness();
        let mut votes = VoteSet::new(1, 0, set);
        let hash = Hash::digest(b"block");

        let outsider = KeyPair::from_seed(&[9; 32]);
        assert!(matches!(
            votes.add_vote(Vote::signed(hash, 1, 0, &outsider)),
            Err(VoteSetError::UnknownVoter(_))
        ));

        let mut forged = Vote::signed(hash, 1, 0, &keys[0]);
        forged.signature = Signature::zero();
        assert!(matches!(
            votes.add_vote(forged),
            Err(VoteSetError::InvalidSignature(_))
        ));
        assert_eq!(votes.len(), 0);
    }

    #[test]
    fn duplicate_votes_are_idempotent() {
        let (keys, set) = harness();
        let mut votes = VoteSet::new(1, 0, set);
        let hash = Hash::digest(b"block");

        votes.add_vote(Vote::signed(hash, 1, 0, &keys[0])).unwrap();
        let outcome = votes.add_vote(Vote::signed(hash, 1, 0, &keys[0])).unwrap();
        assert!(outcome.evidence.is_none());
        assert_eq!(votes.voting_power(), 1);
        assert_eq!(votes.len(), 1);
    }

    #[test]
    fn conflicting_vote_yields_evidence_and_keeps_first() {
        let (keys, set) = harness();
        let mut votes = VoteSet::new(1, 0, set);
        let hash_a = Hash::digest(b"a");
        let hash_b = Hash::digest(b"b");

        votes.add_vote(Vote::signed(hash_a, 1, 0, &keys[0])).unwrap();
        let outcome = votes
            .add_vote(Vote::signed(hash_b, 1, 0, &keys[0]))
            .unwrap();

        let evidence = outcome.evidence.expect("equivocation detected");
        assert_eq!(evidence.vote_a.block_hash, hash_a);
        assert_eq!(evidence.vote_b.block_hash, hash_b);
        // First vote's contribution retained, the new one discarded.
        assert_eq!(votes.voting_power(), 1);
    }

    #[test]
    fn minority_hash_does_not_count_toward_quorum() {
        let (keys, set) = harness();
        let mut votes = VoteSet::new(1, 0, set);
        let expected = Hash::digest(b"a");
        let other = Hash::digest(b"b");

        votes.add_vote(Vote::signed(expected, 1, 0, &keys[0])).unwrap();
        votes.add_vote(Vote::signed(other, 1, 0, &keys[1])).unwrap();
        votes.add_vote(Vote::signed(expected, 1, 0, &keys[2])).unwrap();
        assert!(!votes.has_quorum());

        let outcome = votes
            .add_vote(Vote::signed(expected, 1, 0, &keys[3]))
            .unwrap();
        assert!(outcome.quorum_reached);
    }

    #[test]
    fn make_qc_agrees_on_hash_and_round() {
        let (keys, set) = harness();
        let mut votes = VoteSet::new(3, 1, set.clone());
        let expected = Hash::digest(b"a");

        votes.add_vote(Vote::signed(expected, 3, 1, &keys[0])).unwrap();
        // A stray vote for a different hash must not leak into the QC.
        votes
            .add_vote(Vote::signed(Hash::digest(b"b"), 3, 1, &keys[1]))
            .unwrap();
        votes.add_vote(Vote::signed(expected, 3, 1, &keys[2])).unwrap();
        votes.add_vote(Vote::signed(expected, 3, 1, &keys[3])).unwrap();

        let qc = votes.make_qc().unwrap();
        assert_eq!(qc.block_hash, expected);
        assert_eq!(qc.round, 1);
        assert_eq!(qc.votes.len(), 3);
        assert!(qc.votes.iter().all(|v| v.block_hash == expected && v.round == 1));
        assert_eq!(qc.verify(&set), Ok(()));
    }

    #[test]
    fn make_qc_without_quorum_fails() {
        let (keys, set) = harness();
        let mut votes = VoteSet::new(1, 0, set);
        votes
            .add_vote(Vote::signed(Hash::digest(b"a"), 1, 0, &keys[0]))
            .unwrap();
        assert_eq!(votes.make_qc(), Err(VoteSetError::InsufficientQuorum));
    }
}
