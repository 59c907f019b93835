//! Per-round timeout aggregation.

use crate::fork_choice;
use bedrock_types::{Address, QuorumCertificate, TimeoutMessage, ValidatorSet};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors from timeout aggregation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("timeout for (h={got_height}, r={got_round}) does not match collector (h={height}, r={round})")]
    WrongLocation {
        height: u64,
        round: u64,
        got_height: u64,
        got_round: u64,
    },

    #[error("timeout from unknown validator {0}")]
    UnknownVoter(Address),

    #[error("invalid timeout signature from {0}")]
    InvalidSignature(Address),
}

/// Collects timeout messages for one (height, round) and detects when f+1
/// voting power has declared a timeout.
///
/// f+1 guarantees at least one honest participant behind a round skip, so a
/// single Byzantine validator cannot force one.
#[derive(Debug)]
pub struct TimeoutCollector {
    height: u64,
    round: u64,
    validators: Arc<ValidatorSet>,
    timeouts: HashMap<Address, TimeoutMessage>,
    power: u64,
}

impl TimeoutCollector {
    /// Create an empty collector for a (height, round).
    pub fn new(height: u64, round: u64, validators: Arc<ValidatorSet>) -> Self {
        TimeoutCollector {
            height,
            round,
            validators,
            timeouts: HashMap::new(),
            power: 0,
        }
    }

    /// Add a timeout message. Returns whether the f+1 threshold is reached.
    ///
    /// Duplicates from the same validator are idempotent.
    pub fn add_timeout(&mut self, message: TimeoutMessage) -> Result<bool, TimeoutError> {
        if message.height != self.height || message.round != self.round {
            return Err(TimeoutError::WrongLocation {
                height: self.height,
                round: self.round,
                got_height: message.height,
                got_round: message.round,
            });
        }

        let validator = self
            .validators
            .get_by_address(&message.voter)
            .ok_or(TimeoutError::UnknownVoter(message.voter))?;
        if !validator
            .public_key
            .verify(&message.sign_bytes(), &message.signature)
        {
            return Err(TimeoutError::InvalidSignature(message.voter));
        }

        if self.timeouts.contains_key(&message.voter) {
            return Ok(self.has_threshold());
        }

        self.power += validator.voting_power;
        self.timeouts.insert(message.voter, message);
        Ok(self.has_threshold())
    }

    /// Whether collected timeouts carry ≥ f+1 voting power.
    pub fn has_threshold(&self) -> bool {
        self.validators.has_f_plus_one(self.power)
    }

    /// The highest **verified** QC carried by any collected timeout.
    ///
    /// Every candidate is verified against the validator set before being
    /// considered; unverifiable QCs are silently dropped so a forged QC
    /// cannot be injected through the timeout path. The carrier timeout
    /// still counted toward f+1. Preference follows [`fork_choice`]: highest
    /// round, ties broken by block hash.
    pub fn highest_qc(&self) -> Option<QuorumCertificate> {
        let mut best: Option<&QuorumCertificate> = None;
        for message in self.timeouts.values() {
            let Some(qc) = message.high_qc.as_ref() else {
                continue;
            };
            if let Err(err) = qc.verify(&self.validators) {
                debug!(voter = %message.voter, %err, "dropping unverifiable QC from timeout");
                continue;
            }
            best = fork_choice(best, Some(qc));
        }
        best.cloned()
    }

    /// Number of distinct validators that timed out.
    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    /// Whether no timeouts have been collected.
    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock_types::{Hash, KeyPair, Signature, Validator, Vote};

    fn harness() -> (Vec<KeyPair>, Arc<ValidatorSet>) {
        let keys: Vec<KeyPair> = (1..=4u8).map(|i| KeyPair::from_seed(&[i; 32])).collect();
        let validators = keys
            .iter()
            .map(|k| Validator::new(k.public_key(), 1))
            .collect();
        (keys, Arc::new(ValidatorSet::new(validators).unwrap()))
    }

    fn valid_qc(keys: &[KeyPair], round: u64, hash: Hash) -> QuorumCertificate {
        QuorumCertificate {
            block_hash: hash,
            round,
            votes: keys
                .iter()
                .take(3)
                .map(|k| Vote::signed(hash, 1, round, k))
                .collect(),
        }
    }

    #[test]
    fn threshold_at_f_plus_one() {
        let (keys, set) = harness();
        let mut collector = TimeoutCollector::new(1, 0, set);

        // f+1 = 2 for four validators of power 1.
        assert!(!collector
            .add_timeout(TimeoutMessage::signed(1, 0, None, &keys[0]))
            .unwrap());
        assert!(collector
            .add_timeout(TimeoutMessage::signed(1, 0, None, &keys[1]))
            .unwrap());
        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn duplicates_are_idempotent() {
        let (keys, set) = harness();
        let mut collector = TimeoutCollector::new(1, 0, set);

        collector
            .add_timeout(TimeoutMessage::signed(1, 0, None, &keys[0]))
            .unwrap();
        collector
            .add_timeout(TimeoutMessage::signed(1, 0, None, &keys[0]))
            .unwrap();
        assert_eq!(collector.len(), 1);
        assert!(!collector.has_threshold());
    }

    #[test]
    fn rejects_wrong_location_and_unknown_voter() {
        let (keys, set) = harness();
        let mut collector = TimeoutCollector::new(2, 1, set);

        assert!(matches!(
            collector.add_timeout(TimeoutMessage::signed(2, 0, None, &keys[0])),
            Err(TimeoutError::WrongLocation { .. })
        ));

        let outsider = KeyPair::from_seed(&[9; 32]);
        assert!(matches!(
            collector.add_timeout(TimeoutMessage::signed(2, 1, None, &outsider)),
            Err(TimeoutError::UnknownVoter(_))
        ));
    }

    #[test]
    fn highest_qc_prefers_greater_round() {
        let (keys, set) = harness();
        let mut collector = TimeoutCollector::new(2, 3, set);

        let low = valid_qc(&keys, 0, Hash::digest(b"low"));
        let high = valid_qc(&keys, 1, Hash::digest(b"high"));
        collector
            .add_timeout(TimeoutMessage::signed(2, 3, Some(low), &keys[0]))
            .unwrap();
        collector
            .add_timeout(TimeoutMessage::signed(2, 3, Some(high.clone()), &keys[1]))
            .unwrap();

        assert_eq!(collector.highest_qc(), Some(high));
    }

    #[test]
    fn highest_qc_breaks_round_ties_by_hash() {
        let (keys, set) = harness();
        let mut collector = TimeoutCollector::new(2, 3, set);

        let small = valid_qc(&keys, 1, Hash::new([0x01; 32]));
        let large = valid_qc(&keys, 1, Hash::new([0x02; 32]));
        collector
            .add_timeout(TimeoutMessage::signed(2, 3, Some(large.clone()), &keys[0]))
            .unwrap();
        collector
            .add_timeout(TimeoutMessage::signed(2, 3, Some(small), &keys[1]))
            .unwrap();

        assert_eq!(collector.highest_qc(), Some(large));
    }

    #[test]
    fn forged_qc_is_silently_dropped() {
        let (keys, set) = harness();
        let mut collector = TimeoutCollector::new(2, 3, set);

        // QC whose votes carry zeroed signatures: fails verification.
        let mut forged = valid_qc(&keys, 5, Hash::digest(b"forged"));
        for vote in &mut forged.votes {
            vote.signature = Signature::zero();
        }

        collector
            .add_timeout(TimeoutMessage::signed(2, 3, Some(forged), &keys[0]))
            .unwrap();

        // The only carried QC was forged: no candidate survives, but the
        // carrier still counted toward the threshold.
        assert_eq!(collector.highest_qc(), None);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn forged_qc_does_not_shadow_a_valid_one() {
        let (keys, set) = harness();
        let mut collector = TimeoutCollector::new(2, 3, set);

        let mut forged = valid_qc(&keys, 9, Hash::digest(b"forged"));
        for vote in &mut forged.votes {
            vote.signature = Signature::zero();
        }
        let genuine = valid_qc(&keys, 1, Hash::digest(b"genuine"));

        collector
            .add_timeout(TimeoutMessage::signed(2, 3, Some(forged), &keys[0]))
            .unwrap();
        collector
            .add_timeout(TimeoutMessage::signed(2, 3, Some(genuine.clone()), &keys[1]))
            .unwrap();

        assert_eq!(collector.highest_qc(), Some(genuine));
    }
}
