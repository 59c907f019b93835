//! Validator set and voting-power thresholds.

use crate::{Address, PublicKey};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from validator set construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidatorSetError {
    #[error("validator set is empty")]
    Empty,

    #[error("duplicate validator address {0}")]
    DuplicateAddress(Address),

    #[error("validator {0} has zero voting power")]
    ZeroPower(Address),
}

/// A single consensus participant.
#[derive(Debug, Clone)]
pub struct Validator {
    /// Identifier derived from the public key.
    pub address: Address,
    /// Key votes and proposals are verified against.
    pub public_key: PublicKey,
    /// Weight in quorum arithmetic.
    pub voting_power: u64,
}

impl Validator {
    /// Create a validator, deriving the address from the public key.
    pub fn new(public_key: PublicKey, voting_power: u64) -> Self {
        Validator {
            address: public_key.address(),
            public_key,
            voting_power,
        }
    }
}

/// An immutable, ordered collection of validators.
///
/// Membership and powers are frozen for the lifetime of a height; all
/// replicas must construct identical sets, which is why members are sorted
/// by address on construction (proposer selection indexes into this order).
///
/// Thresholds are computed over voting **power**, not validator count:
/// quorum is `⌊2·total/3⌋ + 1` and f+1 is `⌊total/3⌋ + 1`.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    by_address: HashMap<Address, usize>,
    total_power: u64,
}

impl ValidatorSet {
    /// Build a set from members. Sorts by address for cross-replica
    /// determinism; rejects duplicates, zero-power members, and empty sets.
    pub fn new(mut validators: Vec<Validator>) -> Result<Self, ValidatorSetError> {
        if validators.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        validators.sort_by(|a, b| a.address.cmp(&b.address));

        let mut by_address = HashMap::with_capacity(validators.len());
        let mut total_power: u64 = 0;
        for (i, v) in validators.iter().enumerate() {
            if v.voting_power == 0 {
                return Err(ValidatorSetError::ZeroPower(v.address));
            }
            if by_address.insert(v.address, i).is_some() {
                return Err(ValidatorSetError::DuplicateAddress(v.address));
            }
            total_power = total_power.saturating_add(v.voting_power);
        }

        Ok(ValidatorSet {
            validators,
            by_address,
            total_power,
        })
    }

    /// Look up a validator by address.
    pub fn get_by_address(&self, address: &Address) -> Option<&Validator> {
        self.by_address.get(address).map(|&i| &self.validators[i])
    }

    /// Position of a validator in address order.
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.by_address.get(address).copied()
    }

    /// Sum of all voting power.
    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    /// Minimum power for a quorum: `⌊2·total/3⌋ + 1`.
    pub fn quorum_threshold(&self) -> u64 {
        (self.total_power * 2) / 3 + 1
    }

    /// Minimum power guaranteeing one honest participant: `⌊total/3⌋ + 1`.
    pub fn f_plus_one_threshold(&self) -> u64 {
        self.total_power / 3 + 1
    }

    /// Whether the given accumulated power reaches quorum.
    pub fn has_quorum(&self, power: u64) -> bool {
        power >= self.quorum_threshold()
    }

    /// Whether the given accumulated power reaches f+1.
    pub fn has_f_plus_one(&self, power: u64) -> bool {
        power >= self.f_plus_one_threshold()
    }

    /// The designated proposer for a height and round.
    ///
    /// Round-robin over the address-sorted members, keyed by
    /// `(height + round)`. Every replica must evaluate the same function.
    pub fn proposer_for(&self, height: u64, round: u64) -> &Validator {
        let index = (height.wrapping_add(round) % self.validators.len() as u64) as usize;
        &self.validators[index]
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set has no members. Construction forbids this; kept for
    /// API completeness.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Iterate members in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }
}
