//! Votes and proposals.

use crate::{codec, Address, Block, Hash, KeyPair, QuorumCertificate, Signature};

/// A signed vote for a block at a specific height and round.
///
/// The signature covers the canonical encoding of
/// `(block_hash, height, round)` — see [`codec::vote_sign_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Header hash of the block being endorsed.
    pub block_hash: Hash,
    pub height: u64,
    pub round: u64,
    /// Address of the voting validator.
    pub voter: Address,
    pub signature: Signature,
}

impl Vote {
    /// Create and sign a vote.
    pub fn signed(block_hash: Hash, height: u64, round: u64, key: &KeyPair) -> Self {
        let signature = key.sign(&codec::vote_sign_bytes(&block_hash, height, round));
        Vote {
            block_hash,
            height,
            round,
            voter: key.address(),
            signature,
        }
    }

    /// The message the signature must cover.
    pub fn sign_bytes(&self) -> Vec<u8> {
        codec::vote_sign_bytes(&self.block_hash, self.height, self.round)
    }
}

/// A signed block proposal for a round.
///
/// The signature binds the proposer to
/// `(hash(block), round, digest(justify_qc))` — see
/// [`codec::proposal_sign_bytes`]. `justify_qc` is the QC for the proposed
/// block's parent and is present for every block after genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub block: Block,
    pub round: u64,
    pub proposer: Address,
    pub justify_qc: Option<QuorumCertificate>,
    pub signature: Signature,
}

impl Proposal {
    /// Create and sign a proposal.
    pub fn signed(
        block: Block,
        round: u64,
        justify_qc: Option<QuorumCertificate>,
        key: &KeyPair,
    ) -> Self {
        let block_hash = block.hash();
        let signature = key.sign(&codec::proposal_sign_bytes(
            &block_hash,
            round,
            justify_qc.as_ref(),
        ));
        Proposal {
            block,
            round,
            proposer: key.address(),
            justify_qc,
            signature,
        }
    }

    /// The message the signature must cover.
    pub fn sign_bytes(&self) -> Vec<u8> {
        codec::proposal_sign_bytes(&self.block.hash(), self.round, self.justify_qc.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compute_tx_root, BlockHeader};

    fn block(height: u64) -> Block {
        let transactions = vec![b"tx1".to_vec()];
        Block {
            header: BlockHeader {
                height,
                round: 0,
                parent_hash: Hash::ZERO,
                state_root: Hash::ZERO,
                tx_root: compute_tx_root(&transactions),
                receipt_root: Hash::ZERO,
                block_time: 1_700_000_000,
                chain_id: b"bedrock-test-1".to_vec(),
            },
            transactions,
        }
    }

    #[test]
    fn signed_vote_verifies() {
        let key = KeyPair::generate();
        let vote = Vote::signed(Hash::digest(b"block"), 3, 1, &key);
        assert_eq!(vote.voter, key.address());
        assert!(key.public_key().verify(&vote.sign_bytes(), &vote.signature));
    }

    #[test]
    fn vote_signature_binds_all_fields() {
        let key = KeyPair::generate();
        let vote = Vote::signed(Hash::digest(b"block"), 3, 1, &key);

        let mut wrong_round = vote.clone();
        wrong_round.round = 2;
        assert!(!key
            .public_key()
            .verify(&wrong_round.sign_bytes(), &wrong_round.signature));

        let mut wrong_hash = vote.clone();
        wrong_hash.block_hash = Hash::digest(b"other");
        assert!(!key
            .public_key()
            .verify(&wrong_hash.sign_bytes(), &wrong_hash.signature));
    }

    #[test]
    fn proposal_signature_binds_justify_qc() {
        let key = KeyPair::generate();
        let proposal = Proposal::signed(block(1), 0, None, &key);
        assert!(key
            .public_key()
            .verify(&proposal.sign_bytes(), &proposal.signature));

        // Swapping in a justify QC must invalidate the signature.
        let mut tampered = proposal.clone();
        tampered.justify_qc = Some(QuorumCertificate::genesis());
        assert!(!key
            .public_key()
            .verify(&tampered.sign_bytes(), &tampered.signature));
    }
}
