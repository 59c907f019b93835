//! Blocks and block headers.

use crate::{codec, Hash};

/// Consensus metadata for a block.
///
/// The header hash is SHA-256 over the canonical encoding (see
/// [`codec::encode_block_header`]); it identifies the block everywhere —
/// votes, QCs, and parent links all refer to it.
///
/// `Height` increases by exactly one along any committed chain, and
/// `parent_hash` equals the header hash of the committed block at
/// `height - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Position in the chain.
    pub height: u64,
    /// Round within the height in which this block was proposed.
    pub round: u64,
    /// Header hash of the parent block.
    pub parent_hash: Hash,
    /// Commitment to post-execution state (filled by the executor).
    pub state_root: Hash,
    /// Merkle commitment to the transaction payloads.
    pub tx_root: Hash,
    /// Commitment to execution receipts (filled by the executor).
    pub receipt_root: Hash,
    /// Proposer wall-clock time, unix seconds.
    pub block_time: i64,
    /// Chain identifier; prevents cross-chain replay of headers.
    pub chain_id: Vec<u8>,
}

impl BlockHeader {
    /// Deterministic hash of the canonical header encoding.
    pub fn hash(&self) -> Hash {
        Hash::digest(&codec::encode_block_header(self))
    }
}

/// A block: header plus ordered opaque transaction payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Vec<u8>>,
}

impl Block {
    /// The block's identity is its header hash.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Recompute the transaction root and compare against the header.
    pub fn verify_tx_root(&self) -> bool {
        self.header.tx_root == compute_tx_root(&self.transactions)
    }
}

/// Binary SHA-256 merkle root over transaction payload hashes.
///
/// Leaves are `sha256(payload)`; an odd node at any level is promoted
/// unchanged. The empty list commits to [`Hash::ZERO`].
pub fn compute_tx_root(transactions: &[Vec<u8>]) -> Hash {
    if transactions.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = transactions.iter().map(|tx| Hash::digest(tx)).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            if pair.len() == 2 {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(pair[0].as_bytes());
                buf[32..].copy_from_slice(pair[1].as_bytes());
                next.push(Hash::digest(&buf));
            } else {
                next.push(pair[0]);
            }
        }
        level = next;
    }
    level[0]
}
