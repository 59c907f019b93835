//! Consensus configuration.

use std::time::Duration;

/// Tunables for the consensus engine.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Chain identifier baked into every block header.
    pub chain_id: Vec<u8>,

    /// Round-0 timer duration; later rounds double it per round.
    pub base_timeout: Duration,

    /// Block time recorded in the genesis header, unix seconds.
    pub genesis_time: i64,

    /// Cap on transactions taken from the payload provider per block.
    pub max_block_transactions: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            chain_id: b"bedrock-1".to_vec(),
            base_timeout: Duration::from_secs(1),
            genesis_time: 0,
            max_block_transactions: 1_000,
        }
    }
}

impl ConsensusConfig {
    /// Timer duration for a round: `base_timeout · 2^round`.
    ///
    /// Saturates instead of overflowing for absurd round numbers; the exact
    /// doubling holds for every round that can occur in practice.
    pub fn round_timeout(&self, round: u64) -> Duration {
        let factor = u32::try_from(round)
            .ok()
            .and_then(|r| 1u32.checked_shl(r))
            .unwrap_or(u32::MAX);
        self.base_timeout.saturating_mul(factor)
    }
}
