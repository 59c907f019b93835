//! Node configuration.

use bedrock_consensus::ConsensusConfig;
use bedrock_types::{PublicKey, Validator, ValidatorSet, ValidatorSetError};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid public key hex for validator {index}: {reason}")]
    InvalidPublicKey { index: usize, reason: String },

    #[error("invalid validator set: {0}")]
    InvalidValidatorSet(#[from] ValidatorSetError),
}

/// One validator set member as configured.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorEntry {
    /// Ed25519 public key, 64 hex characters.
    pub public_key: String,
    /// Voting power.
    pub voting_power: u64,
}

/// Rate limiter settings for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Requests per window per client IP.
    pub rate: u32,
    /// Refill window in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            rate: 100,
            window_ms: 1_000,
        }
    }
}

fn default_chain_id() -> String {
    "bedrock-1".to_string()
}

fn default_base_timeout_ms() -> u64 {
    1_000
}

fn default_rpc_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Top-level node configuration, loaded from TOML.
///
/// ```toml
/// chain_id = "bedrock-1"
/// base_timeout_ms = 1000
/// rpc_listen = "0.0.0.0:8080"
///
/// [rate_limit]
/// rate = 100
/// window_ms = 1000
///
/// [[validators]]
/// public_key = "…64 hex chars…"
/// voting_power = 1
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Chain identifier baked into every block header.
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// Round-0 timer duration in milliseconds.
    #[serde(default = "default_base_timeout_ms")]
    pub base_timeout_ms: u64,

    /// Genesis block time, unix seconds.
    #[serde(default)]
    pub genesis_time: i64,

    /// Gateway listen address.
    #[serde(default = "default_rpc_listen")]
    pub rpc_listen: SocketAddr,

    /// Gateway rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// The validator set, identical on every replica.
    pub validators: Vec<ValidatorEntry>,
}

impl NodeConfig {
    /// Derive the consensus configuration.
    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            chain_id: self.chain_id.clone().into_bytes(),
            base_timeout: Duration::from_millis(self.base_timeout_ms),
            genesis_time: self.genesis_time,
            ..ConsensusConfig::default()
        }
    }

    /// Build the validator set from the configured members.
    pub fn validator_set(&self) -> Result<ValidatorSet, ConfigError> {
        let mut validators = Vec::with_capacity(self.validators.len());
        for (index, entry) in self.validators.iter().enumerate() {
            let bytes = hex::decode(&entry.public_key).map_err(|e| {
                ConfigError::InvalidPublicKey {
                    index,
                    reason: e.to_string(),
                }
            })?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| ConfigError::InvalidPublicKey {
                    index,
                    reason: "expected 32 bytes".to_string(),
                })?;
            let public_key =
                PublicKey::from_bytes(&arr).map_err(|e| ConfigError::InvalidPublicKey {
                    index,
                    reason: e.to_string(),
                })?;
            validators.push(Validator::new(public_key, entry.voting_power));
        }
        Ok(ValidatorSet::new(validators)?)
    }

    /// Rate limiter window as a duration.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit.window_ms)
    }
}
