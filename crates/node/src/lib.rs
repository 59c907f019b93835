//! Production runner and gateway for Bedrock consensus.
//!
//! This crate hosts everything around the pure consensus engine:
//!
//! - [`NodeRunner`]: the single-writer event loop that owns the engine,
//!   drains the bounded inboxes, executes actions, and drives timers
//! - [`Transport`]: the narrow broadcast contract the runner produces to
//! - [`BlockStore`] / [`ConsensusStore`]: storage contracts (committed
//!   blocks, crash-safety state) with in-memory and file-backed impls
//! - [`rpc`]: the axum HTTP gateway with per-IP rate limiting
//! - [`telemetry`] / [`NodeMetrics`]: tracing setup and Prometheus metrics
//!
//! The engine performs no I/O of its own; every side effect an event causes
//! is returned as an `Action` and executed here, in order.

mod config;
mod metrics;
mod runner;
mod storage;
mod timers;
mod transport;

pub mod rpc;
pub mod telemetry;

pub use config::{ConfigError, NodeConfig, RateLimitSettings, ValidatorEntry};
pub use metrics::NodeMetrics;
pub use runner::{NodeHandle, NodeRunner, NodeStatus, INBOX_CAPACITY};
pub use storage::{
    BlockStore, ConsensusStore, FileConsensusStore, InMemoryBlockStore, InMemoryConsensusStore,
    StorageError,
};
pub use timers::{RoundTimer, TimeoutEntry};
pub use transport::{ChannelTransport, Transport};
