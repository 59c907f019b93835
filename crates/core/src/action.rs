//! Action types for the consensus state machine.

use crate::{Event, OutboundMessage};
use bedrock_types::{Block, Hash, QuorumCertificate};
use std::time::Duration;

/// Actions the engine wants performed.
///
/// Actions are **commands** — they describe something to do. The runner
/// executes them and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Broadcast a message to all replicas via the transport.
    Broadcast { message: OutboundMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Arm the round timer. A previously armed timer for an older round is
    /// superseded; stale firings are identified by their (height, round).
    ScheduleRoundTimeout {
        height: u64,
        round: u64,
        duration: Duration,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Storage
    // ═══════════════════════════════════════════════════════════════════════
    /// Persist our own vote.
    ///
    /// **Safety critical**: must complete before the vote broadcast is
    /// visible. After a crash we must remember what we voted for, or a
    /// restart could equivocate.
    PersistVote {
        height: u64,
        round: u64,
        block_hash: Hash,
    },

    /// Persist the locked QC whenever the lock moves. Restored on startup;
    /// safety depends on it surviving restarts.
    PersistLockedQc { qc: QuorumCertificate },

    /// Hand newly committed blocks to the block store, lowest height first,
    /// with the QC that finalized the chain tip. The sink must be durable
    /// before acknowledging.
    CommitBlocks {
        blocks: Vec<Block>,
        qc: QuorumCertificate,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event, processed before any external input.
    EnqueueInternal { event: Event },
}

impl Action {
    /// Action type name for logs and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::ScheduleRoundTimeout { .. } => "ScheduleRoundTimeout",
            Action::PersistVote { .. } => "PersistVote",
            Action::PersistLockedQc { .. } => "PersistLockedQc",
            Action::CommitBlocks { .. } => "CommitBlocks",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
        }
    }
}
