//! Event types for the consensus state machine.

use bedrock_types::{Proposal, TimeoutMessage, Vote};

/// All possible inputs to the engine.
///
/// Events are **passive data** — they describe something that happened. The
/// engine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Network messages
    //
    // Sender identity comes from the signed message contents, never from the
    // transport.
    // ═══════════════════════════════════════════════════════════════════════
    /// A proposal arrived from a peer.
    ProposalReceived { proposal: Proposal },

    /// A vote arrived from a peer.
    VoteReceived { vote: Vote },

    /// A timeout message arrived from a peer.
    TimeoutMessageReceived { message: TimeoutMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// The round timer fired. Carries the (height, round) it was armed for;
    /// the engine drops firings for rounds it has already left, which is how
    /// timer cancellation is expressed.
    RoundTimeout { height: u64, round: u64 },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal
    //
    // Fed back by the runner from `Action::EnqueueInternal`, ahead of any
    // external input.
    // ═══════════════════════════════════════════════════════════════════════
    /// Commit evaluation finished; move to the next height.
    NextHeight,
}

impl Event {
    /// Event type name for logs and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ProposalReceived { .. } => "ProposalReceived",
            Event::VoteReceived { .. } => "VoteReceived",
            Event::TimeoutMessageReceived { .. } => "TimeoutMessageReceived",
            Event::RoundTimeout { .. } => "RoundTimeout",
            Event::NextHeight => "NextHeight",
        }
    }
}
