//! Outbound message types for network communication.

use bedrock_types::{Proposal, TimeoutMessage, Vote};

/// Outbound network messages.
///
/// These are the messages a replica can send to other replicas. The runner
/// handles envelope encoding and the actual network I/O.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Block proposal for the current round.
    Proposal(Proposal),

    /// Vote on a proposed block.
    Vote(Vote),

    /// Round-timer expiry declaration carrying our highest QC.
    Timeout(TimeoutMessage),
}

impl OutboundMessage {
    /// Message type name for logs and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Proposal(_) => "Proposal",
            OutboundMessage::Vote(_) => "Vote",
            OutboundMessage::Timeout(_) => "Timeout",
        }
    }
}
