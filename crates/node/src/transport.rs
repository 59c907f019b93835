//! Transport contract.

use tokio::sync::mpsc;
use tracing::warn;

/// Broadcast access to the peer-to-peer layer.
///
/// The transport is an external collaborator: it authenticates peers,
/// gossips encoded envelopes, and delivers inbound bytes to
/// [`crate::NodeHandle::submit_inbound`]. The runner only needs to hand it
/// outbound envelopes; the submit must not block the consensus task.
pub trait Transport: Send + Sync {
    /// Queue an encoded envelope for delivery to all peers.
    fn broadcast(&self, data: Vec<u8>);
}

/// A channel-backed transport: envelopes are pushed into an mpsc channel for
/// a gossip layer (or a test harness) to drain.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelTransport {
    /// Create a transport and the receiving half of its outbound queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (ChannelTransport { outbound }, rx)
    }
}

impl Transport for ChannelTransport {
    fn broadcast(&self, data: Vec<u8>) {
        if self.outbound.send(data).is_err() {
            warn!("outbound queue closed, dropping broadcast");
        }
    }
}
