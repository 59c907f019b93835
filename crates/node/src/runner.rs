//! The single-writer consensus event loop.

use crate::timers::{RoundTimer, TimeoutEntry};
use crate::{BlockStore, ConsensusStore, NodeMetrics, Transport};
use bedrock_consensus::Engine;
use bedrock_core::{Action, Event, OutboundMessage};
use bedrock_types::{Hash, Proposal, Vote};
use bedrock_wire::{self as wire, WireMessage};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of each inbox. Together with the per-type wire size limits this
/// bounds the memory a flood of peers can pin in queues.
pub const INBOX_CAPACITY: usize = 16;

/// Point-in-time consensus state published for the gateway.
#[derive(Debug, Clone, Default)]
pub struct NodeStatus {
    pub height: u64,
    pub round: u64,
    pub committed_height: u64,
    pub committed_hash: Hash,
    pub evidence_records: usize,
}

/// Submission half of the runner: decodes inbound bytes and routes them to
/// the per-type inboxes. Submissions never block; when an inbox is full the
/// message is dropped with a warning. The protocol is self-healing — missing
/// votes reappear if quorum is reachable elsewhere, and timeout-driven round
/// advancement guarantees progress under drops.
#[derive(Clone)]
pub struct NodeHandle {
    proposal_tx: mpsc::Sender<Proposal>,
    vote_tx: mpsc::Sender<Vote>,
    timeout_tx: mpsc::Sender<TimeoutEntry>,
    metrics: Arc<NodeMetrics>,
}

impl NodeHandle {
    /// Decode an inbound envelope and queue it for the engine.
    pub fn submit_inbound(&self, data: &[u8]) {
        let message = match wire::decode_message(data) {
            Ok(message) => message,
            Err(err) => {
                debug!(%err, len = data.len(), "discarding undecodable message");
                return;
            }
        };

        match message {
            WireMessage::Proposal(proposal) => {
                if self.proposal_tx.try_send(proposal).is_err() {
                    self.drop_message("proposal");
                }
            }
            WireMessage::Vote(vote) => {
                if self.vote_tx.try_send(vote).is_err() {
                    self.drop_message("vote");
                }
            }
            WireMessage::Timeout(message) => {
                if self.timeout_tx.try_send(TimeoutEntry::Peer(message)).is_err() {
                    self.drop_message("timeout");
                }
            }
        }
    }

    fn drop_message(&self, kind: &str) {
        warn!(kind, "inbox full, dropping message");
        self.metrics.dropped_messages.with_label_values(&[kind]).inc();
    }
}

/// Owns the engine and drives it from three bounded inboxes.
///
/// All engine-state mutations happen on this task: internal events are
/// drained first (they are consequences of the event just processed), then
/// one external message is taken per iteration. Shutdown returns without
/// draining.
pub struct NodeRunner {
    engine: Engine,
    transport: Arc<dyn Transport>,
    block_store: Arc<dyn BlockStore>,
    consensus_store: Arc<dyn ConsensusStore>,
    metrics: Arc<NodeMetrics>,
    status: Arc<RwLock<NodeStatus>>,
    shutdown: CancellationToken,

    proposal_rx: mpsc::Receiver<Proposal>,
    vote_rx: mpsc::Receiver<Vote>,
    timeout_rx: mpsc::Receiver<TimeoutEntry>,
    internal: VecDeque<Event>,
    timer: RoundTimer,
}

impl NodeRunner {
    /// Wire up a runner around an engine. Returns the runner and the handle
    /// producers (transport, tests) use to feed it.
    pub fn new(
        engine: Engine,
        transport: Arc<dyn Transport>,
        block_store: Arc<dyn BlockStore>,
        consensus_store: Arc<dyn ConsensusStore>,
        metrics: Arc<NodeMetrics>,
        shutdown: CancellationToken,
    ) -> (Self, NodeHandle) {
        let (proposal_tx, proposal_rx) = mpsc::channel(INBOX_CAPACITY);
        let (vote_tx, vote_rx) = mpsc::channel(INBOX_CAPACITY);
        let (timeout_tx, timeout_rx) = mpsc::channel(INBOX_CAPACITY);

        let handle = NodeHandle {
            proposal_tx,
            vote_tx,
            timeout_tx: timeout_tx.clone(),
            metrics: metrics.clone(),
        };
        let timer = RoundTimer::new(timeout_tx);
        let status = Arc::new(RwLock::new(NodeStatus::default()));

        let runner = NodeRunner {
            engine,
            transport,
            block_store,
            consensus_store,
            metrics,
            status,
            shutdown,
            proposal_rx,
            vote_rx,
            timeout_rx,
            internal: VecDeque::new(),
            timer,
        };
        (runner, handle)
    }

    /// Shared view of the latest consensus status, for the gateway.
    pub fn status(&self) -> Arc<RwLock<NodeStatus>> {
        self.status.clone()
    }

    /// Run the event loop until cancellation.
    pub async fn run(mut self) {
        let actions = self.engine.start();
        self.execute(actions).await;
        self.publish_status().await;

        loop {
            // The internal queue can stay non-empty indefinitely (a lone
            // validator certifies every height immediately), so cancellation
            // is checked before draining it.
            if self.shutdown.is_cancelled() {
                info!("shutdown requested, stopping event loop");
                self.timer.cancel();
                return;
            }

            // Internal events are consequences of the event just processed;
            // they go ahead of any external input. The explicit yield keeps
            // timers and cancellation responsive while the queue is busy.
            if let Some(event) = self.internal.pop_front() {
                self.step(event).await;
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, stopping event loop");
                    self.timer.cancel();
                    return;
                }
                Some(proposal) = self.proposal_rx.recv() => {
                    self.step(Event::ProposalReceived { proposal }).await;
                }
                Some(vote) = self.vote_rx.recv() => {
                    self.step(Event::VoteReceived { vote }).await;
                }
                Some(entry) = self.timeout_rx.recv() => {
                    let event = match entry {
                        TimeoutEntry::Peer(message) => Event::TimeoutMessageReceived { message },
                        TimeoutEntry::Timer { height, round } => {
                            Event::RoundTimeout { height, round }
                        }
                    };
                    self.step(event).await;
                }
            }
        }
    }

    async fn step(&mut self, event: Event) {
        self.engine.set_time(unix_now());
        let actions = self.engine.handle(event);
        self.execute(actions).await;
        self.publish_status().await;
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast { message } => {
                    let data = encode_outbound(&message);
                    self.transport.broadcast(data);
                }
                Action::ScheduleRoundTimeout {
                    height,
                    round,
                    duration,
                } => {
                    self.timer.arm(height, round, duration);
                }
                Action::PersistVote {
                    height,
                    round,
                    block_hash,
                } => {
                    // Ordered before the vote broadcast in the action list;
                    // a failure here must stop the vote from going out.
                    if let Err(err) = self.consensus_store.save_vote(height, round, block_hash) {
                        error!(%err, "failed to persist own vote; halting");
                        self.shutdown.cancel();
                        return;
                    }
                }
                Action::PersistLockedQc { qc } => {
                    if let Err(err) = self.consensus_store.save_locked_qc(&qc) {
                        error!(%err, "failed to persist locked QC; halting");
                        self.shutdown.cancel();
                        return;
                    }
                }
                Action::CommitBlocks { blocks, qc } => {
                    match self.block_store.commit(&blocks, &qc) {
                        Ok(()) => {
                            self.metrics
                                .committed_height
                                .set(self.engine.committed_height() as i64);
                        }
                        Err(err) => {
                            // A consensus-invariant violation at the sink:
                            // halting beats diverging from the committed chain.
                            error!(%err, "block store rejected committed blocks; halting");
                            self.shutdown.cancel();
                            return;
                        }
                    }
                }
                Action::EnqueueInternal { event } => {
                    self.internal.push_back(event);
                }
            }
        }
    }

    async fn publish_status(&self) {
        self.metrics.current_height.set(self.engine.height() as i64);
        self.metrics.current_round.set(self.engine.round() as i64);
        self.metrics
            .evidence_records
            .set(self.engine.evidence().len() as i64);

        let mut status = self.status.write().await;
        *status = NodeStatus {
            height: self.engine.height(),
            round: self.engine.round(),
            committed_height: self.engine.committed_height(),
            committed_hash: self.engine.committed_hash(),
            evidence_records: self.engine.evidence().len(),
        };
    }
}

fn encode_outbound(message: &OutboundMessage) -> Vec<u8> {
    match message {
        OutboundMessage::Proposal(proposal) => wire::encode_proposal(proposal),
        OutboundMessage::Vote(vote) => wire::encode_vote(vote),
        OutboundMessage::Timeout(tm) => wire::encode_timeout(tm),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelTransport, InMemoryBlockStore, InMemoryConsensusStore};
    use bedrock_consensus::{ConsensusConfig, RecoveredState};
    use bedrock_core::EmptyPayloads;
    use bedrock_types::{KeyPair, Validator, ValidatorSet};
    use std::time::Duration;

    fn single_validator_runner() -> (NodeRunner, NodeHandle, Arc<InMemoryBlockStore>, KeyPair) {
        let key = KeyPair::from_seed(&[1; 32]);
        let validators = Arc::new(
            ValidatorSet::new(vec![Validator::new(key.public_key(), 1)]).unwrap(),
        );
        let engine = Engine::new(
            ConsensusConfig::default(),
            key.clone(),
            validators,
            Box::new(EmptyPayloads),
            RecoveredState::default(),
        );

        let (transport, _outbound) = ChannelTransport::new();
        let block_store = Arc::new(InMemoryBlockStore::new());
        let (runner, handle) = NodeRunner::new(
            engine,
            Arc::new(transport),
            block_store.clone(),
            Arc::new(InMemoryConsensusStore::new()),
            Arc::new(NodeMetrics::new()),
            CancellationToken::new(),
        );
        (runner, handle, block_store, key)
    }

    #[tokio::test]
    async fn single_validator_commits_on_its_own() {
        // With one validator of power 1 the quorum threshold is 1, so the
        // node proposes, votes, certifies, and commits without a network.
        let (runner, _handle, block_store, _key) = single_validator_runner();
        let shutdown = runner.shutdown.clone();
        let status = runner.status();

        let task = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap();

        let latest = block_store.latest().unwrap();
        assert!(latest.is_some_and(|(height, _)| height >= 1));
        assert!(status.read().await.committed_height >= 1);
    }

    #[tokio::test]
    async fn full_inbox_drops_submissions() {
        let (runner, handle, _store, key) = single_validator_runner();
        // Keep the runner parked (not spawned) so nothing drains the
        // inboxes, but alive so the channels stay open.
        let _runner = runner;

        let vote = bedrock_types::Vote::signed(Hash::digest(b"block"), 1, 0, &key);
        let encoded = wire::encode_vote(&vote);
        for _ in 0..INBOX_CAPACITY + 4 {
            handle.submit_inbound(&encoded);
        }

        let dropped = handle
            .metrics
            .dropped_messages
            .with_label_values(&["vote"])
            .get();
        assert_eq!(dropped, 4);
    }

    #[tokio::test]
    async fn undecodable_bytes_are_discarded_quietly() {
        let (runner, handle, _store, _key) = single_validator_runner();
        let _runner = runner;

        handle.submit_inbound(&[]);
        handle.submit_inbound(&[0x7f, 1, 2, 3]);
        handle.submit_inbound(&[0x02, 0x0a, 0xff, 0x01]);

        // Nothing decodable was queued, so nothing was dropped either.
        let dropped = handle
            .metrics
            .dropped_messages
            .with_label_values(&["vote"])
            .get();
        assert_eq!(dropped, 0);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_promptly() {
        let (runner, _handle, _store, _key) = single_validator_runner();
        let shutdown = runner.shutdown.clone();

        let task = tokio::spawn(runner.run());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop did not stop")
            .unwrap();
    }
}
