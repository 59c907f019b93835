//! End-to-end consensus scenarios over a cluster of in-process engines.
//!
//! The harness routes every `Action::Broadcast` to all other replicas and
//! feeds `Action::EnqueueInternal` back to the issuing replica ahead of
//! external messages, mirroring the runner's delivery order. Timers are
//! driven explicitly by the individual scenarios.

use bedrock_consensus::{ConsensusConfig, Engine, RecoveredState};
use bedrock_core::{Action, EmptyPayloads, Event, OutboundMessage};
use bedrock_types::{
    Block, Hash, KeyPair, QuorumCertificate, Signature, TimeoutMessage, Validator, ValidatorSet,
    Vote,
};
use std::collections::VecDeque;
use std::sync::Arc;

struct Cluster {
    keys: Vec<KeyPair>,
    validators: Arc<ValidatorSet>,
    engines: Vec<Engine>,
    commits: Vec<Vec<Block>>,
    queue: VecDeque<(usize, Event)>,
}

/// Delivery filter: return false to drop an outbound message (models a
/// silent or partitioned sender).
type Filter = fn(usize, &OutboundMessage) -> bool;

fn deliver_all(_: usize, _: &OutboundMessage) -> bool {
    true
}

fn event_for(message: &OutboundMessage) -> Event {
    match message {
        OutboundMessage::Proposal(p) => Event::ProposalReceived {
            proposal: p.clone(),
        },
        OutboundMessage::Vote(v) => Event::VoteReceived { vote: v.clone() },
        OutboundMessage::Timeout(t) => Event::TimeoutMessageReceived { message: t.clone() },
    }
}

impl Cluster {
    fn new(n: u8) -> Self {
        let keys: Vec<KeyPair> = (1..=n).map(|i| KeyPair::from_seed(&[i; 32])).collect();
        let validators = Arc::new(
            ValidatorSet::new(
                keys.iter()
                    .map(|k| Validator::new(k.public_key(), 1))
                    .collect(),
            )
            .unwrap(),
        );
        let engines: Vec<Engine> = keys
            .iter()
            .map(|k| {
                Engine::new(
                    ConsensusConfig::default(),
                    k.clone(),
                    validators.clone(),
                    Box::new(EmptyPayloads),
                    RecoveredState::default(),
                )
            })
            .collect();
        let commits = vec![Vec::new(); engines.len()];
        Cluster {
            keys,
            validators,
            engines,
            commits,
            queue: VecDeque::new(),
        }
    }

    fn proposer_index(&self, height: u64, round: u64) -> usize {
        let address = self.validators.proposer_for(height, round).address;
        self.engines
            .iter()
            .position(|e| e.address() == address)
            .unwrap()
    }

    fn dispatch(&mut self, from: usize, actions: Vec<Action>, filter: Filter) {
        for action in actions {
            match action {
                Action::Broadcast { message } => {
                    if !filter(from, &message) {
                        continue;
                    }
                    for to in 0..self.engines.len() {
                        if to != from {
                            self.queue.push_back((to, event_for(&message)));
                        }
                    }
                }
                Action::EnqueueInternal { event } => {
                    self.queue.push_front((from, event));
                }
                Action::CommitBlocks { blocks, .. } => {
                    self.commits[from].extend(blocks);
                }
                Action::ScheduleRoundTimeout { .. }
                | Action::PersistVote { .. }
                | Action::PersistLockedQc { .. } => {}
            }
        }
    }

    fn start_all(&mut self, filter: Filter) {
        for i in 0..self.engines.len() {
            let actions = self.engines[i].start();
            self.dispatch(i, actions, filter);
        }
    }

    fn fire_timers(&mut self, height: u64, round: u64) {
        for i in 0..self.engines.len() {
            self.queue.push_back((i, Event::RoundTimeout { height, round }));
        }
    }

    /// Drain the message queue until `done` holds on every engine or the
    /// step budget runs out. The chain grows forever on its own, so every
    /// scenario needs a stopping predicate.
    ///
    /// When the queue drains early — a fast replica's proposal can outrun
    /// peers still finishing the previous height — the harness fires each
    /// replica's round timer, exactly as the runner's timers would, and the
    /// timeout path restores progress.
    fn run_until(&mut self, filter: Filter, done: impl Fn(&Engine) -> bool) -> bool {
        for _ in 0..10_000 {
            if self.engines.iter().all(&done) {
                return true;
            }
            match self.queue.pop_front() {
                Some((to, event)) => {
                    let actions = self.engines[to].handle(event);
                    self.dispatch(to, actions, filter);
                }
                None => {
                    for i in 0..self.engines.len() {
                        let (height, round) = (self.engines[i].height(), self.engines[i].round());
                        self.queue.push_back((i, Event::RoundTimeout { height, round }));
                    }
                }
            }
        }
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// S1 — happy path two-chain commit
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn happy_path_commits_through_two_chain() {
    let mut cluster = Cluster::new(4);
    cluster.start_all(deliver_all);

    assert!(
        cluster.run_until(deliver_all, |e| e.committed_height() >= 1),
        "cluster failed to commit height 1"
    );

    // Every replica committed the same height-1 block.
    let first: Vec<Hash> = cluster
        .commits
        .iter()
        .map(|blocks| blocks.first().expect("committed a block").hash())
        .collect();
    assert!(first.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cluster.commits[0][0].header.height, 1);

    // The parent link of the first committed block is the shared genesis.
    let genesis = cluster.engines[0].genesis_hash();
    assert_eq!(cluster.commits[0][0].header.parent_hash, genesis);
}

#[test]
fn chain_keeps_growing_across_heights() {
    let mut cluster = Cluster::new(4);
    cluster.start_all(deliver_all);

    assert!(cluster.run_until(deliver_all, |e| e.committed_height() >= 3));

    // Commits are sequential and parent-linked on every replica.
    for blocks in &cluster.commits {
        for (i, window) in blocks.windows(2).enumerate() {
            assert_eq!(window[0].header.height, i as u64 + 1);
            assert_eq!(window[1].header.parent_hash, window[0].hash());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// S2 — timeout-driven round advance
// ═══════════════════════════════════════════════════════════════════════════

fn drop_first_round_proposals(_: usize, message: &OutboundMessage) -> bool {
    !matches!(
        message,
        OutboundMessage::Proposal(p) if p.block.header.height == 1 && p.round == 0
    )
}

#[test]
fn silent_proposer_is_skipped_after_f_plus_one_timeouts() {
    let mut cluster = Cluster::new(4);

    // Round 0 of height 1 produces no usable proposal; timers fire.
    cluster.start_all(drop_first_round_proposals);
    cluster.fire_timers(1, 0);

    assert!(
        cluster.run_until(drop_first_round_proposals, |e| e.committed_height() >= 1),
        "cluster failed to recover from a silent proposer"
    );

    // The committed height-1 block was proposed in round 1 by the next
    // proposer, not in the silent round.
    for blocks in &cluster.commits {
        assert_eq!(blocks[0].header.height, 1);
        assert_eq!(blocks[0].header.round, 1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// S3 — equivocation evidence
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn equivocating_votes_are_recorded_once() {
    let mut cluster = Cluster::new(4);
    let leader = cluster.proposer_index(1, 0);
    let follower = (leader + 1) % 4;

    // Hand the follower the round's proposal directly.
    let actions = cluster.engines[leader].start();
    let proposal = actions
        .iter()
        .find_map(|a| match a {
            Action::Broadcast {
                message: OutboundMessage::Proposal(p),
            } => Some(p.clone()),
            _ => None,
        })
        .unwrap();
    cluster.engines[follower].start();
    cluster.engines[follower].handle(Event::ProposalReceived {
        proposal: proposal.clone(),
    });

    let byzantine = cluster.keys[leader].clone();
    let hash_a = proposal.block.hash();
    let hash_b = Hash::digest(b"conflicting-block");

    let vote_a = Vote::signed(hash_a, 1, 0, &byzantine);
    let vote_b = Vote::signed(hash_b, 1, 0, &byzantine);

    cluster.engines[follower].handle(Event::VoteReceived { vote: vote_a });
    cluster.engines[follower].handle(Event::VoteReceived { vote: vote_b.clone() });

    let evidence = cluster.engines[follower].evidence();
    assert_eq!(evidence.len(), 1);
    let record = evidence.get(&byzantine.address(), 1, 0).unwrap();
    assert_eq!(record.vote_a.block_hash, hash_a);
    assert_eq!(record.vote_b.block_hash, hash_b);
    assert_eq!(record.verify(&cluster.validators), Ok(()));

    // Replays and further conflicting hashes stay deduplicated.
    cluster.engines[follower].handle(Event::VoteReceived { vote: vote_b });
    cluster.engines[follower].handle(Event::VoteReceived {
        vote: Vote::signed(Hash::digest(b"third-block"), 1, 0, &byzantine),
    });
    assert_eq!(cluster.engines[follower].evidence().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// S4 — forged QC rejection on the timeout path
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn forged_qc_in_timeouts_does_not_move_the_highest_qc() {
    let mut cluster = Cluster::new(4);
    let leader = cluster.proposer_index(1, 0);
    let follower = (leader + 1) % 4;
    cluster.engines[follower].start();

    // A QC with fabricated signatures, claiming a high round.
    let forged_hash = Hash::digest(b"forged-block");
    let mut forged = QuorumCertificate {
        block_hash: forged_hash,
        round: 9,
        votes: cluster
            .keys
            .iter()
            .take(3)
            .map(|k| Vote::signed(forged_hash, 1, 9, k))
            .collect(),
    };
    for vote in &mut forged.votes {
        vote.signature = Signature::zero();
    }

    let senders: Vec<KeyPair> = cluster
        .keys
        .iter()
        .filter(|k| k.address() != cluster.engines[follower].address())
        .take(2)
        .cloned()
        .collect();
    for key in &senders {
        cluster.engines[follower].handle(Event::TimeoutMessageReceived {
            message: TimeoutMessage::signed(1, 0, Some(forged.clone()), key),
        });
    }

    // f+1 timeouts advanced the round, but the forged QC was dropped from
    // the candidate set: the highest QC is still genesis.
    assert_eq!(cluster.engines[follower].round(), 1);
    assert!(cluster.engines[follower].highest_qc().is_genesis());
}

// ═══════════════════════════════════════════════════════════════════════════
// Crash recovery
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn recovered_proposer_does_not_equivocate() {
    let cluster = Cluster::new(4);
    let leader = cluster.proposer_index(1, 0);
    let key = cluster.keys[leader].clone();

    // The replica voted at (1, 0) before crashing.
    let mut engine = Engine::new(
        ConsensusConfig::default(),
        key,
        cluster.validators.clone(),
        Box::new(EmptyPayloads),
        RecoveredState {
            voted: Some((1, 0, Hash::digest(b"pre-crash-block"))),
            ..Default::default()
        },
    );

    // On restart it must not propose (a fresh block would carry a new hash)
    // and must not vote again.
    let actions = engine.start();
    assert!(!actions
        .iter()
        .any(|a| matches!(a, Action::Broadcast { .. })));
}
