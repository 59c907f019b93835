//! BFT consensus state machine.
//!
//! This crate provides a synchronous BFT consensus implementation driven
//! entirely through events:
//!
//! - `Event::ProposalReceived` → validate, store, vote (locked-QC permitting)
//! - `Event::VoteReceived` → collect votes, form QC when quorum reached
//! - `Event::TimeoutMessageReceived` → collect timeouts, advance round at f+1
//! - `Event::RoundTimeout` → broadcast our own timeout message
//! - `Event::NextHeight` → reset round state and start the next height
//!
//! All I/O is performed by the runner via returned `Action`s.
//!
//! # Terminology
//!
//! - **Height**: position in the chain (1, 2, ...). Strictly sequential; a
//!   block at height N extends a certified block at height N−1.
//!
//! - **Round**: attempt number within a height. Incremented when f+1 voting
//!   power declares a timeout; reset to 0 when the height advances.
//!
//! - **QC (Quorum Certificate)**: votes from 2f+1 voting power proving a
//!   block was accepted in a round. Carried by the next proposal as its
//!   justification.
//!
//! # Safety
//!
//! - **Locked QC**: a replica never votes for a proposal that abandons its
//!   locked block unless the proposal's justification is at least as recent
//!   as the lock. The lock moves to every QC the replica forms.
//!
//! - **Quorum intersection**: two 2f+1 quorums overlap in an honest
//!   validator, so conflicting blocks cannot both be certified in a round.
//!
//! - **Two-chain commit**: a certified block is committed once a QC forms
//!   for a certified descendant, so a commit is always backed by two chained
//!   certificates.
//!
//! # Liveness
//!
//! - **f+1 round advancement**: a round is abandoned only when f+1 voting
//!   power — at least one honest replica — has declared a timeout, so a
//!   single Byzantine validator cannot force round skips.
//!
//! - **Exponential backoff**: the round timer doubles each round within a
//!   height, giving a lagging proposer time to catch up.

mod config;
mod engine;
mod evidence_pool;
mod fork_choice;
mod timeout_collector;
mod vote_set;

pub use config::ConsensusConfig;
pub use engine::{Engine, RecoveredState, Step};
pub use evidence_pool::EvidencePool;
pub use fork_choice::fork_choice;
pub use timeout_collector::{TimeoutCollector, TimeoutError};
pub use vote_set::{VoteOutcome, VoteSet, VoteSetError};
