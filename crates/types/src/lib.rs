//! Core types for Bedrock consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: [`Hash`], [`Address`], cryptographic keys and signatures
//! - **Consensus types**: [`Block`], [`BlockHeader`], [`Vote`], [`Proposal`],
//!   [`TimeoutMessage`], [`QuorumCertificate`]
//! - **Membership**: [`Validator`], [`ValidatorSet`] with voting-power
//!   thresholds
//! - **Misbehavior**: [`Equivocation`] evidence
//! - **Canonical codec**: deterministic, protobuf-compatible encoding used
//!   for hashing, signing, and the wire format
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.
//!
//! Every byte representation that other replicas hash, sign, or verify lives
//! in [`codec`]. The encoding is pinned by golden vectors committed in that
//! module; changing it is a breaking consensus upgrade.

mod block;
mod crypto;
mod evidence;
mod hash;
mod quorum_certificate;
mod timeout;
mod validator;
mod vote;

pub mod codec;

pub use block::{compute_tx_root, Block, BlockHeader};
pub use crypto::{Address, KeyPair, PublicKey, Signature};
pub use evidence::{Equivocation, EvidenceError};
pub use hash::{Hash, HexError};
pub use quorum_certificate::{QcError, QuorumCertificate};
pub use timeout::TimeoutMessage;
pub use validator::{Validator, ValidatorSet, ValidatorSetError};
pub use vote::{Proposal, Vote};
