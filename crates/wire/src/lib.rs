//! Wire envelope for consensus messages.
//!
//! # Wire Format
//!
//! ```text
//! [type_byte: u8][payload: canonical codec bytes]
//! ```
//!
//! Type bytes: `0x01` proposal, `0x02` vote, `0x03` timeout.
//!
//! # Size Limits
//!
//! Per-type size limits are enforced **before** the payload is parsed:
//!
//! | Type | Limit |
//! |---|---|
//! | Proposal | 2 MiB |
//! | Vote | 4 KiB |
//! | Timeout | 4 KiB |
//! | Outer bound | 4 MiB |
//!
//! Votes and timeouts are small fixed-shape messages; allowing 4 MiB for
//! them enables memory amplification through channel buffering
//! (64 peers × 16 buffered × 4 MiB ≈ 4 GiB).
//!
//! Decode failures produce a typed error without partial state, and the
//! input buffer is never retained.

use bedrock_types::codec::{self, CodecError};
use bedrock_types::{Proposal, TimeoutMessage, Vote};
use std::fmt;
use thiserror::Error;

/// Maximum allowed message size (4 MiB). Outer bound checked before the type
/// byte is interpreted.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Proposals carry transactions.
pub const MAX_PROPOSAL_SIZE: usize = 2 * 1024 * 1024;

/// Votes are fixed-shape: hash + height + round + voter + signature.
pub const MAX_VOTE_SIZE: usize = 4 * 1024;

/// Timeouts are fixed-shape plus an optional carried QC.
pub const MAX_TIMEOUT_SIZE: usize = 4 * 1024;

/// Message type byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Proposal = 0x01,
    Vote = 0x02,
    Timeout = 0x03,
}

impl MessageType {
    /// Interpret a wire type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(MessageType::Proposal),
            0x02 => Some(MessageType::Vote),
            0x03 => Some(MessageType::Timeout),
            _ => None,
        }
    }

    /// The per-type payload size limit (envelope byte included).
    pub fn max_size(&self) -> usize {
        match self {
            MessageType::Proposal => MAX_PROPOSAL_SIZE,
            MessageType::Vote => MAX_VOTE_SIZE,
            MessageType::Timeout => MAX_TIMEOUT_SIZE,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Proposal => f.write_str("proposal"),
            MessageType::Vote => f.write_str("vote"),
            MessageType::Timeout => f.write_str("timeout"),
        }
    }
}

/// Errors from envelope decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("empty message")]
    Empty,

    #[error("message too large: {size} > {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("{kind} message too large: {size} > {limit}")]
    TypeTooLarge {
        kind: MessageType,
        size: usize,
        limit: usize,
    },

    #[error("unknown message type: {0:#04x}")]
    UnknownType(u8),

    #[error("payload decode failed: {0}")]
    Codec(#[from] CodecError),
}

/// A typed wire envelope: type byte plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub kind: MessageType,
    pub payload: &'a [u8],
}

/// Parse a wire-format message into an envelope, enforcing the outer bound
/// and the per-type size limit before any payload parsing happens.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope<'_>, WireError> {
    if data.is_empty() {
        return Err(WireError::Empty);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::TooLarge {
            size: data.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }

    let kind = MessageType::from_byte(data[0]).ok_or(WireError::UnknownType(data[0]))?;
    let limit = kind.max_size();
    if data.len() > limit {
        return Err(WireError::TypeTooLarge {
            kind,
            size: data.len(),
            limit,
        });
    }

    Ok(Envelope {
        kind,
        payload: &data[1..],
    })
}

/// A fully decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Proposal(Proposal),
    Vote(Vote),
    Timeout(TimeoutMessage),
}

/// Decode a wire-format message into its domain type.
pub fn decode_message(data: &[u8]) -> Result<WireMessage, WireError> {
    let envelope = decode_envelope(data)?;
    match envelope.kind {
        MessageType::Proposal => Ok(WireMessage::Proposal(codec::decode_proposal(
            envelope.payload,
        )?)),
        MessageType::Vote => Ok(WireMessage::Vote(codec::decode_vote(envelope.payload)?)),
        MessageType::Timeout => Ok(WireMessage::Timeout(codec::decode_timeout(
            envelope.payload,
        )?)),
    }
}

fn encode_with_type(kind: MessageType, payload: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(kind as u8);
    buf.extend_from_slice(&payload);
    buf
}

/// Serialize a proposal into wire format.
pub fn encode_proposal(proposal: &Proposal) -> Vec<u8> {
    encode_with_type(MessageType::Proposal, codec::encode_proposal(proposal))
}

/// Serialize a vote into wire format.
pub fn encode_vote(vote: &Vote) -> Vec<u8> {
    encode_with_type(MessageType::Vote, codec::encode_vote(vote))
}

/// Serialize a timeout message into wire format.
pub fn encode_timeout(tm: &TimeoutMessage) -> Vec<u8> {
    encode_with_type(MessageType::Timeout, codec::encode_timeout(tm))
}
