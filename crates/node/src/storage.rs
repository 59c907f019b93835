//! Storage contracts and reference implementations.
//!
//! Two narrow interfaces back the consensus core:
//!
//! - [`BlockStore`]: the committed-chain sink and read path for the gateway.
//!   Must be durable before acknowledging a commit.
//! - [`ConsensusStore`]: crash-safety state — our own last vote and the
//!   locked QC. Safety depends on both surviving restarts, which is why the
//!   file-backed implementation fsyncs before returning.
//!
//! Production deployments supply their own `BlockStore` engine; the
//! in-memory implementation here backs tests and the gateway read API.

use bedrock_consensus::RecoveredState;
use bedrock_types::{codec, Block, Hash, QuorumCertificate};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] codec::CodecError),

    #[error("corrupt consensus state: {0}")]
    Corrupt(&'static str),

    #[error("non-sequential commit: expected height {expected}, got {got}")]
    NonSequentialCommit { expected: u64, got: u64 },
}

/// Sink and read path for committed blocks.
pub trait BlockStore: Send + Sync {
    /// Append committed blocks, lowest height first, with the QC that
    /// finalized the chain tip. Must be durable before returning.
    fn commit(&self, blocks: &[Block], qc: &QuorumCertificate) -> Result<(), StorageError>;

    /// Fetch a committed block by height.
    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError>;

    /// Height and hash of the latest committed block.
    fn latest(&self) -> Result<Option<(u64, Hash)>, StorageError>;
}

/// Crash-safety state: own votes and the locked QC.
pub trait ConsensusStore: Send + Sync {
    /// Record our own vote. Must be durable before the vote is broadcast.
    fn save_vote(&self, height: u64, round: u64, block_hash: Hash) -> Result<(), StorageError>;

    /// Record the locked QC.
    fn save_locked_qc(&self, qc: &QuorumCertificate) -> Result<(), StorageError>;

    /// Restore persisted consensus state (fresh default if nothing stored).
    fn load(&self) -> Result<RecoveredState, StorageError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// In-memory implementations
// ═══════════════════════════════════════════════════════════════════════════

/// Block store backed by a map. Durability is trivially satisfied; used by
/// tests and as the gateway's read cache.
#[derive(Default)]
pub struct InMemoryBlockStore {
    inner: RwLock<BTreeMap<u64, Block>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed blocks.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockStore for InMemoryBlockStore {
    fn commit(&self, blocks: &[Block], _qc: &QuorumCertificate) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for block in blocks {
            let height = block.header.height;
            let expected = inner.last_key_value().map(|(h, _)| h + 1).unwrap_or(1);
            if height != expected {
                return Err(StorageError::NonSequentialCommit {
                    expected,
                    got: height,
                });
            }
            inner.insert(height, block.clone());
        }
        Ok(())
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.get(&height).cloned())
    }

    fn latest(&self) -> Result<Option<(u64, Hash)>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.last_key_value().map(|(h, b)| (*h, b.hash())))
    }
}

/// Consensus store that forgets on restart. Tests only.
#[derive(Default)]
pub struct InMemoryConsensusStore {
    state: Mutex<RecoveredState>,
}

impl InMemoryConsensusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsensusStore for InMemoryConsensusStore {
    fn save_vote(&self, height: u64, round: u64, block_hash: Hash) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.voted = Some((height, round, block_hash));
        Ok(())
    }

    fn save_locked_qc(&self, qc: &QuorumCertificate) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.locked_qc = Some(qc.clone());
        state.highest_qc = Some(qc.clone());
        Ok(())
    }

    fn load(&self) -> Result<RecoveredState, StorageError> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// File-backed consensus store
// ═══════════════════════════════════════════════════════════════════════════

/// File format: `[vote_present: u8][height: 8][round: 8][block_hash: 32]`
/// followed by `[qc_len: 4][qc: canonical bytes]` when a locked QC exists.
const VOTE_RECORD_LEN: usize = 1 + 8 + 8 + 32;

/// Consensus store persisted to a single file, rewritten atomically
/// (write temp, fsync, rename) on every update.
///
/// Updates are tiny and infrequent — one per own vote and one per lock move
/// — so a full rewrite is simpler than a log and has no replay path to get
/// wrong.
pub struct FileConsensusStore {
    path: PathBuf,
    state: Mutex<RecoveredState>,
}

impl FileConsensusStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read(&path) {
            Ok(bytes) => Self::parse(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => RecoveredState::default(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), "opened consensus store");
        Ok(FileConsensusStore {
            path,
            state: Mutex::new(state),
        })
    }

    fn parse(bytes: &[u8]) -> Result<RecoveredState, StorageError> {
        if bytes.len() < VOTE_RECORD_LEN {
            return Err(StorageError::Corrupt("truncated vote record"));
        }
        let mut state = RecoveredState::default();

        if bytes[0] == 1 {
            let height = u64::from_le_bytes(bytes[1..9].try_into().expect("8 bytes"));
            let round = u64::from_le_bytes(bytes[9..17].try_into().expect("8 bytes"));
            let hash: [u8; 32] = bytes[17..49].try_into().expect("32 bytes");
            state.voted = Some((height, round, Hash::new(hash)));
        }

        let rest = &bytes[VOTE_RECORD_LEN..];
        if !rest.is_empty() {
            if rest.len() < 4 {
                return Err(StorageError::Corrupt("truncated QC length"));
            }
            let len = u32::from_le_bytes(rest[..4].try_into().expect("4 bytes")) as usize;
            if rest.len() < 4 + len {
                return Err(StorageError::Corrupt("truncated QC record"));
            }
            let qc = codec::decode_qc(&rest[4..4 + len])?;
            state.highest_qc = Some(qc.clone());
            state.locked_qc = Some(qc);
        }
        Ok(state)
    }

    fn write_out(&self, state: &RecoveredState) -> Result<(), StorageError> {
        let mut buf = Vec::with_capacity(256);
        match state.voted {
            Some((height, round, hash)) => {
                buf.push(1);
                buf.extend_from_slice(&height.to_le_bytes());
                buf.extend_from_slice(&round.to_le_bytes());
                buf.extend_from_slice(hash.as_bytes());
            }
            None => buf.extend_from_slice(&[0u8; VOTE_RECORD_LEN]),
        }
        if let Some(qc) = &state.locked_qc {
            let encoded = codec::encode_qc(qc);
            buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            buf.extend_from_slice(&encoded);
        }

        // Atomic replace: a crash mid-write leaves the old state intact.
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ConsensusStore for FileConsensusStore {
    fn save_vote(&self, height: u64, round: u64, block_hash: Hash) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.voted = Some((height, round, block_hash));
        self.write_out(&state)
    }

    fn save_locked_qc(&self, qc: &QuorumCertificate) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.locked_qc = Some(qc.clone());
        state.highest_qc = Some(qc.clone());
        self.write_out(&state)
    }

    fn load(&self) -> Result<RecoveredState, StorageError> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
