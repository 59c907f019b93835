//! The consensus engine state machine.

use crate::{ConsensusConfig, EvidencePool, TimeoutCollector, VoteSet, VoteSetError};
use bedrock_core::{Action, Event, OutboundMessage, PayloadProvider};
use bedrock_types::{
    compute_tx_root, Address, Block, BlockHeader, Hash, KeyPair, Proposal, QcError,
    QuorumCertificate, TimeoutMessage, ValidatorSet, Vote,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Step within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Waiting for (or building) the round's proposal.
    Propose,
    /// Proposal accepted; collecting votes.
    Vote,
    /// Quorum reached; commit evaluated, next height pending.
    Commit,
}

/// State recovered from storage on startup.
///
/// Passed to [`Engine::new`] to restore consensus state after a
/// crash/restart. For a fresh start, use `RecoveredState::default()`.
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    /// Last committed block height (0 = only genesis).
    pub committed_height: u64,

    /// Hash of the last committed block (None for fresh start).
    pub committed_hash: Option<Hash>,

    /// Highest QC observed before shutdown.
    pub highest_qc: Option<QuorumCertificate>,

    /// Locked QC before shutdown. **Safety critical**: voting rules depend
    /// on it surviving restarts.
    pub locked_qc: Option<QuorumCertificate>,

    /// Our own last vote as (height, round, block_hash). **Safety
    /// critical**: prevents equivocation after restart.
    pub voted: Option<(u64, u64, Hash)>,
}

/// Why a proposal was rejected.
#[derive(Debug, Error)]
enum ProposalError {
    #[error("header round {header} does not match proposal round {proposal}")]
    RoundMismatch { header: u64, proposal: u64 },

    #[error("chain id does not match")]
    ChainMismatch,

    #[error("proposer {got} is not the designated proposer {want}")]
    WrongProposer { want: Address, got: Address },

    #[error("invalid proposal signature")]
    InvalidSignature,

    #[error("proposal carries no justify QC")]
    MissingJustify,

    #[error("justify QC rejected: {0}")]
    JustifyInvalid(#[from] QcError),

    #[error("justify QC for height {justify} cannot justify a block at height {block}")]
    JustifyHeightMismatch { justify: u64, block: u64 },

    #[error("parent hash does not match the justified block")]
    ParentMismatch,

    #[error("transaction root does not match block contents")]
    TxRootMismatch,
}

/// BFT consensus engine for one replica.
///
/// Exclusively owns all consensus state; every mutation flows through
/// [`Engine::handle`] on the single consensus task, which makes each handler
/// atomic with respect to the others.
///
/// # State Machine Flow
///
/// 1. **Enter round** → arm the round timer; the designated proposer builds
///    and broadcasts a proposal extending the highest QC's block
/// 2. **Proposal received** → validate, store, vote (locked-QC permitting)
/// 3. **Vote received** → aggregate; on 2f+1 form a QC, evaluate the
///    two-chain commit rule, signal next height
/// 4. **Timer fired** → broadcast a timeout carrying our highest QC
/// 5. **f+1 timeouts** → adopt the highest carried QC, advance the round
pub struct Engine {
    // ═══════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════
    config: ConsensusConfig,
    signing_key: KeyPair,
    address: Address,
    validators: Arc<ValidatorSet>,
    payloads: Box<dyn PayloadProvider>,

    // ═══════════════════════════════════════════════════════════════════════
    // Round state
    // ═══════════════════════════════════════════════════════════════════════
    height: u64,
    round: u64,
    step: Step,
    proposal: Option<Proposal>,
    vote_set: VoteSet,
    timeout_collector: TimeoutCollector,

    // ═══════════════════════════════════════════════════════════════════════
    // Chain state
    // ═══════════════════════════════════════════════════════════════════════
    highest_qc: QuorumCertificate,
    locked_qc: QuorumCertificate,
    committed_height: u64,
    committed_hash: Hash,
    genesis_hash: Hash,

    /// Known uncommitted blocks by header hash. Every entry arrived through
    /// a validated proposal, so each one extends a certified parent.
    blocks: HashMap<Hash, Block>,

    /// Our own last vote as (height, round, block_hash).
    voted: Option<(u64, u64, Hash)>,

    evidence: EvidencePool,

    /// Wall-clock unix seconds, set by the runner before each handle call.
    now_unix: i64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("address", &self.address)
            .field("height", &self.height)
            .field("round", &self.round)
            .field("step", &self.step)
            .field("committed_height", &self.committed_height)
            .field("blocks", &self.blocks.len())
            .field("evidence", &self.evidence.len())
            .finish()
    }
}

impl Engine {
    /// Create an engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Consensus configuration (chain id, timeouts)
    /// * `signing_key` - Key for signing votes, proposals, and timeouts
    /// * `validators` - The frozen validator set for this era
    /// * `payloads` - Source of block contents when this replica proposes
    /// * `recovered` - State restored from storage; default for fresh start
    pub fn new(
        config: ConsensusConfig,
        signing_key: KeyPair,
        validators: Arc<ValidatorSet>,
        payloads: Box<dyn PayloadProvider>,
        recovered: RecoveredState,
    ) -> Self {
        let genesis_hash = Self::genesis_header(&config).hash();
        let highest_qc = recovered.highest_qc.unwrap_or_else(QuorumCertificate::genesis);
        let locked_qc = recovered.locked_qc.unwrap_or_else(QuorumCertificate::genesis);
        let committed_hash = recovered.committed_hash.unwrap_or(genesis_hash);

        // The working height is one above the certified tip, which may be
        // ahead of the committed height while the two-chain rule catches up.
        let height = (recovered.committed_height + 1).max(highest_qc.height() + 1);

        let address = signing_key.address();
        let vote_set = VoteSet::new(height, 0, validators.clone());
        let timeout_collector = TimeoutCollector::new(height, 0, validators.clone());

        Engine {
            config,
            signing_key,
            address,
            validators,
            payloads,
            height,
            round: 0,
            step: Step::Propose,
            proposal: None,
            vote_set,
            timeout_collector,
            highest_qc,
            locked_qc,
            committed_height: recovered.committed_height,
            committed_hash,
            genesis_hash,
            blocks: HashMap::new(),
            voted: recovered.voted,
            evidence: EvidencePool::new(),
            now_unix: 0,
        }
    }

    /// The genesis header for a configuration. Identical on every replica
    /// with the same chain id, which is what anchors parent links at height 1.
    fn genesis_header(config: &ConsensusConfig) -> BlockHeader {
        BlockHeader {
            height: 0,
            round: 0,
            parent_hash: Hash::ZERO,
            state_root: Hash::ZERO,
            tx_root: Hash::ZERO,
            receipt_root: Hash::ZERO,
            block_time: config.genesis_time,
            chain_id: config.chain_id.clone(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn committed_height(&self) -> u64 {
        self.committed_height
    }

    pub fn committed_hash(&self) -> Hash {
        self.committed_hash
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.highest_qc
    }

    pub fn locked_qc(&self) -> &QuorumCertificate {
        &self.locked_qc
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_hash
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn evidence(&self) -> &EvidencePool {
        &self.evidence
    }

    /// Set wall-clock time, unix seconds. Called by the runner before each
    /// handle call; only stamped into proposed headers.
    pub fn set_time(&mut self, now_unix: i64) {
        self.now_unix = now_unix;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event dispatch
    // ═══════════════════════════════════════════════════════════════════════

    /// Begin consensus at the current height. Call once after construction.
    pub fn start(&mut self) -> Vec<Action> {
        info!(
            replica = %self.address,
            height = self.height,
            committed = self.committed_height,
            "starting consensus"
        );
        self.enter_propose()
    }

    /// Process one event. The caller guarantees handle calls never overlap.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::ProposalReceived { proposal } => self.handle_proposal(proposal),
            Event::VoteReceived { vote } => self.handle_vote(vote),
            Event::TimeoutMessageReceived { message } => self.handle_timeout_message(message),
            Event::RoundTimeout { height, round } => self.handle_round_timeout(height, round),
            Event::NextHeight => self.handle_next_height(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposals
    // ═══════════════════════════════════════════════════════════════════════

    fn handle_proposal(&mut self, proposal: Proposal) -> Vec<Action> {
        if proposal.block.header.height != self.height {
            debug!(
                got = proposal.block.header.height,
                want = self.height,
                "ignoring proposal for wrong height"
            );
            return vec![];
        }
        if proposal.round != self.round {
            debug!(
                got = proposal.round,
                want = self.round,
                "ignoring proposal for wrong round"
            );
            return vec![];
        }
        // First writer wins for a round.
        if self.proposal.is_some() {
            trace!("already have a proposal for this round");
            return vec![];
        }

        if let Err(err) = self.validate_proposal(&proposal) {
            warn!(%err, proposer = %proposal.proposer, "invalid proposal");
            return vec![];
        }

        // QCs propagate through proposals; a valid justification may be
        // newer than anything we have seen.
        if let Some(justify) = &proposal.justify_qc {
            self.adopt_qc(justify);
        }

        let block_hash = proposal.block.hash();
        debug!(
            height = self.height,
            round = self.round,
            block_hash = %block_hash,
            proposer = %proposal.proposer,
            "accepted proposal"
        );
        self.blocks.insert(block_hash, proposal.block.clone());
        self.proposal = Some(proposal);

        if self.step == Step::Propose {
            self.enter_vote()
        } else {
            vec![]
        }
    }

    fn validate_proposal(&self, proposal: &Proposal) -> Result<(), ProposalError> {
        let header = &proposal.block.header;

        if header.round != proposal.round {
            return Err(ProposalError::RoundMismatch {
                header: header.round,
                proposal: proposal.round,
            });
        }
        if header.chain_id != self.config.chain_id {
            return Err(ProposalError::ChainMismatch);
        }

        let expected = self.validators.proposer_for(self.height, self.round).address;
        if proposal.proposer != expected {
            return Err(ProposalError::WrongProposer {
                want: expected,
                got: proposal.proposer,
            });
        }
        // The designated proposer is in the set by construction.
        let proposer = self
            .validators
            .get_by_address(&proposal.proposer)
            .ok_or(ProposalError::WrongProposer {
                want: expected,
                got: proposal.proposer,
            })?;
        if !proposer
            .public_key
            .verify(&proposal.sign_bytes(), &proposal.signature)
        {
            return Err(ProposalError::InvalidSignature);
        }

        let justify = proposal
            .justify_qc
            .as_ref()
            .ok_or(ProposalError::MissingJustify)?;
        justify.verify(&self.validators)?;

        if justify.is_genesis() {
            if header.height != 1 {
                return Err(ProposalError::JustifyHeightMismatch {
                    justify: 0,
                    block: header.height,
                });
            }
            if header.parent_hash != self.genesis_hash {
                return Err(ProposalError::ParentMismatch);
            }
        } else {
            if justify.height() + 1 != header.height {
                return Err(ProposalError::JustifyHeightMismatch {
                    justify: justify.height(),
                    block: header.height,
                });
            }
            if header.parent_hash != justify.block_hash {
                return Err(ProposalError::ParentMismatch);
            }
        }

        if !proposal.block.verify_tx_root() {
            return Err(ProposalError::TxRootMismatch);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Round entry
    // ═══════════════════════════════════════════════════════════════════════

    fn enter_propose(&mut self) -> Vec<Action> {
        self.step = Step::Propose;
        let mut actions = vec![Action::ScheduleRoundTimeout {
            height: self.height,
            round: self.round,
            duration: self.config.round_timeout(self.round),
        }];

        let proposer = self.validators.proposer_for(self.height, self.round);
        if proposer.address != self.address {
            debug!(
                height = self.height,
                round = self.round,
                proposer = %proposer.address,
                "waiting for proposal"
            );
            return actions;
        }

        // Re-proposing after a restart would produce a different block hash
        // than the one we already voted for.
        if let Some((h, r, _)) = self.voted {
            if h == self.height && r == self.round {
                debug!(
                    height = h,
                    round = r,
                    "already voted in this round, skipping proposal"
                );
                return actions;
            }
        }

        let parent_hash = self.tip_hash();
        let mut payload = self.payloads.build_payload(self.height);
        payload.transactions.truncate(self.config.max_block_transactions);

        let header = BlockHeader {
            height: self.height,
            round: self.round,
            parent_hash,
            state_root: payload.state_root,
            tx_root: compute_tx_root(&payload.transactions),
            receipt_root: payload.receipt_root,
            block_time: self.now_unix,
            chain_id: self.config.chain_id.clone(),
        };
        let block = Block {
            header,
            transactions: payload.transactions,
        };
        let block_hash = block.hash();
        let proposal = Proposal::signed(
            block.clone(),
            self.round,
            Some(self.highest_qc.clone()),
            &self.signing_key,
        );

        info!(
            height = self.height,
            round = self.round,
            block_hash = %block_hash,
            transactions = block.transactions.len(),
            "proposing block"
        );

        self.blocks.insert(block_hash, block);
        self.proposal = Some(proposal.clone());
        actions.push(Action::Broadcast {
            message: OutboundMessage::Proposal(proposal),
        });

        // Vote for our own block.
        actions.extend(self.enter_vote());
        actions
    }

    /// Hash of the certified tip the next block must extend.
    fn tip_hash(&self) -> Hash {
        if self.highest_qc.is_genesis() {
            self.genesis_hash
        } else {
            self.highest_qc.block_hash
        }
    }

    fn enter_vote(&mut self) -> Vec<Action> {
        self.step = Step::Vote;

        let (block_hash, permitted) = match &self.proposal {
            Some(proposal) => (proposal.block.hash(), self.locked_permits(proposal)),
            None => return vec![],
        };

        if !permitted {
            warn!(
                height = self.height,
                round = self.round,
                block_hash = %block_hash,
                locked_round = self.locked_qc.round,
                "locked QC forbids voting for this proposal"
            );
            return vec![];
        }

        if let Some((h, r, voted_hash)) = self.voted {
            if h == self.height && r == self.round {
                if voted_hash != block_hash {
                    warn!(
                        height = h,
                        round = r,
                        "refusing to vote twice in one round for different blocks"
                    );
                }
                return vec![];
            }
        }

        let vote = Vote::signed(block_hash, self.height, self.round, &self.signing_key);
        self.voted = Some((self.height, self.round, block_hash));
        debug!(
            height = self.height,
            round = self.round,
            block_hash = %block_hash,
            "casting vote"
        );

        // The vote must be durable before any replica can observe it.
        let mut actions = vec![
            Action::PersistVote {
                height: self.height,
                round: self.round,
                block_hash,
            },
            Action::Broadcast {
                message: OutboundMessage::Vote(vote.clone()),
            },
        ];
        actions.extend(self.apply_vote(vote));
        actions
    }

    /// The locked-QC voting rule: never vote for a proposal abandoning the
    /// locked block unless its justification is at least as recent as the
    /// lock.
    fn locked_permits(&self, proposal: &Proposal) -> bool {
        let locked_hash = if self.locked_qc.is_genesis() {
            self.genesis_hash
        } else {
            self.locked_qc.block_hash
        };
        if proposal.block.header.parent_hash == locked_hash {
            return true;
        }
        proposal
            .justify_qc
            .as_ref()
            .is_some_and(|qc| qc.round >= self.locked_qc.round)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Votes
    // ═══════════════════════════════════════════════════════════════════════

    fn handle_vote(&mut self, vote: Vote) -> Vec<Action> {
        if vote.height != self.height || vote.round != self.round {
            debug!(
                got_height = vote.height,
                got_round = vote.round,
                "ignoring vote for wrong height/round"
            );
            return vec![];
        }
        self.apply_vote(vote)
    }

    fn apply_vote(&mut self, vote: Vote) -> Vec<Action> {
        let outcome = match self.vote_set.add_vote(vote) {
            Ok(outcome) => outcome,
            Err(err @ (VoteSetError::UnknownVoter(_) | VoteSetError::InvalidSignature(_))) => {
                warn!(%err, "rejected vote");
                return vec![];
            }
            Err(err) => {
                debug!(%err, "failed to add vote");
                return vec![];
            }
        };

        if let Some(evidence) = outcome.evidence {
            warn!(voter = %evidence.vote_a.voter, "equivocation detected");
            self.evidence.add(evidence);
        }

        if outcome.quorum_reached && self.step == Step::Vote {
            self.on_quorum_reached()
        } else {
            vec![]
        }
    }

    fn on_quorum_reached(&mut self) -> Vec<Action> {
        let qc = match self.vote_set.make_qc() {
            Ok(qc) => qc,
            Err(err) => {
                // Quorum was just reported; failing here is a bug.
                error!(%err, "quorum reached but QC construction failed");
                return vec![];
            }
        };

        info!(
            height = self.height,
            round = self.round,
            block_hash = %qc.block_hash,
            power = self.vote_set.voting_power(),
            "quorum reached, QC formed"
        );

        self.adopt_qc(&qc);
        self.locked_qc = qc.clone();
        let mut actions = vec![Action::PersistLockedQc { qc: qc.clone() }];

        if let Some(commit) = self.commit_chain(&qc) {
            actions.push(commit);
        }

        self.step = Step::Commit;
        actions.push(Action::EnqueueInternal {
            event: Event::NextHeight,
        });
        actions
    }

    /// Two-chain commit: the QC on a block is the second certificate for its
    /// parent, so every certified ancestor strictly below the newly
    /// certified block becomes committed.
    fn commit_chain(&mut self, qc: &QuorumCertificate) -> Option<Action> {
        let tip = self.blocks.get(&qc.block_hash)?;

        let mut to_commit: Vec<Block> = Vec::new();
        let mut cursor = tip.header.parent_hash;
        while cursor != self.committed_hash {
            let Some(block) = self.blocks.get(&cursor) else {
                // An ancestor is missing (we joined mid-chain); committing
                // across a gap would break sequentiality.
                warn!(missing = %cursor, "ancestor missing, deferring commit");
                return None;
            };
            if block.header.height <= self.committed_height {
                warn!(
                    height = block.header.height,
                    "ancestor walk reached committed height without joining the chain"
                );
                return None;
            }
            cursor = block.header.parent_hash;
            to_commit.push(block.clone());
        }

        if to_commit.is_empty() {
            return None;
        }
        to_commit.reverse();

        let newly_committed = to_commit.last().expect("non-empty");
        self.committed_height = newly_committed.header.height;
        self.committed_hash = newly_committed.hash();

        info!(
            committed_height = self.committed_height,
            committed_hash = %self.committed_hash,
            blocks = to_commit.len(),
            "committing blocks"
        );

        let committed_height = self.committed_height;
        self.blocks.retain(|_, b| b.header.height > committed_height);

        Some(Action::CommitBlocks {
            blocks: to_commit,
            qc: qc.clone(),
        })
    }

    /// Adopt a QC as the new highest if it certifies a later block.
    ///
    /// Rounds reset every height, so the comparison is (height, round)
    /// lexicographic; the pure (round, hash) fork-choice order applies only
    /// within one height.
    fn adopt_qc(&mut self, qc: &QuorumCertificate) {
        if qc.is_genesis() {
            return;
        }
        if (qc.height(), qc.round) > (self.highest_qc.height(), self.highest_qc.round) {
            debug!(
                height = qc.height(),
                round = qc.round,
                block_hash = %qc.block_hash,
                "adopted higher QC"
            );
            self.highest_qc = qc.clone();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Timeouts and round advancement
    // ═══════════════════════════════════════════════════════════════════════

    fn handle_round_timeout(&mut self, height: u64, round: u64) -> Vec<Action> {
        if height != self.height || round != self.round {
            trace!(height, round, "dropping stale round timer");
            return vec![];
        }
        if self.step == Step::Commit {
            // Quorum already reached; the next-height transition is queued.
            return vec![];
        }

        warn!(
            height = self.height,
            round = self.round,
            "round timer expired, broadcasting timeout"
        );

        let message = TimeoutMessage::signed(
            self.height,
            self.round,
            Some(self.highest_qc.clone()),
            &self.signing_key,
        );
        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::Timeout(message.clone()),
        }];
        // Our own timeout counts toward f+1.
        actions.extend(self.apply_timeout(message));
        actions
    }

    fn handle_timeout_message(&mut self, message: TimeoutMessage) -> Vec<Action> {
        if message.height != self.height || message.round != self.round {
            debug!(
                got_height = message.height,
                got_round = message.round,
                "ignoring timeout for different height/round"
            );
            return vec![];
        }
        self.apply_timeout(message)
    }

    fn apply_timeout(&mut self, message: TimeoutMessage) -> Vec<Action> {
        use crate::TimeoutError;

        let threshold = match self.timeout_collector.add_timeout(message) {
            Ok(threshold) => threshold,
            Err(err @ (TimeoutError::UnknownVoter(_) | TimeoutError::InvalidSignature(_))) => {
                warn!(%err, "rejected timeout message");
                return vec![];
            }
            Err(err) => {
                debug!(%err, "failed to add timeout message");
                return vec![];
            }
        };

        if !threshold {
            debug!(
                collected = self.timeout_collector.len(),
                height = self.height,
                round = self.round,
                "timeout collected, waiting for f+1 threshold"
            );
            return vec![];
        }

        info!(
            height = self.height,
            from_round = self.round,
            to_round = self.round + 1,
            timeouts = self.timeout_collector.len(),
            "f+1 timeout threshold reached, advancing round"
        );

        // The TC carries the network's highest lock across the round skip.
        if let Some(qc) = self.timeout_collector.highest_qc() {
            self.adopt_qc(&qc);
        }

        self.enter_new_round(self.round + 1)
    }

    /// Advance to a round within the current height: fresh vote and timeout
    /// state, timer re-armed with backoff, proposer re-evaluated. Duplicate
    /// timeouts for the old round no longer match and are dropped, so the
    /// advance happens exactly once.
    fn enter_new_round(&mut self, round: u64) -> Vec<Action> {
        self.round = round;
        self.proposal = None;
        self.vote_set = VoteSet::new(self.height, round, self.validators.clone());
        self.timeout_collector = TimeoutCollector::new(self.height, round, self.validators.clone());
        self.enter_propose()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Height advancement
    // ═══════════════════════════════════════════════════════════════════════

    fn handle_next_height(&mut self) -> Vec<Action> {
        if self.step != Step::Commit {
            debug!(step = ?self.step, "ignoring next-height signal outside commit");
            return vec![];
        }

        self.height += 1;
        info!(height = self.height, "entering next height");
        self.enter_new_round(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock_core::EmptyPayloads;
    use bedrock_types::Validator;
    use tracing_test::traced_test;

    fn make_engines(n: u8) -> (Vec<KeyPair>, Vec<Engine>) {
        let keys: Vec<KeyPair> = (1..=n).map(|i| KeyPair::from_seed(&[i; 32])).collect();
        let validators = Arc::new(
            ValidatorSet::new(
                keys.iter()
                    .map(|k| Validator::new(k.public_key(), 1))
                    .collect(),
            )
            .unwrap(),
        );
        let engines = keys
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
        (keys, engines)
    }

    fn proposer_index(engines: &[Engine], height: u64, round: u64) -> usize {
        let address = {
            let any = &engines[0];
            any.validators.proposer_for(height, round).address
        };
        engines.iter().position(|e| e.address() == address).unwrap()
    }

    fn broadcasts(actions: &[Action]) -> Vec<&OutboundMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[traced_test]
    #[test]
    fn proposer_proposes_and_votes_on_start() {
        let (_, mut engines) = make_engines(4);
        let leader = proposer_index(&engines, 1, 0);

        let actions = engines[leader].start();
        let messages = broadcasts(&actions);
        assert!(matches!(messages[0], OutboundMessage::Proposal(_)));
        assert!(matches!(messages[1], OutboundMessage::Vote(_)));
        assert_eq!(engines[leader].step(), Step::Vote);

        // The vote was persisted before it was broadcast.
        let persist_pos = actions
            .iter()
            .position(|a| matches!(a, Action::PersistVote { .. }))
            .unwrap();
        let vote_pos = actions
            .iter()
            .position(|a| matches!(a, Action::Broadcast { message: OutboundMessage::Vote(_) }))
            .unwrap();
        assert!(persist_pos < vote_pos);
    }

    #[traced_test]
    #[test]
    fn non_proposer_waits_for_proposal() {
        let (_, mut engines) = make_engines(4);
        let leader = proposer_index(&engines, 1, 0);
        let follower = (leader + 1) % 4;

        let actions = engines[follower].start();
        assert!(broadcasts(&actions).is_empty());
        assert_eq!(engines[follower].step(), Step::Propose);
        assert!(matches!(
            actions[0],
            Action::ScheduleRoundTimeout { height: 1, round: 0, .. }
        ));
    }

    #[traced_test]
    #[test]
    fn round_advance_requires_f_plus_one() {
        let (keys, mut engines) = make_engines(4);
        let leader = proposer_index(&engines, 1, 0);
        let follower = (leader + 1) % 4;
        let follower_addr = engines[follower].address();

        engines[follower].start();

        // A single Byzantine timeout (f = 1) must not advance the round.
        let byzantine = keys
            .iter()
            .find(|k| k.address() != follower_addr)
            .unwrap();
        let tm = TimeoutMessage::signed(1, 0, None, byzantine);
        engines[follower].handle(Event::TimeoutMessageReceived { message: tm.clone() });
        assert_eq!(engines[follower].round(), 0);

        // A duplicate from the same validator still does not advance.
        engines[follower].handle(Event::TimeoutMessageReceived { message: tm });
        assert_eq!(engines[follower].round(), 0);

        // A second distinct validator reaches f+1 = 2 and advances once.
        let second = keys
            .iter()
            .find(|k| k.address() != follower_addr && k.address() != byzantine.address())
            .unwrap();
        engines[follower].handle(Event::TimeoutMessageReceived {
            message: TimeoutMessage::signed(1, 0, None, second),
        });
        assert_eq!(engines[follower].round(), 1);

        // Late duplicates for the old round change nothing.
        let third = keys
            .iter()
            .find(|k| {
                k.address() != follower_addr
                    && k.address() != byzantine.address()
                    && k.address() != second.address()
            })
            .unwrap();
        engines[follower].handle(Event::TimeoutMessageReceived {
            message: TimeoutMessage::signed(1, 0, None, third),
        });
        assert_eq!(engines[follower].round(), 1);
    }

    #[traced_test]
    #[test]
    fn stale_round_timer_is_dropped() {
        let (_, mut engines) = make_engines(4);
        let leader = proposer_index(&engines, 1, 0);
        let follower = (leader + 1) % 4;

        engines[follower].start();
        let actions = engines[follower].handle(Event::RoundTimeout { height: 1, round: 5 });
        assert!(actions.is_empty());
        let actions = engines[follower].handle(Event::RoundTimeout { height: 9, round: 0 });
        assert!(actions.is_empty());
    }

    #[traced_test]
    #[test]
    fn local_timeout_broadcasts_and_counts_itself() {
        let (_, mut engines) = make_engines(4);
        let leader = proposer_index(&engines, 1, 0);
        let follower = (leader + 1) % 4;

        engines[follower].start();
        let actions = engines[follower].handle(Event::RoundTimeout { height: 1, round: 0 });
        let messages = broadcasts(&actions);
        assert_eq!(messages.len(), 1);
        let OutboundMessage::Timeout(tm) = messages[0] else {
            panic!("expected timeout broadcast");
        };
        assert_eq!((tm.height, tm.round), (1, 0));
        assert!(tm.high_qc.as_ref().unwrap().is_genesis());

        // Own timeout alone is below f+1; round unchanged.
        assert_eq!(engines[follower].round(), 0);
        assert_eq!(engines[follower].timeout_collector.len(), 1);
    }

    #[traced_test]
    #[test]
    fn timer_backoff_doubles_each_round() {
        let (keys, mut engines) = make_engines(4);
        let leader = proposer_index(&engines, 1, 0);
        let follower = (leader + 1) % 4;
        let follower_addr = engines[follower].address();

        let first = engines[follower].start();
        let Action::ScheduleRoundTimeout { duration: base, .. } = &first[0] else {
            panic!("expected timer action");
        };
        let base = *base;

        // Drive consecutive round advances through f+1 timeouts and check
        // the re-armed timer doubles every time.
        let others: Vec<&KeyPair> = keys.iter().filter(|k| k.address() != follower_addr).collect();
        for k in 0..3u64 {
            let round = engines[follower].round();
            engines[follower].handle(Event::TimeoutMessageReceived {
                message: TimeoutMessage::signed(1, round, None, others[0]),
            });
            let actions = engines[follower].handle(Event::TimeoutMessageReceived {
                message: TimeoutMessage::signed(1, round, None, others[1]),
            });
            let Some(Action::ScheduleRoundTimeout { duration, round: armed, .. }) = actions
                .iter()
                .find(|a| matches!(a, Action::ScheduleRoundTimeout { .. }))
            else {
                panic!("expected re-armed timer");
            };
            assert_eq!(*armed, round + 1);
            assert_eq!(*duration, base * 2u32.pow(k as u32 + 1));
        }
    }

    #[traced_test]
    #[test]
    fn locked_qc_forbids_conflicting_vote() {
        let (keys, mut engines) = make_engines(4);

        // Recover a replica locked on a round-5 QC for some other block.
        let locked_block = Hash::digest(b"locked-block");
        let locked = QuorumCertificate {
            block_hash: locked_block,
            round: 5,
            votes: keys
                .iter()
                .take(3)
                .map(|k| Vote::signed(locked_block, 1, 5, k))
                .collect(),
        };

        let follower_key = keys
            .iter()
            .find(|k| {
                k.address() != engines[0].validators.proposer_for(1, 0).address
            })
            .unwrap()
            .clone();
        let validators = engines[0].validators.clone();
        let mut engine = Engine::new(
            ConsensusConfig::default(),
            follower_key,
            validators,
            Box::new(EmptyPayloads),
            RecoveredState {
                locked_qc: Some(locked),
                ..Default::default()
            },
        );
        engine.start();

        // A genesis-justified proposal (round 0 justification) abandons the
        // locked block with an older justification: no vote may be cast.
        let leader = proposer_index(&engines, 1, 0);
        let actions = engines[leader].start();
        let OutboundMessage::Proposal(proposal) = broadcasts(&actions)[0].clone() else {
            panic!("expected proposal");
        };
        let actions = engine.handle(Event::ProposalReceived { proposal });
        assert!(broadcasts(&actions).is_empty());
        assert_eq!(engine.step(), Step::Vote);
    }
}
