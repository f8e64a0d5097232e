/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus state machine, without network or timer implementations.
//!
//! [`ConsensusCore`] ingests authenticated messages, block deliveries, and
//! commit-timer expirations, and emits its externally observable actions
//! through the [`Environment`] trait implemented by the enclosing node. It is
//! deterministic and single-threaded: every handler runs to completion on the
//! caller's event loop, and deferred completions resolve synchronously from
//! the loop's perspective.
//!
//! The state variables and transition rules are those of a leader-based BFT
//! protocol in the HotStuff family with an explicit blame-driven view change:
//! a replica votes for blocks that extend the highest certified branch it
//! knows, vote quorums form certificates, a certificate advance arms a commit
//! timer bounded by the view-time parameter `delta`, and an undisturbed timer
//! expiry commits the certified prefix. When a view stalls, blames aggregate
//! into a blame certificate that abandons the view and carries the locked
//! state to the next leader through notifies.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::block_graph::BlockGraph;
use crate::logging;
use crate::messages::{Blame, BlameNotify, Finality, Notify, Proposal, Vote};
use crate::observers::{Completion, Slot};
use crate::types::basic::{BlockHeight, CommandHash, CryptoHash, ReplicaId, ViewNumber};
use crate::types::block::Block;
use crate::types::certificates::{create_part_cert, vote_text, QuorumCert};
use crate::types::keypair::Keypair;
use crate::types::replicas::{ReplicaConfig, ReplicaInfo};

use super::collectors::{BlameCollector, VoteCollector};
use super::safety;

/// The externally observable actions of the core, implemented by the
/// enclosing node.
///
/// Broadcasts go to every replica except the sender. The commit-timer methods
/// talk to an external timer subsystem that guarantees at most one fire per
/// arm; an expiry comes back to the core as
/// [`on_commit_timeout`](ConsensusCore::on_commit_timeout).
pub trait Environment {
    /// A command of a committed block has been decided.
    fn decide(&mut self, fin: Finality);

    fn broadcast_proposal(&mut self, prop: Proposal);

    fn broadcast_vote(&mut self, vote: Vote);

    fn broadcast_notify(&mut self, notify: Notify);

    fn broadcast_blame(&mut self, blame: Blame);

    fn broadcast_blame_notify(&mut self, bn: BlameNotify);

    /// Arm the commit timer for `blk`, to fire after `timeout`.
    fn set_commit_timer(&mut self, blk: Arc<Block>, timeout: Duration);

    /// Cancel the commit timer armed for the block at `height`.
    fn stop_commit_timer(&mut self, height: BlockHeight);
}

/// The consensus state machine.
pub struct ConsensusCore<E: Environment> {
    id: ReplicaId,
    keypair: Keypair,
    config: ReplicaConfig,
    graph: BlockGraph,

    /// Highest certified block. Starts at genesis; height never decreases.
    bqc: Arc<Block>,
    /// Highest executed block. Always an ancestor of `bqc`.
    bexec: Arc<Block>,
    /// Height of the block last voted for.
    vheight: BlockHeight,
    /// Height of the block last notified for.
    nheight: BlockHeight,
    /// The current view number.
    view: ViewNumber,
    /// Notifies accumulated to prove our locked state in the next proposal.
    status_cert: Vec<Notify>,
    /// Tip blocks (no delivered children), ordered by `(height, hash)`.
    tails: BTreeSet<(BlockHeight, CryptoHash)>,

    vote_collector: VoteCollector,
    blame_collector: BlameCollector,
    /// `(voter, height)` → voted block, to notice equivocation.
    votes_seen: HashMap<(ReplicaId, BlockHeight), CryptoHash>,
    /// Blame certificates observed, by blamed view.
    blame_qcs: HashMap<ViewNumber, QuorumCert>,
    /// The currently armed commit timer target, if any.
    armed_commit: Option<(CryptoHash, BlockHeight)>,
    /// Commit-timer target → the view current when the timer was armed.
    pending_commit_views: HashMap<CryptoHash, ViewNumber>,

    qc_waiting: HashMap<CryptoHash, Slot<Arc<Block>>>,
    propose_waiting: Slot<Proposal>,
    receive_proposal_waiting: Slot<Proposal>,
    bqc_update_waiting: Slot<Arc<Block>>,

    /// Always abstain from voting; exercises the blame path.
    neg_vote: bool,
    started: bool,
    env: E,
}

impl<E: Environment> ConsensusCore<E> {
    /// Build a core around a fresh genesis block. Configuration must follow
    /// via [`on_init`](Self::on_init) and [`add_replica`](Self::add_replica)
    /// before any protocol input is processed.
    pub fn new(id: ReplicaId, keypair: Keypair, env: E) -> ConsensusCore<E> {
        let graph = BlockGraph::new();
        let genesis = Arc::clone(graph.genesis());
        let mut tails = BTreeSet::new();
        tails.insert((genesis.height, genesis.hash));
        ConsensusCore {
            id,
            keypair,
            config: ReplicaConfig::new(),
            graph,
            bqc: Arc::clone(&genesis),
            bexec: genesis,
            vheight: BlockHeight::new(0),
            nheight: BlockHeight::new(0),
            view: ViewNumber::init(),
            status_cert: Vec::new(),
            tails,
            vote_collector: VoteCollector::new(0, 0),
            blame_collector: BlameCollector::new(0, 0),
            votes_seen: HashMap::new(),
            blame_qcs: HashMap::new(),
            armed_commit: None,
            pending_commit_views: HashMap::new(),
            qc_waiting: HashMap::new(),
            propose_waiting: Slot::new(),
            receive_proposal_waiting: Slot::new(),
            bqc_update_waiting: Slot::new(),
            neg_vote: false,
            started: false,
            env,
        }
    }

    /* === Configuration === */

    /// Fix the quorum threshold `n_majority = n_faulty + 1` and the view-time
    /// parameter. Must be called exactly once, before the protocol starts.
    pub fn on_init(&mut self, n_faulty: u16, delta: Duration) {
        assert!(!self.started, "on_init called after the protocol started");
        assert_eq!(self.config.n_majority(), 0, "on_init called twice");
        self.config.set_quorum(n_faulty, delta);
    }

    /// Append a replica to the configuration. Only callable before any
    /// protocol input is processed.
    pub fn add_replica(
        &mut self,
        id: ReplicaId,
        addr: std::net::SocketAddr,
        pubkey: ed25519_dalek::VerifyingKey,
    ) {
        assert!(!self.started, "add_replica called after the protocol started");
        self.config.add(ReplicaInfo { id, addr, pubkey });
    }

    fn ensure_started(&mut self) {
        if !self.started {
            assert!(
                self.config.is_complete(),
                "protocol input before configuration completed"
            );
            assert!(
                self.config.replica(self.id).is_some(),
                "own replica id is not in the configuration"
            );
            self.vote_collector =
                VoteCollector::new(self.config.len(), self.config.n_majority());
            self.blame_collector =
                BlameCollector::new(self.config.len(), self.config.n_majority());
            self.started = true;
        }
    }

    /* === Delivery === */

    /// Inform the core that `block`, the block referenced by its attached
    /// certificate, and all its parents have been delivered. Returns false
    /// and drops the block if it is malformed. Redelivery is a no-op.
    pub fn on_deliver_blk(&mut self, block: Block) -> bool {
        if block.hash == self.graph.genesis().hash {
            return true;
        }
        self.ensure_started();
        if self.graph.contains(&block.hash) {
            return true;
        }

        match self.graph.deliver(block) {
            Ok(block) => {
                for parent in &block.parents {
                    if let Some(parent) = self.graph.get(parent) {
                        self.tails.remove(&(parent.height, parent.hash));
                    }
                }
                self.tails.insert((block.height, block.hash));
                log::debug!(
                    "{}, {}, {}",
                    logging::DELIVER_BLOCK,
                    block.hash,
                    block.height
                );
                true
            }
            Err(err) => {
                log::debug!("{}, {}", logging::DROP_BLOCK, err);
                false
            }
        }
    }

    /// Look up a block a message refers to. References to pruned blocks drop
    /// the message; references to never-delivered blocks are caller bugs.
    fn get_delivered(&self, blk_hash: &CryptoHash) -> Option<Arc<Block>> {
        if self.graph.is_pruned(blk_hash) {
            log::debug!("{}, pruned block {}", logging::DROP_MESSAGE, blk_hash);
            return None;
        }
        Some(Arc::clone(self.graph.get(blk_hash).expect(
            "handler invoked with an undelivered block reference",
        )))
    }

    /* === Proposals and voting === */

    /// Call upon delivery of a proposal message. The block mentioned in the
    /// message must already be delivered.
    pub fn on_receive_proposal(&mut self, prop: Proposal) {
        self.ensure_started();
        if !prop.verify(&self.config) {
            log::debug!("{}, invalid {}", logging::DROP_MESSAGE, prop);
            return;
        }
        let bnew = match self.get_delivered(&prop.block.hash) {
            Some(bnew) => bnew,
            None => return,
        };
        log::debug!(
            "{}, {}, {}, {}",
            logging::RECEIVE_PROPOSAL,
            prop.proposer,
            bnew.hash,
            bnew.height
        );
        self.on_receive_proposal_(&prop, bnew);
        self.receive_proposal_waiting.resolve(prop);
    }

    fn on_receive_proposal_(&mut self, prop: &Proposal, bnew: Arc<Block>) {
        // A status certificate proves certified blocks the proposer knows;
        // apply it first so the vote rule judges the proposal against them.
        if let Some(notifies) = &prop.status_cert {
            for notify in notifies {
                self.apply_status_notify(notify);
            }
        }

        let want_vote =
            !self.neg_vote && safety::should_vote(&self.graph, &bnew, &self.bqc, self.vheight);

        self.update(&bnew);

        if want_vote {
            self.vheight = bnew.height;
            let vote = Vote {
                voter: self.id,
                blk_hash: bnew.hash,
                cert: create_part_cert(&self.keypair, vote_text(&bnew.hash)),
            };
            log::debug!("{}, {}, {}", logging::VOTE, vote.voter, vote.blk_hash);
            self.env.broadcast_vote(vote);
        }
    }

    /// A notify carried inside a proposal's status certificate. The certified
    /// block is normally an ancestor of the proposed block and therefore
    /// delivered; one we have not delivered proves nothing to us and is
    /// skipped.
    fn apply_status_notify(&mut self, notify: &Notify) {
        if let Some(certified) = self.graph.get(&notify.blk_hash).cloned() {
            self.update_highest(certified, &notify.qc);
        }
    }

    /* === Highest-certificate tracking and the commit rule === */

    /// Examine the certificate attached to `blk` and feed the block it
    /// certifies to the highest-certificate tracker.
    fn update(&mut self, blk: &Arc<Block>) {
        let justify = match &blk.justify {
            Some(justify) => justify.clone(),
            None => return,
        };
        let certified = match self.graph.certified_block(&justify) {
            Some(certified) => Arc::clone(certified),
            None => return,
        };
        self.update_highest(certified, &justify);
    }

    fn update_highest(&mut self, certified: Arc<Block>, qc: &QuorumCert) {
        self.graph.record_qc(certified.hash, qc);
        if certified.height > self.bqc.height {
            log::debug!(
                "{}, {}, {}",
                logging::UPDATE_HIGHEST_QC,
                certified.hash,
                certified.height
            );
            self.bqc = Arc::clone(&certified);
            self.bqc_update_waiting.resolve(Arc::clone(&certified));
            self.resolve_qc_waiting(&certified);
            self.check_commit(certified);
        }
    }

    /// Re-arm the commit timer for the new highest certified block.
    fn check_commit(&mut self, target: Arc<Block>) {
        if let Some((hash, height)) = self.armed_commit.take() {
            self.pending_commit_views.remove(&hash);
            self.env.stop_commit_timer(height);
        }
        self.armed_commit = Some((target.hash, target.height));
        self.pending_commit_views.insert(target.hash, self.view);
        self.env.set_commit_timer(target, self.config.delta());
    }

    /// Call when the commit timer armed for `blk_hash` fires. Commits the
    /// target block and all its uncommitted ancestors, unless the target fell
    /// off the certified chain or its view was blamed in the meantime.
    pub fn on_commit_timeout(&mut self, blk_hash: &CryptoHash) {
        self.ensure_started();
        let blk = match self.get_delivered(blk_hash) {
            Some(blk) => blk,
            None => return,
        };
        if self
            .armed_commit
            .map_or(false, |(hash, _)| hash == *blk_hash)
        {
            self.armed_commit = None;
        }
        let armed_view = self
            .pending_commit_views
            .remove(blk_hash)
            .unwrap_or(self.view);

        if !self.graph.extends(&self.bqc.hash, &blk) {
            log::debug!(
                "{}, commit target {} off the certified chain",
                logging::DROP_MESSAGE,
                blk.hash
            );
            return;
        }
        if self.blame_qcs.contains_key(&armed_view) {
            log::debug!(
                "{}, commit target {} in blamed view {}",
                logging::DROP_MESSAGE,
                blk.hash,
                armed_view
            );
            return;
        }
        if blk.height <= self.bexec.height {
            return;
        }

        let chain = safety::commit_chain(&self.graph, &blk, &self.bexec)
            .expect("safety violation: finalized block conflicts with the executed chain");
        for block in &chain {
            log::info!(
                "{}, {}, {}",
                logging::COMMIT_BLOCK,
                block.hash,
                block.height
            );
            for (idx, cmd) in block.commands.iter().enumerate() {
                self.env.decide(Finality {
                    rid: self.id,
                    decision: 1,
                    cmd_idx: idx as u32,
                    cmd_height: block.height,
                    cmd_hash: *cmd,
                    blk_hash: block.hash,
                });
            }
        }
        self.bexec = blk;
    }

    /* === Vote collection === */

    /// Call upon delivery of a vote message. The block mentioned in the
    /// message must already be delivered.
    pub fn on_receive_vote(&mut self, vote: Vote) {
        self.ensure_started();
        if !vote.verify(&self.config) {
            log::debug!("{}, invalid {}", logging::DROP_MESSAGE, vote);
            return;
        }
        let blk = match self.get_delivered(&vote.blk_hash) {
            Some(blk) => blk,
            None => return,
        };

        let prior = self.votes_seen.get(&(vote.voter, blk.height)).copied();
        match prior {
            Some(prior) if prior != blk.hash => {
                log::warn!(
                    "{}, {}, {}, {}",
                    logging::EQUIVOCATION,
                    vote.voter,
                    prior,
                    blk.hash
                );
                return;
            }
            _ => {
                self.votes_seen.insert((vote.voter, blk.height), blk.hash);
            }
        }

        if let Some(qc) = self
            .vote_collector
            .collect(blk.hash, vote.voter, vote.cert.signature())
        {
            log::info!("{}, {}, {}", logging::COLLECT_QC, blk.hash, blk.height);
            self.graph.record_qc(blk.hash, &qc);
            self.resolve_qc_waiting(&blk);
            self.update_highest(blk, &qc);
        }
    }

    fn resolve_qc_waiting(&mut self, blk: &Arc<Block>) {
        if let Some(mut slot) = self.qc_waiting.remove(&blk.hash) {
            slot.resolve(Arc::clone(blk));
        }
    }

    /* === Proposing === */

    /// Called by the leader on its own schedule to package `cmds` into a new
    /// block extending `parents[0]` (later parents are uncles). The proposer
    /// votes for its own proposal when the vote rule allows, then broadcasts
    /// it. Returns the proposed block.
    ///
    /// # Preconditions
    ///
    /// `parents` is non-empty, `parents[0]` is delivered, and the caller is
    /// leader for the current view.
    pub fn on_propose(
        &mut self,
        cmds: Vec<CommandHash>,
        parents: &[Arc<Block>],
        extra: Vec<u8>,
    ) -> Arc<Block> {
        self.ensure_started();
        assert!(!parents.is_empty(), "propose requires at least one parent");
        assert!(
            self.graph.contains(&parents[0].hash),
            "the true parent must be delivered"
        );

        // Prefer the certificate for the chosen parent; fall back to the
        // highest certificate we know when the parent has none yet (the
        // first proposal after a view change extends an uncertified tail).
        let justify = self
            .graph
            .qc_for(&parents[0].hash)
            .or_else(|| self.graph.qc_for(&self.bqc.hash))
            .cloned()
            .expect("no certificate available to attach");

        let block = Block::new(
            parents.iter().map(|parent| parent.hash).collect(),
            parents[0].height + 1,
            Some(justify.clone()),
            cmds,
            extra,
        );
        assert!(
            self.on_deliver_blk(block.clone()),
            "proposed block failed the delivery sanity checks"
        );
        let bnew = Arc::clone(self.graph.get(&block.hash).unwrap());

        let status_cert = if self.status_cert.len() == self.config.n_majority() {
            Some(std::mem::take(&mut self.status_cert))
        } else {
            self.status_cert.clear();
            None
        };
        let prop = Proposal {
            proposer: self.id,
            block,
            cert_blk: justify,
            status_cert,
        };
        log::info!("{}, {}, {}, {}", logging::PROPOSE, self.id, bnew.hash, bnew.height);

        self.on_receive_proposal_(&prop, Arc::clone(&bnew));
        self.env.broadcast_proposal(prop.clone());
        self.propose_waiting.resolve(prop);
        bnew
    }

    /* === Blame and view change === */

    /// Call upon delivery of a blame message. A self-blame (synthesized by
    /// the local pacemaker on view timeout) is also broadcast to peers.
    pub fn on_receive_blame(&mut self, blame: Blame) {
        self.ensure_started();
        if !blame.verify(&self.config) {
            log::debug!("{}, invalid {}", logging::DROP_MESSAGE, blame);
            return;
        }
        if blame.view < self.view {
            log::debug!("{}, stale {}", logging::DROP_MESSAGE, blame);
            return;
        }
        log::debug!(
            "{}, {}, {}",
            logging::RECEIVE_BLAME,
            blame.blamer,
            blame.view
        );
        if blame.blamer == self.id {
            self.env.broadcast_blame(blame.clone());
        }

        if let Some(qc) = self
            .blame_collector
            .collect(blame.view, blame.blamer, blame.cert.signature())
        {
            log::info!("{}, {}", logging::COLLECT_BLAME_QC, blame.view);
            self.blame_qcs.insert(blame.view, qc.clone());
            self.env.broadcast_blame_notify(BlameNotify {
                view: blame.view,
                qc,
            });
            self.advance_view(blame.view + 1);
        }
    }

    /// Call upon delivery of a blame-notify message carrying the certificate
    /// that abandons a view.
    pub fn on_receive_blame_notify(&mut self, bn: BlameNotify) {
        self.ensure_started();
        if !bn.verify(&self.config) {
            log::debug!("{}, invalid {}", logging::DROP_MESSAGE, bn);
            return;
        }
        self.blame_qcs
            .entry(bn.view)
            .or_insert_with(|| bn.qc.clone());
        if bn.view >= self.view {
            self.advance_view(bn.view + 1);
        }
    }

    /// Call upon delivery of a notify message. The block mentioned in the
    /// message must already be delivered.
    pub fn on_receive_notify(&mut self, notify: Notify) {
        self.ensure_started();
        if !notify.verify(&self.config) {
            log::debug!("{}, invalid {}", logging::DROP_MESSAGE, notify);
            return;
        }
        let certified = match self.get_delivered(&notify.blk_hash) {
            Some(certified) => certified,
            None => return,
        };
        log::debug!("{}, {}", logging::RECEIVE_NOTIFY, notify.blk_hash);
        self.update_highest(certified, &notify.qc);
        if self.status_cert.len() < self.config.n_majority() {
            self.status_cert.push(notify);
        }
    }

    /// Enter `new_view` and tell the next leader of our locked state: the
    /// notify for the highest certified block is broadcast and seeds the
    /// fresh status certificate.
    fn advance_view(&mut self, new_view: ViewNumber) {
        if new_view <= self.view {
            return;
        }
        log::info!("{}, {}, {}", logging::ADVANCE_VIEW, self.view, new_view);
        self.view = new_view;
        self.blame_collector.discard_below(new_view);
        self.status_cert.clear();

        if let Some(qc) = self.graph.qc_for(&self.bqc.hash).cloned() {
            let notify = Notify {
                blk_hash: self.bqc.hash,
                qc,
            };
            self.nheight = self.nheight.max(self.bqc.height);
            self.env.broadcast_notify(notify.clone());
            self.status_cert.push(notify);
        }
    }

    /* === Pruning === */

    /// Drop blocks whose height is below `bexec.height - staleness`. Requests
    /// that would reach above the executed head are no-ops.
    pub fn prune(&mut self, staleness: u32) {
        self.ensure_started();
        let cutoff = self.bexec.height.saturating_sub(staleness);
        let dropped = self.graph.prune(cutoff);
        if dropped > 0 {
            self.votes_seen.retain(|(_, height), _| *height >= cutoff);
            self.tails.retain(|(height, _)| *height >= cutoff);
            log::info!("{}, {}, {}", logging::PRUNE_BLOCK, cutoff, dropped);
        }
    }

    /* === Observation hooks === */

    /// A completion resolved when `blk` gets a quorum certificate. Resolves
    /// immediately if one is already known.
    pub fn wait_qc(&mut self, blk: &Arc<Block>) -> Completion<Arc<Block>> {
        if self.graph.qc_for(&blk.hash).is_some() {
            return Completion::ready(Arc::clone(blk));
        }
        self.qc_waiting
            .entry(blk.hash)
            .or_insert_with(Slot::new)
            .subscribe()
    }

    /// A completion resolved when this replica next proposes a block.
    pub fn wait_proposal(&mut self) -> Completion<Proposal> {
        self.propose_waiting.subscribe()
    }

    /// A completion resolved when this replica next receives a proposal.
    pub fn wait_receive_proposal(&mut self) -> Completion<Proposal> {
        self.receive_proposal_waiting.subscribe()
    }

    /// A completion resolved when the highest certified block next advances.
    pub fn wait_bqc_update(&mut self) -> Completion<Arc<Block>> {
        self.bqc_update_waiting.subscribe()
    }

    /* === Accessors === */

    pub fn genesis(&self) -> &Arc<Block> {
        self.graph.genesis()
    }

    pub fn bqc(&self) -> &Arc<Block> {
        &self.bqc
    }

    pub fn bexec(&self) -> &Arc<Block> {
        &self.bexec
    }

    pub fn vheight(&self) -> BlockHeight {
        self.vheight
    }

    pub fn nheight(&self) -> BlockHeight {
        self.nheight
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn block_graph(&self) -> &BlockGraph {
        &self.graph
    }

    /// The current tip blocks in ascending `(height, hash)` order. Proposers
    /// select parents from here.
    pub fn tails(&self) -> Vec<Arc<Block>> {
        self.tails
            .iter()
            .filter_map(|(_, hash)| self.graph.get(hash).cloned())
            .collect()
    }

    pub fn set_neg_vote(&mut self, neg_vote: bool) {
        self.neg_vote = neg_vote;
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    pub fn environment_mut(&mut self) -> &mut E {
        &mut self.env
    }
}

impl<E: Environment> Display for ConsensusCore<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<core id={} view={} vheight={} bqc={} bexec={}>",
            self.id, self.view, self.vheight, self.bqc.hash, self.bexec.hash
        )
    }
}
