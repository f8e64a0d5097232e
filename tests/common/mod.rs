//! Test harness: an in-memory cluster of consensus cores wired together
//! through a recording environment.
//!
//! Broadcasts are routed to every replica except the sender, the way a real
//! network layer would fan them out. Before a message referencing a block is
//! handed to a replica, the harness delivers the block and its ancestors from
//! a global registry, mimicking the node's fetch-before-deliver contract.
//! Commit timers are recorded, never scheduled; tests fire them explicitly.

pub(crate) mod logging;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use vigil_bft::consensus::{ConsensusCore, Environment};
use vigil_bft::messages::{Blame, BlameNotify, Finality, Notify, Proposal, Vote};
use vigil_bft::types::basic::{BlockHeight, CryptoHash, ReplicaId, ViewNumber};
use vigil_bft::types::block::Block;
use vigil_bft::types::certificates::{blame_text, create_part_cert};
use vigil_bft::types::keypair::Keypair;

/// One recorded output of a core.
#[derive(Clone)]
pub(crate) enum Action {
    Decide(Finality),
    BroadcastProposal(Proposal),
    BroadcastVote(Vote),
    BroadcastNotify(Notify),
    BroadcastBlame(Blame),
    BroadcastBlameNotify(BlameNotify),
    SetCommitTimer(CryptoHash, BlockHeight),
    StopCommitTimer(BlockHeight),
}

/// Environment that records every output for the harness to route.
pub(crate) struct RecordingEnv {
    pub(crate) actions: Vec<Action>,
}

impl RecordingEnv {
    fn new() -> RecordingEnv {
        RecordingEnv {
            actions: Vec::new(),
        }
    }
}

impl Environment for RecordingEnv {
    fn decide(&mut self, fin: Finality) {
        self.actions.push(Action::Decide(fin));
    }

    fn broadcast_proposal(&mut self, prop: Proposal) {
        self.actions.push(Action::BroadcastProposal(prop));
    }

    fn broadcast_vote(&mut self, vote: Vote) {
        self.actions.push(Action::BroadcastVote(vote));
    }

    fn broadcast_notify(&mut self, notify: Notify) {
        self.actions.push(Action::BroadcastNotify(notify));
    }

    fn broadcast_blame(&mut self, blame: Blame) {
        self.actions.push(Action::BroadcastBlame(blame));
    }

    fn broadcast_blame_notify(&mut self, bn: BlameNotify) {
        self.actions.push(Action::BroadcastBlameNotify(bn));
    }

    fn set_commit_timer(&mut self, blk: Arc<Block>, _timeout: Duration) {
        self.actions
            .push(Action::SetCommitTimer(blk.hash, blk.height));
    }

    fn stop_commit_timer(&mut self, height: BlockHeight) {
        self.actions.push(Action::StopCommitTimer(height));
    }
}

/// A cluster of cores with in-memory routing.
pub(crate) struct Cluster {
    pub(crate) replicas: Vec<ConsensusCore<RecordingEnv>>,
    pub(crate) keypairs: Vec<Keypair>,
    pub(crate) decisions: Vec<Vec<Finality>>,
    /// The latest armed commit-timer target per replica.
    pub(crate) armed: Vec<Option<CryptoHash>>,
    /// Every block the harness has seen, for fetch-before-deliver.
    registry: HashMap<CryptoHash, Block>,
}

impl Cluster {
    pub(crate) fn new(n: u16, n_faulty: u16, delta: Duration) -> Cluster {
        logging::setup_logger(log::LevelFilter::Warn);

        let keypairs: Vec<Keypair> = (0..n).map(|_| Keypair::generate()).collect();
        let mut replicas = Vec::new();
        for i in 0..n {
            let mut core = ConsensusCore::new(
                ReplicaId::new(i),
                keypairs[i as usize].clone(),
                RecordingEnv::new(),
            );
            core.on_init(n_faulty, delta);
            for (j, keypair) in keypairs.iter().enumerate() {
                core.add_replica(
                    ReplicaId::new(j as u16),
                    format!("127.0.0.1:{}", 7000 + j).parse().unwrap(),
                    keypair.public(),
                );
            }
            replicas.push(core);
        }

        Cluster {
            decisions: vec![Vec::new(); n as usize],
            armed: vec![None; n as usize],
            registry: HashMap::new(),
            replicas,
            keypairs,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.replicas.len()
    }

    /// Make a block known to the harness so it can be delivered on demand.
    pub(crate) fn register_block(&mut self, block: &Block) {
        self.registry.insert(block.hash, block.clone());
    }

    /// Deliver `blk_hash` and its ancestors to replica `to`, if the harness
    /// knows them.
    pub(crate) fn ensure_delivered(&mut self, to: usize, blk_hash: &CryptoHash) {
        if self.replicas[to].block_graph().contains(blk_hash) {
            return;
        }
        let block = match self.registry.get(blk_hash) {
            Some(block) => block.clone(),
            None => return,
        };
        for parent in &block.parents {
            self.ensure_delivered(to, parent);
        }
        self.replicas[to].on_deliver_blk(block);
    }

    pub(crate) fn deliver_proposal(&mut self, to: usize, prop: &Proposal) {
        self.register_block(&prop.block);
        self.ensure_delivered(to, &prop.block.hash);
        if self.replicas[to].block_graph().contains(&prop.block.hash) {
            self.replicas[to].on_receive_proposal(prop.clone());
        }
    }

    fn deliver_vote(&mut self, to: usize, vote: &Vote) {
        self.ensure_delivered(to, &vote.blk_hash);
        if self.replicas[to].block_graph().contains(&vote.blk_hash) {
            self.replicas[to].on_receive_vote(vote.clone());
        }
    }

    fn deliver_notify(&mut self, to: usize, notify: &Notify) {
        self.ensure_delivered(to, &notify.blk_hash);
        if self.replicas[to].block_graph().contains(&notify.blk_hash) {
            self.replicas[to].on_receive_notify(notify.clone());
        }
    }

    fn dispatch(&mut self, from: usize, action: Action) {
        match action {
            Action::Decide(fin) => self.decisions[from].push(fin),
            Action::SetCommitTimer(blk_hash, _) => self.armed[from] = Some(blk_hash),
            Action::StopCommitTimer(_) => self.armed[from] = None,
            Action::BroadcastProposal(prop) => {
                for to in self.others(from) {
                    self.deliver_proposal(to, &prop);
                }
            }
            Action::BroadcastVote(vote) => {
                for to in self.others(from) {
                    self.deliver_vote(to, &vote);
                }
            }
            Action::BroadcastNotify(notify) => {
                for to in self.others(from) {
                    self.deliver_notify(to, &notify);
                }
            }
            Action::BroadcastBlame(blame) => {
                for to in self.others(from) {
                    self.replicas[to].on_receive_blame(blame.clone());
                }
            }
            Action::BroadcastBlameNotify(bn) => {
                for to in self.others(from) {
                    self.replicas[to].on_receive_blame_notify(bn.clone());
                }
            }
        }
    }

    fn others(&self, from: usize) -> Vec<usize> {
        (0..self.len()).filter(|to| *to != from).collect()
    }

    /// Route outputs between replicas until the cluster is quiescent.
    pub(crate) fn pump(&mut self) {
        loop {
            let mut routed_any = false;
            for from in 0..self.len() {
                let actions: Vec<Action> = self.replicas[from]
                    .environment_mut()
                    .actions
                    .drain(..)
                    .collect();
                if actions.is_empty() {
                    continue;
                }
                routed_any = true;
                for action in actions {
                    self.dispatch(from, action);
                }
            }
            if !routed_any {
                break;
            }
        }
    }

    /// Fire the currently armed commit timer of every replica, then route the
    /// fallout.
    pub(crate) fn fire_commit_timers(&mut self) {
        for i in 0..self.len() {
            if let Some(blk_hash) = self.armed[i].take() {
                self.replicas[i].on_commit_timeout(&blk_hash);
            }
        }
        self.pump();
    }

    /// A blame for `view` signed by replica `i`, as the local pacemaker would
    /// synthesize it on view timeout.
    pub(crate) fn make_blame(&self, i: usize, view: ViewNumber) -> Blame {
        Blame {
            blamer: ReplicaId::new(i as u16),
            view,
            cert: create_part_cert(&self.keypairs[i], blame_text(view)),
        }
    }

    /// Have replicas in `blamers` blame `view` locally, then route the
    /// resulting broadcasts.
    pub(crate) fn blame_view(&mut self, blamers: &[usize], view: ViewNumber) {
        for &i in blamers {
            let blame = self.make_blame(i, view);
            self.replicas[i].on_receive_blame(blame);
        }
        self.pump();
    }

    /// Have `leader` propose one command on top of `parents`, then route the
    /// fallout until quiescent. Returns the proposed block.
    pub(crate) fn propose_and_pump(
        &mut self,
        leader: usize,
        cmd: CryptoHash,
        parents: &[Arc<Block>],
    ) -> Arc<Block> {
        let block = self.replicas[leader].on_propose(vec![cmd], parents, Vec::new());
        self.register_block(&block);
        self.pump();
        block
    }
}
