/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The delivered-block store, the quorum certificate registry, and ancestry
//! queries over them.
//!
//! "Delivered" means a block and its transitively referenced blocks are
//! present locally; the consensus core only reasons about delivered blocks.
//! Fetching and dependency resolution happen outside the crate — by the time
//! [`deliver`](BlockGraph::deliver) is called, the caller asserts that every
//! parent has already been delivered, and this module only re-checks the
//! cheap structural facts.
//!
//! The graph also remembers which block each known [`QuorumCert`] certifies,
//! so proposers can attach the certificate for a chosen parent, and it
//! remembers the hashes of pruned blocks so that late references to them can
//! be told apart from caller bugs.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::types::basic::{BlockHeight, CryptoHash};
use crate::types::block::Block;
use crate::types::certificates::{vote_text, QuorumCert};

/// Why a block failed the delivery sanity checks.
#[derive(Debug)]
pub enum DeliverError {
    /// The parent list is empty (only the genesis block has no parents).
    NoParents,

    /// The block's content hash does not match its contents.
    BadHash,

    /// A listed parent has not been delivered.
    UnknownParent { parent: CryptoHash },

    /// The height is not `max(parent.height) + 1`.
    WrongHeight {
        expected: BlockHeight,
        got: BlockHeight,
    },

    /// The attached certificate references a block that has not been
    /// delivered.
    UnknownJustify,

    /// The block, or one of its parents, was pruned.
    Pruned,
}

impl Display for DeliverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeliverError::NoParents => write!(f, "empty parent list"),
            DeliverError::BadHash => write!(f, "content hash mismatch"),
            DeliverError::UnknownParent { parent } => {
                write!(f, "undelivered parent {}", parent)
            }
            DeliverError::WrongHeight { expected, got } => {
                write!(f, "height {} where {} was expected", got, expected)
            }
            DeliverError::UnknownJustify => {
                write!(f, "attached certificate references an undelivered block")
            }
            DeliverError::Pruned => write!(f, "references a pruned block"),
        }
    }
}

/// The delivered part of the block DAG, plus the certificate registry.
pub struct BlockGraph {
    blocks: HashMap<CryptoHash, Arc<Block>>,
    /// Vote text hash → the delivered block it is the vote text of. Lets a
    /// certificate be resolved to the block it certifies.
    vote_texts: HashMap<CryptoHash, CryptoHash>,
    /// Certified block hash → the certificate over its vote text.
    qcs: HashMap<CryptoHash, QuorumCert>,
    pruned: HashSet<CryptoHash>,
    genesis: Arc<Block>,
}

impl BlockGraph {
    /// Create a graph holding only the genesis block, with the genesis
    /// certificate registered for it.
    pub(crate) fn new() -> BlockGraph {
        let genesis = Arc::new(Block::genesis());
        let mut blocks = HashMap::new();
        blocks.insert(genesis.hash, Arc::clone(&genesis));
        let mut vote_texts = HashMap::new();
        vote_texts.insert(vote_text(&genesis.hash), genesis.hash);
        let mut qcs = HashMap::new();
        qcs.insert(genesis.hash, QuorumCert::genesis());
        BlockGraph {
            blocks,
            vote_texts,
            qcs,
            pruned: HashSet::new(),
            genesis,
        }
    }

    pub fn genesis(&self) -> &Arc<Block> {
        &self.genesis
    }

    pub fn contains(&self, blk_hash: &CryptoHash) -> bool {
        self.blocks.contains_key(blk_hash)
    }

    pub fn get(&self, blk_hash: &CryptoHash) -> Option<&Arc<Block>> {
        self.blocks.get(blk_hash)
    }

    pub fn is_pruned(&self, blk_hash: &CryptoHash) -> bool {
        self.pruned.contains(blk_hash)
    }

    /// The registered certificate for `blk_hash`, if one has been seen or
    /// formed.
    pub fn qc_for(&self, blk_hash: &CryptoHash) -> Option<&QuorumCert> {
        self.qcs.get(blk_hash)
    }

    /// Resolve a certificate to the delivered block whose vote text it is
    /// over.
    pub fn certified_block(&self, qc: &QuorumCert) -> Option<&Arc<Block>> {
        self.vote_texts
            .get(&qc.obj())
            .and_then(|blk_hash| self.blocks.get(blk_hash))
    }

    /// Register `qc` as the certificate for `certified`. The first
    /// certificate for a block wins; later ones certify the same text and add
    /// nothing.
    pub(crate) fn record_qc(&mut self, certified: CryptoHash, qc: &QuorumCert) {
        self.qcs.entry(certified).or_insert_with(|| qc.clone());
    }

    /// Intern a block after checking its structural sanity. Redelivery of an
    /// already-interned block returns the existing handle.
    pub(crate) fn deliver(&mut self, block: Block) -> Result<Arc<Block>, DeliverError> {
        if let Some(existing) = self.blocks.get(&block.hash) {
            return Ok(Arc::clone(existing));
        }
        if self.pruned.contains(&block.hash) {
            return Err(DeliverError::Pruned);
        }
        if block.parents.is_empty() {
            return Err(DeliverError::NoParents);
        }
        if !block.is_correct() {
            return Err(DeliverError::BadHash);
        }

        let mut max_parent_height = BlockHeight::new(0);
        for parent in &block.parents {
            if self.pruned.contains(parent) {
                return Err(DeliverError::Pruned);
            }
            match self.blocks.get(parent) {
                Some(parent_block) => {
                    max_parent_height = max_parent_height.max(parent_block.height)
                }
                None => return Err(DeliverError::UnknownParent { parent: *parent }),
            }
        }
        let expected = max_parent_height + 1;
        if block.height != expected {
            return Err(DeliverError::WrongHeight {
                expected,
                got: block.height,
            });
        }

        if let Some(justify) = &block.justify {
            let certified = match self.vote_texts.get(&justify.obj()) {
                Some(certified) => *certified,
                None => return Err(DeliverError::UnknownJustify),
            };
            self.record_qc(certified, justify);
        }

        let block = Arc::new(block);
        self.vote_texts.insert(vote_text(&block.hash), block.hash);
        self.blocks.insert(block.hash, Arc::clone(&block));
        Ok(block)
    }

    /// Whether the block named by `descendant` reaches `ancestor` by
    /// following true parents. A block extends itself.
    pub fn extends(&self, descendant: &CryptoHash, ancestor: &Arc<Block>) -> bool {
        let mut cursor = match self.blocks.get(descendant) {
            Some(block) => Arc::clone(block),
            None => return false,
        };
        while cursor.height > ancestor.height {
            cursor = match cursor.parent().and_then(|parent| self.blocks.get(parent)) {
                Some(parent) => Arc::clone(parent),
                None => return false,
            };
        }
        cursor.hash == ancestor.hash
    }

    /// Drop every delivered block below `cutoff`, except the genesis block.
    /// Dropped hashes are remembered so late references to them can be
    /// rejected rather than treated as caller bugs. Returns how many blocks
    /// were dropped.
    pub(crate) fn prune(&mut self, cutoff: BlockHeight) -> usize {
        let doomed: Vec<CryptoHash> = self
            .blocks
            .values()
            .filter(|block| block.height < cutoff && !block.is_genesis())
            .map(|block| block.hash)
            .collect();
        for blk_hash in &doomed {
            self.blocks.remove(blk_hash);
            self.vote_texts.remove(&vote_text(blk_hash));
            self.qcs.remove(blk_hash);
            self.pruned.insert(*blk_hash);
        }
        doomed.len()
    }
}
