/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rules and predicates that collectively guarantee the safety of
//! replication.
//!
//! [`should_vote`] is the vote rule: it decides whether a delivered proposal
//! may receive this replica's signature. Voting is monotonic in height, and a
//! block is only votable when it extends the locked branch — either because
//! the certificate it carries is at least as high as the highest certified
//! block, or because its parent descends from that block in the delivered
//! DAG.
//!
//! [`commit_chain`] derives the committed prefix: once a block is finalized,
//! every uncommitted ancestor of it commits with it, in increasing height
//! order. A finalized block that does not descend from the executed head is
//! a broken safety invariant, which the caller escalates.

use std::sync::Arc;

use crate::block_graph::BlockGraph;
use crate::types::basic::BlockHeight;
use crate::types::block::Block;

/// The vote rule. Returns whether a replica that last voted at `vheight` and
/// knows `bqc` as the highest certified block should vote for `block`.
pub(crate) fn should_vote(
    graph: &BlockGraph,
    block: &Block,
    bqc: &Arc<Block>,
    vheight: BlockHeight,
) -> bool {
    if block.height <= vheight {
        return false;
    }
    let parent = match block.parent().and_then(|hash| graph.get(hash)) {
        Some(parent) => parent,
        None => return false,
    };
    let certified = block
        .justify
        .as_ref()
        .and_then(|justify| graph.certified_block(justify));
    certified.map_or(false, |certified| certified.height >= bqc.height)
        || graph.extends(&parent.hash, bqc)
}

/// The uncommitted ancestors of `target`, inclusive, in increasing height
/// order. Returns `None` if `target` does not reach `bexec` along true
/// parents.
///
/// # Preconditions
///
/// `target.height > bexec.height`.
pub(crate) fn commit_chain(
    graph: &BlockGraph,
    target: &Arc<Block>,
    bexec: &Arc<Block>,
) -> Option<Vec<Arc<Block>>> {
    let mut chain = Vec::new();
    let mut cursor = Arc::clone(target);
    while cursor.height > bexec.height {
        chain.push(Arc::clone(&cursor));
        cursor = Arc::clone(graph.get(cursor.parent()?)?);
    }
    if cursor.hash == bexec.hash {
        chain.reverse();
        Some(chain)
    } else {
        None
    }
}
