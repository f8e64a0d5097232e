/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its methods.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use super::basic::{BlockHeight, CommandHash, CryptoHash};
use super::certificates::QuorumCert;

/// A node of the block DAG.
///
/// `parents[0]` is the true parent; later entries are uncles carried for
/// liveness. `justify`, when present, is the quorum certificate for
/// `parents[0]`. Two blocks are equal iff their hashes are equal.
#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub struct Block {
    pub hash: CryptoHash,
    pub parents: Vec<CryptoHash>,
    pub height: BlockHeight,
    pub justify: Option<QuorumCert>,
    pub commands: Vec<CommandHash>,
    pub extra: Vec<u8>,
}

impl Block {
    pub fn new(
        parents: Vec<CryptoHash>,
        height: BlockHeight,
        justify: Option<QuorumCert>,
        commands: Vec<CommandHash>,
        extra: Vec<u8>,
    ) -> Block {
        Block {
            hash: Block::hash(&parents, height, &justify, &commands, &extra),
            parents,
            height,
            justify,
            commands,
            extra,
        }
    }

    /// The genesis block: height 0, no parents, no justify, no commands.
    pub fn genesis() -> Block {
        Block::new(Vec::new(), BlockHeight::new(0), None, Vec::new(), Vec::new())
    }

    pub fn hash(
        parents: &Vec<CryptoHash>,
        height: BlockHeight,
        justify: &Option<QuorumCert>,
        commands: &Vec<CommandHash>,
        extra: &Vec<u8>,
    ) -> CryptoHash {
        let mut hasher = Sha256::new();
        hasher.update(parents.try_to_vec().unwrap());
        hasher.update(height.try_to_vec().unwrap());
        hasher.update(justify.try_to_vec().unwrap());
        hasher.update(commands.try_to_vec().unwrap());
        hasher.update(extra.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Checks that the carried hash matches the block's contents.
    pub fn is_correct(&self) -> bool {
        self.hash
            == Block::hash(
                &self.parents,
                self.height,
                &self.justify,
                &self.commands,
                &self.extra,
            )
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    /// The true parent, i.e., `parents[0]`.
    pub fn parent(&self) -> Option<&CryptoHash> {
        self.parents.first()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Block {}

/// The hash of the genesis block. Deterministic: every replica derives the
/// same genesis out of band.
pub fn genesis_hash() -> CryptoHash {
    Block::hash(
        &Vec::new(),
        BlockHeight::new(0),
        &None,
        &Vec::new(),
        &Vec::new(),
    )
}
