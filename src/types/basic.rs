/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert newtypes shared by every layer of the crate.
//!
//! These types are sent around and inspected but have no active behavior. They
//! follow the newtype pattern; the API for using them is defined here. All of
//! them serialize through borsh, which fixes the little-endian wire layout.

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, AddAssign};

use borsh::{BorshDeserialize, BorshSerialize};

/// Identity of a replica: its position in the replica table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ReplicaId(u16);

impl ReplicaId {
    pub const fn new(int: u16) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u16 {
        self.0
    }

    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for ReplicaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Height of a block: distance from the genesis block along true parents.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u32);

impl BlockHeight {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    pub fn saturating_sub(&self, rhs: u32) -> BlockHeight {
        BlockHeight(self.0.saturating_sub(rhs))
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for BlockHeight {
    type Output = BlockHeight;

    fn add(self, rhs: u32) -> Self::Output {
        BlockHeight(self.0.add(rhs))
    }
}

impl AddAssign<u32> for BlockHeight {
    fn add_assign(&mut self, rhs: u32) {
        self.0.add_assign(rhs)
    }
}

/// View number: the epoch within which one replica is leader.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewNumber(u32);

impl ViewNumber {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for ViewNumber {
    type Output = ViewNumber;

    fn add(self, rhs: u32) -> Self::Output {
        ViewNumber(self.0.add(rhs))
    }
}

/// The hash of a block, or of a domain-separated proof text.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::logging::short_id(&self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// The hash of a single command carried in a block. Commands themselves are
/// opaque to the core; only their hashes travel through it.
pub type CommandHash = CryptoHash;

/// An ed25519 signature represented in bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// Set of signatures, represented as a vector with one slot per replica.
/// The value at position `i` is:
/// 1. `None`: no signature from replica `i` has been collected, or
/// 2. `Some(signature_bytes)`: the signature obtained from replica `i`.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct SignatureSet(Vec<Option<SignatureBytes>>);

impl SignatureSet {
    pub const fn init() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Option<SignatureBytes>> {
        self.0.iter()
    }

    pub fn get(&self, pos: usize) -> &Option<SignatureBytes> {
        &self.0[pos]
    }

    pub(crate) fn set(&mut self, pos: usize, value: Option<SignatureBytes>) {
        self.0[pos] = value
    }

    /// Number of slots, i.e., the size of the replica set the signatures are
    /// indexed against.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of signatures actually present.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }
}
