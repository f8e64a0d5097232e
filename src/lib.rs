/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A deterministic consensus state machine for leader-based Byzantine Fault
//! Tolerant state machine replication, in the HotStuff protocol family,
//! extended with an explicit blame-driven view change and a notify/status
//! path carried in proposals.
//!
//! The crate is the safety-and-liveness engine only: it decides when a block
//! is voted for, when a block becomes the certified head, when a block and
//! its ancestors commit, and how a stalled view is abandoned. Networking,
//! block storage and fetching, the verifier pool, and the pacemaker that
//! schedules leaders live in the enclosing node; the core reaches them
//! through the [`Environment`](consensus::Environment) trait and the
//! observation hooks on [`ConsensusCore`](consensus::ConsensusCore).

pub mod block_graph;

pub mod consensus;

pub mod logging;

pub mod messages;

pub mod observers;

pub mod types;

// Re-exports
pub use consensus::{ConsensusCore, Environment};
