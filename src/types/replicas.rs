/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fixed replica table and the protocol parameters derived from it.

use std::net::SocketAddr;
use std::time::Duration;

use ed25519_dalek::VerifyingKey;

use super::basic::ReplicaId;

/// One entry of the replica table.
#[derive(Clone)]
pub struct ReplicaInfo {
    pub id: ReplicaId,
    pub addr: SocketAddr,
    pub pubkey: VerifyingKey,
}

/// The replica set, the quorum threshold, and the view-time parameter.
///
/// Shared-immutable once the protocol starts: replicas are appended only
/// during configuration, and positions double as replica ids.
#[derive(Clone)]
pub struct ReplicaConfig {
    replicas: Vec<ReplicaInfo>,
    n_majority: usize,
    delta: Duration,
}

impl ReplicaConfig {
    pub(crate) fn new() -> ReplicaConfig {
        ReplicaConfig {
            replicas: Vec::new(),
            n_majority: 0,
            delta: Duration::ZERO,
        }
    }

    pub(crate) fn set_quorum(&mut self, n_faulty: u16, delta: Duration) {
        self.n_majority = n_faulty as usize + 1;
        self.delta = delta;
    }

    /// Append a replica. Ids are positional: the next replica must carry the
    /// next free id.
    pub(crate) fn add(&mut self, info: ReplicaInfo) {
        assert_eq!(
            info.id.index(),
            self.replicas.len(),
            "replica ids must be added in order and without gaps"
        );
        self.replicas.push(info);
    }

    pub fn pubkey(&self, id: ReplicaId) -> Option<&VerifyingKey> {
        self.replicas.get(id.index()).map(|info| &info.pubkey)
    }

    pub fn pubkey_at(&self, pos: usize) -> Option<&VerifyingKey> {
        self.replicas.get(pos).map(|info| &info.pubkey)
    }

    pub fn replica(&self, id: ReplicaId) -> Option<&ReplicaInfo> {
        self.replicas.get(id.index())
    }

    pub fn replicas(&self) -> std::slice::Iter<'_, ReplicaInfo> {
        self.replicas.iter()
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// The quorum threshold `n_majority = f + 1`.
    pub fn n_majority(&self) -> usize {
        self.n_majority
    }

    /// The view-time parameter bounding the commit timer.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Whether `on_init` ran and enough replicas are registered to ever form
    /// a quorum.
    pub fn is_complete(&self) -> bool {
        self.n_majority > 0 && self.replicas.len() >= self.n_majority
    }
}
