/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Incremental aggregation of votes and blames into quorum certificates.

use std::collections::{HashMap, HashSet};

use crate::types::basic::{CryptoHash, ReplicaId, SignatureBytes, ViewNumber};
use crate::types::certificates::{blame_text, create_quorum_cert, vote_text, QuorumCert};

/// Serves to incrementally form a [`QuorumCert`] over a block's vote text by
/// combining votes for that block from distinct replicas.
///
/// Duplicate votes from the same replica are no-ops, and a block whose
/// certificate has already been completed accepts no further votes.
pub(crate) struct VoteCollector {
    n_replicas: usize,
    n_majority: usize,
    in_flight: HashMap<CryptoHash, QuorumCert>,
    completed: HashSet<CryptoHash>,
}

impl VoteCollector {
    pub(crate) fn new(n_replicas: usize, n_majority: usize) -> VoteCollector {
        VoteCollector {
            n_replicas,
            n_majority,
            in_flight: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// Add `voter`'s signature to the in-flight certificate for `blk_hash`,
    /// returning the finished certificate once `n_majority` distinct voters
    /// have contributed.
    ///
    /// # Preconditions
    ///
    /// The signature has been verified against `voter`'s public key and the
    /// block's vote text.
    pub(crate) fn collect(
        &mut self,
        blk_hash: CryptoHash,
        voter: ReplicaId,
        signature: SignatureBytes,
    ) -> Option<QuorumCert> {
        if voter.index() >= self.n_replicas || self.completed.contains(&blk_hash) {
            return None;
        }

        let builder = self
            .in_flight
            .entry(blk_hash)
            .or_insert_with(|| create_quorum_cert(vote_text(&blk_hash), self.n_replicas));

        if builder.signatures().get(voter.index()).is_some() {
            return None;
        }
        builder.add_part(voter.index(), signature);

        if builder.signatures().count() == self.n_majority {
            let qc = self.in_flight.remove(&blk_hash).unwrap();
            self.completed.insert(blk_hash);
            Some(qc)
        } else {
            None
        }
    }
}

/// The blame-side counterpart of [`VoteCollector`]: combines blames for the
/// same view into a certificate over the view's blame text.
pub(crate) struct BlameCollector {
    n_replicas: usize,
    n_majority: usize,
    in_flight: HashMap<ViewNumber, QuorumCert>,
    completed: HashSet<ViewNumber>,
}

impl BlameCollector {
    pub(crate) fn new(n_replicas: usize, n_majority: usize) -> BlameCollector {
        BlameCollector {
            n_replicas,
            n_majority,
            in_flight: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// # Preconditions
    ///
    /// The signature has been verified against `blamer`'s public key and the
    /// view's blame text.
    pub(crate) fn collect(
        &mut self,
        view: ViewNumber,
        blamer: ReplicaId,
        signature: SignatureBytes,
    ) -> Option<QuorumCert> {
        if blamer.index() >= self.n_replicas || self.completed.contains(&view) {
            return None;
        }

        let builder = self
            .in_flight
            .entry(view)
            .or_insert_with(|| create_quorum_cert(blame_text(view), self.n_replicas));

        if builder.signatures().get(blamer.index()).is_some() {
            return None;
        }
        builder.add_part(blamer.index(), signature);

        if builder.signatures().count() == self.n_majority {
            let qc = self.in_flight.remove(&view).unwrap();
            self.completed.insert(view);
            Some(qc)
        } else {
            None
        }
    }

    /// Discard in-flight aggregation for views that can no longer matter.
    pub(crate) fn discard_below(&mut self, view: ViewNumber) {
        self.in_flight.retain(|v, _| *v >= view);
    }
}
