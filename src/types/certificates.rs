/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Partial and quorum certificates, and the domain-separated proof texts they
//! sign.
//!
//! A [`PartialCert`] is one replica's signature over a proof text; a
//! [`QuorumCert`] aggregates `n_majority` of them into a positional
//! [`SignatureSet`](crate::types::basic::SignatureSet). Both are tagged with
//! the SHA-256 hash of the proof text they certify (`obj`), so a certificate
//! can be checked against the text it is claimed to be about without trusting
//! the surrounding message.
//!
//! Proof texts are domain separated: a vote signs `0x00 ∥ blk_hash`, a blame
//! signs `0x01 ∥ view`. Omitting the tag byte would let a vote double as a
//! blame, so every text construction goes through this module.
//!
//! The `create_*`/`parse_*` functions at the bottom are the crypto factory
//! surface: the enclosing node constructs and parses certificates only through
//! them, keeping the signature scheme swappable in one place.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use super::basic::{CryptoHash, SignatureBytes, SignatureSet, ViewNumber};
use super::block::genesis_hash;
use super::keypair::Keypair;
use super::replicas::ReplicaConfig;

/// Domain separator prepended to every proof text before hashing and signing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ProofKind {
    Vote = 0x00,
    Blame = 0x01,
}

/// The proof text hash a vote for `blk_hash` signs: `sha256(0x00 ∥ blk_hash)`.
pub fn vote_text(blk_hash: &CryptoHash) -> CryptoHash {
    let mut hasher = Sha256::new();
    hasher.update([ProofKind::Vote as u8]);
    hasher.update(blk_hash.bytes());
    CryptoHash::new(hasher.finalize().into())
}

/// The proof text hash a blame for `view` signs: `sha256(0x01 ∥ view_le)`.
pub fn blame_text(view: ViewNumber) -> CryptoHash {
    let mut hasher = Sha256::new();
    hasher.update([ProofKind::Blame as u8]);
    hasher.update(view.to_le_bytes());
    CryptoHash::new(hasher.finalize().into())
}

/// A single replica's signature over a proof text.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct PartialCert {
    obj: CryptoHash,
    signature: SignatureBytes,
}

impl PartialCert {
    /// The proof text hash this certificate signs.
    pub fn obj(&self) -> CryptoHash {
        self.obj
    }

    pub fn signature(&self) -> SignatureBytes {
        self.signature
    }

    /// Check that `signature` is `pubkey`'s signature over `obj`.
    pub fn verify(&self, pubkey: &VerifyingKey) -> bool {
        let signature = Signature::from_bytes(&self.signature.bytes());
        pubkey.verify(&self.obj.bytes(), &signature).is_ok()
    }
}

/// Evidence that `n_majority` distinct replicas signed the same proof text.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct QuorumCert {
    obj: CryptoHash,
    signatures: SignatureSet,
}

impl QuorumCert {
    /// The quorum certificate for the genesis block. It carries no signatures
    /// and is correct by definition: the genesis block is agreed upon out of
    /// band, before the protocol runs.
    pub fn genesis() -> QuorumCert {
        QuorumCert {
            obj: vote_text(&genesis_hash()),
            signatures: SignatureSet::init(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// The proof text hash this certificate signs.
    pub fn obj(&self) -> CryptoHash {
        self.obj
    }

    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }

    /// Checks that the certificate carries exactly `n_majority` signatures
    /// from distinct replicas, each of them valid over the proof text hash.
    ///
    /// The genesis certificate is the sole special case and is always correct.
    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        if self.is_genesis() {
            return true;
        }

        if self.signatures.len() != config.len() {
            return false;
        }
        if self.signatures.count() != config.n_majority() {
            return false;
        }

        for (pos, slot) in self.signatures.iter().enumerate() {
            if let Some(signature_bytes) = slot {
                let signature = Signature::from_bytes(&signature_bytes.bytes());
                let signer = match config.pubkey_at(pos) {
                    Some(pubkey) => pubkey,
                    None => return false,
                };
                if signer.verify(&self.obj.bytes(), &signature).is_err() {
                    return false;
                }
            }
        }

        true
    }
}

/// Create a partial certificate: `keypair`'s signature over the proof text
/// hash `obj`.
pub fn create_part_cert(keypair: &Keypair, obj: CryptoHash) -> PartialCert {
    PartialCert {
        obj,
        signature: keypair.sign(&obj.bytes()),
    }
}

/// Parse a partial certificate from its serialized form.
pub fn parse_part_cert(buf: &mut &[u8]) -> std::io::Result<PartialCert> {
    PartialCert::deserialize(buf)
}

/// Create an empty quorum certificate over `obj` with one signature slot per
/// replica. Slots are filled by the vote and blame collectors.
pub fn create_quorum_cert(obj: CryptoHash, n_replicas: usize) -> QuorumCert {
    QuorumCert {
        obj,
        signatures: SignatureSet::new(n_replicas),
    }
}

/// Parse a quorum certificate from its serialized form.
pub fn parse_quorum_cert(buf: &mut &[u8]) -> std::io::Result<QuorumCert> {
    QuorumCert::deserialize(buf)
}

impl QuorumCert {
    /// Fill `pos`'s signature slot. Used by the collectors, and by enclosing
    /// nodes that assemble certificates out of parsed parts.
    pub fn add_part(&mut self, pos: usize, signature: SignatureBytes) {
        self.signatures.set(pos, Some(signature));
    }
}
