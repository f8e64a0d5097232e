/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Structured messages that are exchanged between replicas, and their wire
//! codec.
//!
//! ## Messages
//!
//! The protocol involves five authenticated messages:
//! 1. [`Proposal`]: broadcasted by the leader of a view, who proposes to
//!    extend the block DAG with the contained block.
//! 2. [`Vote`]: sent by a replica to attest to a proposed block; carries a
//!    partial certificate over the block's vote text.
//! 3. [`Notify`]: carries a quorum certificate, informing peers of a certified
//!    block (especially across view changes).
//! 4. [`Blame`]: a replica-signed accusation that the current view has failed.
//! 5. [`BlameNotify`]: carries the blame quorum certificate that justifies
//!    abandoning a view.
//!
//! [`Finality`] is output-only: one is emitted per command when a block
//! commits.
//!
//! ## Codec
//!
//! All integers are little-endian on the wire (borsh). Parsing a [`Proposal`]
//! needs to know how many notifies a status certificate contains, so every
//! message's [`read`](Proposal::read) takes the replica configuration as an
//! explicit context; messages themselves contain only data.

use std::fmt::{self, Display, Formatter};
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;

use crate::types::basic::{BlockHeight, CommandHash, CryptoHash, ReplicaId, ViewNumber};
use crate::types::block::Block;
use crate::types::certificates::{
    blame_text, parse_quorum_cert, vote_text, PartialCert, QuorumCert,
};
use crate::types::replicas::ReplicaConfig;

/// Messages that carry one replica's signature in the form of a
/// [`PartialCert`]. The certificate must be over the message's expected proof
/// text; anything else is a splicing attempt.
pub trait SignedMessage {
    /// The proof text hash the carried certificate must be over.
    fn expected_obj(&self) -> CryptoHash;

    /// The carried certificate.
    fn cert(&self) -> &PartialCert;

    /// Verify that the certificate is `pubkey`'s signature over the expected
    /// proof text.
    fn is_correct(&self, pubkey: &VerifyingKey) -> bool {
        self.cert().obj() == self.expected_obj() && self.cert().verify(pubkey)
    }
}

/// Envelope over the five replica-to-replica messages, for transports and
/// test harnesses that route them through one channel.
#[derive(Clone)]
pub enum Message {
    Proposal(Proposal),
    Vote(Vote),
    Notify(Notify),
    Blame(Blame),
    BlameNotify(BlameNotify),
}

impl From<Proposal> for Message {
    fn from(proposal: Proposal) -> Self {
        Message::Proposal(proposal)
    }
}

impl From<Vote> for Message {
    fn from(vote: Vote) -> Self {
        Message::Vote(vote)
    }
}

impl From<Notify> for Message {
    fn from(notify: Notify) -> Self {
        Message::Notify(notify)
    }
}

impl From<Blame> for Message {
    fn from(blame: Blame) -> Self {
        Message::Blame(blame)
    }
}

impl From<BlameNotify> for Message {
    fn from(blame_notify: BlameNotify) -> Self {
        Message::BlameNotify(blame_notify)
    }
}

/// Broadcasted by the leader of a view to extend the block DAG.
///
/// `cert_blk` duplicates the certificate attached inside the block, for the
/// benefit of receivers that want to check it before interning the block.
/// Normally it certifies the block's true parent; after a view change it may
/// certify the highest block the proposer knows to be certified instead.
/// `status_cert`, when present, holds exactly `n_majority` notifies proving
/// the proposer's locked state after a view change.
#[derive(Clone)]
pub struct Proposal {
    pub proposer: ReplicaId,
    pub block: Block,
    pub cert_blk: QuorumCert,
    pub status_cert: Option<Vec<Notify>>,
}

impl Proposal {
    /// Verify the proposal: the block's content hash, the carried certificate
    /// (which must be the one attached inside the block), and every notify in
    /// the status certificate.
    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        if self.block.parent().is_none() || !self.block.is_correct() {
            return false;
        }
        if self.block.justify.as_ref() != Some(&self.cert_blk) || !self.cert_blk.verify(config) {
            return false;
        }
        match &self.status_cert {
            None => true,
            Some(notifies) => {
                notifies.len() == config.n_majority()
                    && notifies.iter().all(|notify| notify.verify(config))
            }
        }
    }

    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        self.serialize(writer)
    }

    pub fn read(config: &ReplicaConfig, buf: &mut &[u8]) -> io::Result<Proposal> {
        let proposer = ReplicaId::deserialize(buf)?;
        let block = Block::deserialize(buf)?;
        let cert_blk = parse_quorum_cert(buf)?;
        let has_status = u8::deserialize(buf)?;
        let status_cert = match has_status {
            0 => None,
            1 => {
                let mut notifies = Vec::with_capacity(config.n_majority());
                for _ in 0..config.n_majority() {
                    notifies.push(Notify::deserialize(buf)?);
                }
                Some(notifies)
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "invalid status certificate flag",
                ))
            }
        };
        Ok(Proposal {
            proposer,
            block,
            cert_blk,
            status_cert,
        })
    }
}

impl BorshSerialize for Proposal {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        self.proposer.serialize(writer)?;
        self.block.serialize(writer)?;
        self.cert_blk.serialize(writer)?;
        match &self.status_cert {
            None => 0u8.serialize(writer),
            Some(notifies) => {
                1u8.serialize(writer)?;
                for notify in notifies {
                    notify.serialize(writer)?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Proposal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<proposal rid={} blk={} status={}>",
            self.proposer,
            self.block.hash,
            if self.status_cert.is_some() { "yes" } else { "no" }
        )
    }
}

/// Sent by a replica to attest to a proposed block.
#[derive(Clone, BorshDeserialize, BorshSerialize)]
pub struct Vote {
    pub voter: ReplicaId,
    pub blk_hash: CryptoHash,
    pub cert: PartialCert,
}

impl Vote {
    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        match config.pubkey(self.voter) {
            Some(pubkey) => self.is_correct(pubkey),
            None => false,
        }
    }

    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        self.serialize(writer)
    }

    pub fn read(_config: &ReplicaConfig, buf: &mut &[u8]) -> io::Result<Vote> {
        Vote::deserialize(buf)
    }
}

impl SignedMessage for Vote {
    fn expected_obj(&self) -> CryptoHash {
        vote_text(&self.blk_hash)
    }

    fn cert(&self) -> &PartialCert {
        &self.cert
    }
}

impl Display for Vote {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<vote rid={} blk={}>", self.voter, self.blk_hash)
    }
}

/// Carries a quorum certificate for a block, informing peers of a certified
/// (locked) block.
#[derive(Clone, BorshDeserialize, BorshSerialize)]
pub struct Notify {
    pub blk_hash: CryptoHash,
    pub qc: QuorumCert,
}

impl Notify {
    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        self.qc.obj() == vote_text(&self.blk_hash) && self.qc.verify(config)
    }

    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        self.serialize(writer)
    }

    pub fn read(_config: &ReplicaConfig, buf: &mut &[u8]) -> io::Result<Notify> {
        Notify::deserialize(buf)
    }
}

impl Display for Notify {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<notify blk={}>", self.blk_hash)
    }
}

/// A replica-signed accusation that the given view has failed.
#[derive(Clone, BorshDeserialize, BorshSerialize)]
pub struct Blame {
    pub blamer: ReplicaId,
    pub view: ViewNumber,
    pub cert: PartialCert,
}

impl Blame {
    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        match config.pubkey(self.blamer) {
            Some(pubkey) => self.is_correct(pubkey),
            None => false,
        }
    }

    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        self.serialize(writer)
    }

    pub fn read(_config: &ReplicaConfig, buf: &mut &[u8]) -> io::Result<Blame> {
        Blame::deserialize(buf)
    }
}

impl SignedMessage for Blame {
    fn expected_obj(&self) -> CryptoHash {
        blame_text(self.view)
    }

    fn cert(&self) -> &PartialCert {
        &self.cert
    }
}

impl Display for Blame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<blame rid={} view={}>", self.blamer, self.view)
    }
}

/// Carries the blame quorum certificate justifying the abandonment of a view.
#[derive(Clone, BorshDeserialize, BorshSerialize)]
pub struct BlameNotify {
    pub view: ViewNumber,
    pub qc: QuorumCert,
}

impl BlameNotify {
    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        self.qc.obj() == blame_text(self.view) && self.qc.verify(config)
    }

    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        self.serialize(writer)
    }

    pub fn read(_config: &ReplicaConfig, buf: &mut &[u8]) -> io::Result<BlameNotify> {
        BlameNotify::deserialize(buf)
    }
}

impl Display for BlameNotify {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<blame notify view={}>", self.view)
    }
}

/// The decision for one command of a committed block. Output only.
///
/// `blk_hash` is meaningful (and on the wire, present) only when
/// `decision == 1`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Finality {
    pub rid: ReplicaId,
    pub decision: i8,
    pub cmd_idx: u32,
    pub cmd_height: BlockHeight,
    pub cmd_hash: CommandHash,
    pub blk_hash: CryptoHash,
}

impl Finality {
    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        self.serialize(writer)
    }

    pub fn read(_config: &ReplicaConfig, buf: &mut &[u8]) -> io::Result<Finality> {
        let rid = ReplicaId::deserialize(buf)?;
        let decision = i8::deserialize(buf)?;
        let cmd_idx = u32::deserialize(buf)?;
        let cmd_height = BlockHeight::deserialize(buf)?;
        let cmd_hash = CommandHash::deserialize(buf)?;
        let blk_hash = if decision == 1 {
            CryptoHash::deserialize(buf)?
        } else {
            CryptoHash::new([0u8; 32])
        };
        Ok(Finality {
            rid,
            decision,
            cmd_idx,
            cmd_height,
            cmd_hash,
            blk_hash,
        })
    }
}

impl BorshSerialize for Finality {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        self.rid.serialize(writer)?;
        self.decision.serialize(writer)?;
        self.cmd_idx.serialize(writer)?;
        self.cmd_height.serialize(writer)?;
        self.cmd_hash.serialize(writer)?;
        if self.decision == 1 {
            self.blk_hash.serialize(writer)?;
        }
        Ok(())
    }
}

impl Display for Finality {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<fin decision={} cmd_idx={} cmd_height={} cmd={} blk={}>",
            self.decision, self.cmd_idx, self.cmd_height, self.cmd_hash, self.blk_hash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::SignatureBytes;
    use crate::types::certificates::{create_part_cert, create_quorum_cert};
    use crate::types::keypair::Keypair;
    use crate::types::replicas::ReplicaInfo;

    fn test_config(n: u16, n_faulty: u16) -> (Vec<Keypair>, ReplicaConfig) {
        let mut config = ReplicaConfig::new();
        config.set_quorum(n_faulty, std::time::Duration::from_secs(1));
        let keypairs: Vec<Keypair> = (0..n).map(|_| Keypair::generate()).collect();
        for (i, keypair) in keypairs.iter().enumerate() {
            config.add(ReplicaInfo {
                id: ReplicaId::new(i as u16),
                addr: "127.0.0.1:7000".parse().unwrap(),
                pubkey: keypair.public(),
            });
        }
        (keypairs, config)
    }

    fn quorum_cert_over(
        blk_hash: &CryptoHash,
        keypairs: &[Keypair],
        signers: &[usize],
    ) -> QuorumCert {
        let obj = vote_text(blk_hash);
        let mut qc = create_quorum_cert(obj, keypairs.len());
        for &pos in signers {
            qc.add_part(pos, keypairs[pos].sign(&obj.bytes()));
        }
        qc
    }

    #[test]
    fn vote_round_trip_and_verify() {
        let (keypairs, config) = test_config(4, 2);
        let blk_hash = CryptoHash::new([7u8; 32]);
        let vote = Vote {
            voter: ReplicaId::new(2),
            blk_hash,
            cert: create_part_cert(&keypairs[2], vote_text(&blk_hash)),
        };
        assert!(vote.verify(&config));

        let mut bytes = Vec::new();
        vote.write(&mut bytes).unwrap();
        // voter:u16 ∥ blk_hash:32 ∥ obj:32 ∥ sig:64
        assert_eq!(bytes.len(), 2 + 32 + 32 + 64);
        assert_eq!(bytes[0..2], [2u8, 0]);

        let parsed = Vote::read(&config, &mut bytes.as_slice()).unwrap();
        assert_eq!(parsed.voter, vote.voter);
        assert_eq!(parsed.blk_hash, vote.blk_hash);
        assert!(parsed.verify(&config));
    }

    #[test]
    fn vote_cert_does_not_verify_as_blame() {
        let (keypairs, config) = test_config(4, 2);
        let blk_hash = CryptoHash::new([7u8; 32]);
        let vote_cert = create_part_cert(&keypairs[1], vote_text(&blk_hash));

        let spliced = Blame {
            blamer: ReplicaId::new(1),
            view: ViewNumber::new(0),
            cert: vote_cert,
        };
        assert!(!spliced.verify(&config));
    }

    #[test]
    fn proposal_round_trip_with_status() {
        let (keypairs, config) = test_config(4, 2);
        let genesis = Block::genesis();
        let block = Block::new(
            vec![genesis.hash],
            BlockHeight::new(1),
            Some(QuorumCert::genesis()),
            vec![CryptoHash::new([1u8; 32])],
            Vec::new(),
        );
        let notifies: Vec<Notify> = (0..config.n_majority())
            .map(|_| Notify {
                blk_hash: genesis.hash,
                qc: quorum_cert_over(&genesis.hash, &keypairs, &[0, 1, 2]),
            })
            .collect();
        let proposal = Proposal {
            proposer: ReplicaId::new(0),
            block,
            cert_blk: QuorumCert::genesis(),
            status_cert: Some(notifies),
        };
        assert!(proposal.verify(&config));

        let mut bytes = Vec::new();
        proposal.write(&mut bytes).unwrap();
        let parsed = Proposal::read(&config, &mut bytes.as_slice()).unwrap();
        assert_eq!(parsed.block, proposal.block);
        assert_eq!(parsed.status_cert.as_ref().unwrap().len(), 3);
        assert!(parsed.verify(&config));

        let mut reencoded = Vec::new();
        parsed.write(&mut reencoded).unwrap();
        assert_eq!(bytes, reencoded);
    }

    #[test]
    fn proposal_without_status_ends_in_zero_flag() {
        let (_, config) = test_config(4, 2);
        let genesis = Block::genesis();
        let block = Block::new(
            vec![genesis.hash],
            BlockHeight::new(1),
            Some(QuorumCert::genesis()),
            Vec::new(),
            Vec::new(),
        );
        let proposal = Proposal {
            proposer: ReplicaId::new(3),
            block,
            cert_blk: QuorumCert::genesis(),
            status_cert: None,
        };

        let mut bytes = Vec::new();
        proposal.write(&mut bytes).unwrap();
        assert_eq!(*bytes.last().unwrap(), 0u8);

        let parsed = Proposal::read(&config, &mut bytes.as_slice()).unwrap();
        assert!(parsed.status_cert.is_none());
    }

    #[test]
    fn finality_omits_blk_hash_unless_committed() {
        let (_, config) = test_config(4, 2);
        let committed = Finality {
            rid: ReplicaId::new(1),
            decision: 1,
            cmd_idx: 4,
            cmd_height: BlockHeight::new(9),
            cmd_hash: CryptoHash::new([5u8; 32]),
            blk_hash: CryptoHash::new([6u8; 32]),
        };
        let mut bytes = Vec::new();
        committed.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 2 + 1 + 4 + 4 + 32 + 32);
        assert_eq!(Finality::read(&config, &mut bytes.as_slice()).unwrap(), committed);

        let undecided = Finality {
            decision: 0,
            ..committed
        };
        let mut bytes = Vec::new();
        undecided.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 2 + 1 + 4 + 4 + 32);

        let parsed = Finality::read(&config, &mut bytes.as_slice()).unwrap();
        assert_eq!(parsed.blk_hash, CryptoHash::new([0u8; 32]));
    }

    #[test]
    fn blame_notify_round_trip() {
        let (keypairs, config) = test_config(4, 2);
        let view = ViewNumber::new(3);
        let obj = blame_text(view);
        let mut qc = create_quorum_cert(obj, keypairs.len());
        for pos in [0usize, 2, 3] {
            qc.add_part(pos, keypairs[pos].sign(&obj.bytes()));
        }
        let blame_notify = BlameNotify { view, qc };
        assert!(blame_notify.verify(&config));

        let mut bytes = Vec::new();
        blame_notify.write(&mut bytes).unwrap();
        let parsed = BlameNotify::read(&config, &mut bytes.as_slice()).unwrap();
        assert_eq!(parsed.view, view);
        assert!(parsed.verify(&config));
    }

    #[test]
    fn tampered_signature_set_is_rejected() {
        let (keypairs, config) = test_config(4, 2);
        let blk_hash = CryptoHash::new([8u8; 32]);
        let mut qc = quorum_cert_over(&blk_hash, &keypairs, &[0, 1]);
        // Third "signature" is garbage.
        qc.add_part(3, SignatureBytes::new([0u8; 64]));

        let notify = Notify { blk_hash, qc };
        assert!(!notify.verify(&config));
    }
}
