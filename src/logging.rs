/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Helpers for logging out protocol events.
//!
//! The crate logs through the [log](https://docs.rs/log/latest/log/) facade.
//! To get the messages printed onto a terminal or into a file, set up a
//! logging implementation in the enclosing node.
//!
//! Log messages are CSVs (Comma Separated Values) with at least one value:
//! the name of the event in PascalCase (defined in this module as constants).
//! Block hashes and proof text hashes are rendered as the first seven
//! characters of their base64 encoding.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

// Names of each event in PascalCase for printing:
pub const DELIVER_BLOCK: &str = "DeliverBlock";
pub const DROP_BLOCK: &str = "DropBlock";
pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const VOTE: &str = "Vote";
pub const COLLECT_QC: &str = "CollectQC";
pub const UPDATE_HIGHEST_QC: &str = "UpdateHighestQC";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const PRUNE_BLOCK: &str = "PruneBlock";
pub const PROPOSE: &str = "Propose";
pub const RECEIVE_NOTIFY: &str = "ReceiveNotify";
pub const RECEIVE_BLAME: &str = "ReceiveBlame";
pub const COLLECT_BLAME_QC: &str = "CollectBlameQC";
pub const ADVANCE_VIEW: &str = "AdvanceView";
pub const EQUIVOCATION: &str = "Equivocation";
pub const DROP_MESSAGE: &str = "DropMessage";

/// A more readable representation of a byte sequence: the first seven
/// characters of its base64 encoding.
pub(crate) fn short_id(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}
