/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types shared across the crate: inert newtypes, blocks, certificates, the
//! signing keypair, and the replica table.

pub mod basic;

pub mod block;

pub mod certificates;

pub mod keypair;

pub mod replicas;
