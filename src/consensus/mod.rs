/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus state machine and its supporting pieces.

pub(crate) mod collectors;

pub mod core;

pub(crate) mod safety;

pub use self::core::{ConsensusCore, Environment};
