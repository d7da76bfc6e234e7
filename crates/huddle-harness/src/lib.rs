//! Deterministic test support for Huddle.
//!
//! - [`SimEnv`]: virtual clock implementing [`huddle_core::Environment`]
//! - [`Client`]: sequenced event builder playing one participant
//! - [`InvariantRegistry`]: behavioral checks over every snapshot a
//!   subscriber observed
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the common
//! snapshot invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod invariants;
pub mod sim_env;

pub use events::{Client, duplicated, shuffled};
pub use invariants::{
    ActiveOnly, ChatOrdering, Invariant, InvariantRegistry, InvariantResult, JoinOrdering,
    RoomSeqMonotonic, SnapshotLog, Violation,
};
pub use sim_env::{SIM_EPOCH_MS, SimEnv, SimInstant};
