//! Huddle session core.
//!
//! Sans-IO state machines for a multi-party real-time session coordinator:
//! who is in each call, with what media state, kept consistent under joins,
//! leaves, drops, reconnects, duplicates and reordering.
//!
//! # Architecture
//!
//! Nothing here performs I/O or reads a clock. Time comes in through
//! [`Environment`]; side effects go out as [`RoomAction`]s. The same logic
//! runs under the synchronous [`SessionDriver`] (tests, embedders) and under
//! the per-room actors of `huddle-server`.
//!
//! # Components
//!
//! - [`EventSequencer`]: per-participant ordering, de-duplication, bounded
//!   reorder buffer
//! - [`transition`]: participant lifecycle state machine
//! - [`Room`]: participant store, room sequence counter, snapshots
//! - [`SessionRegistry`]: room directory
//! - [`PresenceMonitor`]: heartbeat timeouts and forced leaves
//! - [`RoomSession`]: one room's serialized event loop
//! - [`SessionDriver`]: synchronous facade over many rooms

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
mod driver;
pub mod env;
pub mod error;
pub mod event;
mod observer;
pub mod participant;
mod presence;
mod registry;
mod room;
pub mod sequencer;
mod session;
mod snapshot;

pub use config::SessionConfig;
pub use driver::SessionDriver;
pub use env::Environment;
pub use error::{ErrorKind, SessionError};
pub use event::{Event, EventKind, MediaField, MediaState, ParticipantId, RoomId};
pub use observer::{Callback, Observers, Subscription, SubscriptionId};
pub use participant::{LifecycleState, Mutation, Participant, Transition, transition};
pub use presence::PresenceMonitor;
pub use registry::{RoomSlot, SessionRegistry};
pub use room::{Applied, Room};
pub use sequencer::{Disposition, EventSequencer, Sequenced, SequencerAction};
pub use session::{Delivery, RoomAction, RoomSession};
pub use snapshot::{ChatMessage, ParticipantView, Snapshot};
