//! Cooperation core for input-cooperate.
//!
//! Holds the cooperation state machine that hands a node's input devices to
//! a remote node and takes them back, the per device-handle cache that
//! replays held state on hand-off, node configuration, and setup helpers
//! that wire a node together from its collaborators.

pub mod cache;
pub mod collab;
pub mod config;
pub mod error;
pub mod machine;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod setup;

pub use cache::DeviceHandleStateCache;
pub use collab::{CooperateNotifier, DeviceInventory, EventForwarder};
pub use config::Config;
pub use error::CooperateError;
pub use machine::{Collaborators, CooperationStateMachine, PreparedPair};
