//! Shared types for input-cooperate.
//!
//! This crate contains all types shared across the input-cooperate workspace:
//! node and device-handle identifiers, the cooperation and pass-through
//! states, control-plane messages, and the synthetic events replayed on
//! hand-off.

pub mod device;
pub mod event;
pub mod machine;
pub mod message;
pub mod state;

pub use device::{DhId, DhIdState, LocalDeviceId};
pub use event::SeedEvent;
pub use machine::{NetworkId, SessionId};
pub use message::{
    ControlFrame, ControlMessage, CooperateMessage, Method, UnknownMethod, RESULT_FAILED,
    RESULT_OK,
};
pub use state::CooperationState;
