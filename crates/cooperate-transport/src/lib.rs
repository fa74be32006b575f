//! Session-oriented control transport for input-cooperate.
//!
//! This crate opens one session per remote node through an external
//! [`SessionService`], writes JSON control frames on it, and correlates each
//! response with the single pending request of the same method for the same
//! node. Inbound requests are handed to a [`ControlRequestHandler`].

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod session;
pub mod transport;
pub mod wire;

pub use error::TransportError;
pub use session::{ControlRequestHandler, SessionService};
pub use transport::{ControlTransport, TransportConfig};
