//! Collaborator seams: the external session service and the inbound
//! request handler.

use async_trait::async_trait;
use cooperate_types::{ControlMessage, NetworkId, SessionId};

use crate::error::TransportError;

/// External reliable session service.
///
/// Open completion is asynchronous: the implementation reports it by calling
/// [`ControlTransport::on_session_opened`](crate::ControlTransport::on_session_opened).
/// Inbound data and peer-initiated closes are reported through
/// [`ControlTransport::on_bytes_received`](crate::ControlTransport::on_bytes_received)
/// and [`ControlTransport::on_session_closed`](crate::ControlTransport::on_session_closed).
#[async_trait]
pub trait SessionService: Send + Sync + 'static {
    /// Start opening a session to `peer`. Returns the new session handle
    /// immediately; the open outcome arrives later.
    fn open_session(
        &self,
        local_name: &str,
        peer_name: &str,
        peer: &NetworkId,
    ) -> Result<SessionId, TransportError>;

    /// Close a session. Closing an unknown session is a no-op.
    fn close_session(&self, session: SessionId);

    /// Write one buffer on a session.
    async fn send_bytes(&self, session: SessionId, buf: &[u8]) -> Result<(), TransportError>;

    /// Network id of the node on the other end of `session`.
    fn peer_device_id(&self, session: SessionId) -> Option<NetworkId>;
}

/// Serves control requests sent by remote nodes.
#[async_trait]
pub trait ControlRequestHandler: Send + Sync + 'static {
    /// Handle one request from `from` and return the result code to send
    /// back (`RESULT_OK` on success).
    async fn handle_request(&self, from: &NetworkId, message: &ControlMessage) -> i32;
}
