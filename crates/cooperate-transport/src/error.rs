//! Transport errors.

use cooperate_types::{Method, NetworkId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out opening session to {0}")]
    SessionOpenTimeout(NetworkId),

    #[error("session open failed with code {0}")]
    SessionOpenFailed(i32),

    #[error("no session to {0}")]
    NotConnected(NetworkId),

    #[error("send failed: {0}")]
    Send(String),

    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("deserialisation error: {0}")]
    Deserialization(String),

    #[error("session closed before {0} completed")]
    SessionClosed(Method),

    #[error("pending {0} request replaced by a newer one")]
    Superseded(Method),

    #[error("peer rejected {method} with code {code}")]
    Rejected { method: Method, code: i32 },

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
