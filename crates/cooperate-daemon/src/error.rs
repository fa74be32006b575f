//! Cooperation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CooperateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("prepare failed: {0}")]
    PrepareFailed(String),

    #[error("start failed: {0}")]
    StartFailed(String),

    #[error("stop failed: {0}")]
    StopFailed(String),

    #[error("device {0} has no device handles")]
    NoDeviceHandles(cooperate_types::LocalDeviceId),

    #[error("a start is already in progress")]
    AlreadyStarting,

    #[error("a stop is already in progress")]
    AlreadyStopping,

    #[error("cooperation is disabled")]
    CooperateDisabled,

    #[error("transport error: {0}")]
    Transport(#[from] cooperate_transport::TransportError),

    #[error("profile error: {0}")]
    Profile(#[from] cooperate_profile::ProfileError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
