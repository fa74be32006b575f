//! Profile subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile service error: {0}")]
    Service(String),

    #[error("malformed profile: {0}")]
    Malformed(String),

    #[error("profile subscription failed for {0:?}")]
    Subscribe(Vec<crate::ProfileEvent>),

    #[error("profile sync failed: {0}")]
    SyncFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
