//! Cooperation state of a node.

use serde::{Deserialize, Serialize};

/// Which way the pointer currently flows for this node.
///
/// In-flight start/stop requests are not states; the state machine tracks
/// them with separate flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CooperationState {
    /// No cooperation active.
    #[default]
    Free,
    /// This node is receiving another node's pointer.
    In,
    /// This node's pointer has been handed to a remote sink.
    Out,
}

impl CooperationState {
    /// Whether a cooperation session is live in either direction.
    pub fn is_active(self) -> bool {
        matches!(self, Self::In | Self::Out)
    }
}

impl std::fmt::Display for CooperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "Free"),
            Self::In => write!(f, "In"),
            Self::Out => write!(f, "Out"),
        }
    }
}
