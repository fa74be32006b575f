//! Synthetic events replayed toward a new owner on hand-off.
//!
//! The raw input event encoding is owned by the input data plane; these are
//! the only events the control plane ever produces itself.

use serde::{Deserialize, Serialize};

use crate::device::DhId;

/// A synthetic event that seeds the new owner of a device handle with the
/// state the device was in at the moment of hand-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SeedEvent {
    /// A key that is held down on the device.
    Key {
        dh_id: DhId,
        key_code: i32,
        pressed: bool,
    },

    /// Last absolute position reported by an absolute-positioning device.
    AbsPosition { dh_id: DhId, x: i32, y: i32 },
}

impl SeedEvent {
    /// The device handle the event belongs to.
    #[must_use]
    pub fn dh_id(&self) -> &DhId {
        match self {
            Self::Key { dh_id, .. } | Self::AbsPosition { dh_id, .. } => dh_id,
        }
    }
}
