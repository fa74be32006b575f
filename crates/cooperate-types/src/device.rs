//! Device handle types.

use serde::{Deserialize, Serialize};

/// Local OS identifier of an input device. Transient: changes on re-plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalDeviceId(pub i32);

impl std::fmt::Display for LocalDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device-handle id: the cooperation layer's stable name for one physical
/// input device, shared by every node that sees the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DhId(String);

impl DhId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DhId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for DhId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction in which a device handle's events currently flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DhIdState {
    /// This node accepts forwarded events for the device on behalf of a
    /// remote owner.
    ThroughIn,
    /// This node forwards the device's events to a remote owner.
    ThroughOut,
}
