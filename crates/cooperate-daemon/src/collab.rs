//! Collaborators the state machine drives but does not own.

use cooperate_types::{CooperateMessage, DhId, LocalDeviceId, NetworkId, SeedEvent, SessionId};

/// Local view of the input devices known to this node.
pub trait DeviceInventory: Send + Sync + 'static {
    /// Device handles that move together with `device`.
    fn resolve_dh_ids(&self, device: LocalDeviceId) -> Vec<DhId>;

    /// Network id of the node physically owning `device`.
    fn origin_network_id(&self, device: LocalDeviceId) -> NetworkId;

    /// Whether `device` is a pointer that can be shared.
    fn is_pointer_device(&self, device: LocalDeviceId) -> bool;

    /// The device handle of `device` itself, if it has one.
    fn device_dh_id(&self, device: LocalDeviceId) -> Option<DhId>;
}

/// Receives coarse start/stop outcomes.
pub trait CooperateNotifier: Send + Sync + 'static {
    fn on_start(&self, message: CooperateMessage);
    fn on_stop(&self, message: CooperateMessage);
}

/// Delivers synthetic hand-off events to the input data plane.
pub trait EventForwarder: Send + Sync + 'static {
    fn forward(&self, session: SessionId, events: &[SeedEvent]);
}
