//! Recording collaborator doubles for testing.

use std::collections::HashMap;

use cooperate_types::{CooperateMessage, DhId, LocalDeviceId, NetworkId, SeedEvent, SessionId};
use parking_lot::Mutex;

use crate::collab::{CooperateNotifier, DeviceInventory, EventForwarder};

/// One device known to a [`MockInventory`].
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub dh_ids: Vec<DhId>,
    pub origin: NetworkId,
    pub pointer: bool,
    pub dh_id: Option<DhId>,
}

impl MockDevice {
    /// A shareable pointer owned by `origin` that moves together with
    /// `dh_ids`. Its own handle is the first of them.
    pub fn pointer(origin: &str, dh_ids: &[&str]) -> Self {
        let dh_ids: Vec<DhId> = dh_ids.iter().map(|id| DhId::from(*id)).collect();
        Self {
            dh_id: dh_ids.first().cloned(),
            dh_ids,
            origin: NetworkId::from(origin),
            pointer: true,
        }
    }
}

/// Device inventory backed by a table. Unknown devices resolve to nothing.
#[derive(Default)]
pub struct MockInventory {
    devices: Mutex<HashMap<LocalDeviceId, MockDevice>>,
}

impl MockInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: LocalDeviceId, device: MockDevice) {
        self.devices.lock().insert(id, device);
    }

    /// Replace the handles `id` resolves to.
    pub fn set_dh_ids(&self, id: LocalDeviceId, dh_ids: Vec<DhId>) {
        if let Some(device) = self.devices.lock().get_mut(&id) {
            device.dh_ids = dh_ids;
        }
    }
}

impl DeviceInventory for MockInventory {
    fn resolve_dh_ids(&self, device: LocalDeviceId) -> Vec<DhId> {
        self.devices
            .lock()
            .get(&device)
            .map(|d| d.dh_ids.clone())
            .unwrap_or_default()
    }

    fn origin_network_id(&self, device: LocalDeviceId) -> NetworkId {
        self.devices
            .lock()
            .get(&device)
            .map_or_else(|| NetworkId::new(""), |d| d.origin.clone())
    }

    fn is_pointer_device(&self, device: LocalDeviceId) -> bool {
        self.devices.lock().get(&device).is_some_and(|d| d.pointer)
    }

    fn device_dh_id(&self, device: LocalDeviceId) -> Option<DhId> {
        self.devices.lock().get(&device).and_then(|d| d.dh_id.clone())
    }
}

/// Records every start/stop outcome.
#[derive(Default)]
pub struct RecordingNotifier {
    starts: Mutex<Vec<CooperateMessage>>,
    stops: Mutex<Vec<CooperateMessage>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> Vec<CooperateMessage> {
        self.starts.lock().clone()
    }

    pub fn stops(&self) -> Vec<CooperateMessage> {
        self.stops.lock().clone()
    }
}

impl CooperateNotifier for RecordingNotifier {
    fn on_start(&self, message: CooperateMessage) {
        self.starts.lock().push(message);
    }

    fn on_stop(&self, message: CooperateMessage) {
        self.stops.lock().push(message);
    }
}

/// Records every forwarded seed event with its session.
#[derive(Default)]
pub struct RecordingForwarder {
    events: Mutex<Vec<(SessionId, SeedEvent)>>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(SessionId, SeedEvent)> {
        self.events.lock().clone()
    }
}

impl EventForwarder for RecordingForwarder {
    fn forward(&self, session: SessionId, events: &[SeedEvent]) {
        self.events
            .lock()
            .extend(events.iter().map(|e| (session, e.clone())));
    }
}
