//! Integration tests driving nodes wired by `setup::build_node` over the
//! in-memory session hub and profile store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cooperate_daemon::config::Config;
use cooperate_daemon::setup::{build_node, log_filter};
use cooperate_daemon::{
    Collaborators, CooperateError, CooperateNotifier, CooperationStateMachine, DeviceInventory,
    EventForwarder,
};
use cooperate_profile::mock::MockProfileStore;
use cooperate_transport::mock::MockSessionHub;
use cooperate_types::{
    CooperateMessage, CooperationState, DhId, DhIdState, LocalDeviceId, NetworkId, SeedEvent,
    SessionId,
};
use parking_lot::Mutex;

const POINTER: LocalDeviceId = LocalDeviceId(1);

#[derive(Default)]
struct Inventory {
    devices: Mutex<HashMap<LocalDeviceId, (NetworkId, Vec<DhId>)>>,
}

impl DeviceInventory for Inventory {
    fn resolve_dh_ids(&self, device: LocalDeviceId) -> Vec<DhId> {
        self.devices
            .lock()
            .get(&device)
            .map(|(_, ids)| ids.clone())
            .unwrap_or_default()
    }

    fn origin_network_id(&self, device: LocalDeviceId) -> NetworkId {
        self.devices
            .lock()
            .get(&device)
            .map_or_else(|| NetworkId::new(""), |(origin, _)| origin.clone())
    }

    fn is_pointer_device(&self, device: LocalDeviceId) -> bool {
        self.devices.lock().contains_key(&device)
    }

    fn device_dh_id(&self, device: LocalDeviceId) -> Option<DhId> {
        self.devices
            .lock()
            .get(&device)
            .and_then(|(_, ids)| ids.first().cloned())
    }
}

#[derive(Default)]
struct Outcomes {
    starts: Mutex<Vec<CooperateMessage>>,
    stops: Mutex<Vec<CooperateMessage>>,
    seeds: Mutex<Vec<(SessionId, SeedEvent)>>,
}

impl CooperateNotifier for Outcomes {
    fn on_start(&self, message: CooperateMessage) {
        self.starts.lock().push(message);
    }

    fn on_stop(&self, message: CooperateMessage) {
        self.stops.lock().push(message);
    }
}

impl EventForwarder for Outcomes {
    fn forward(&self, session: SessionId, events: &[SeedEvent]) {
        self.seeds
            .lock()
            .extend(events.iter().map(|e| (session, e.clone())));
    }
}

struct TestNode {
    machine: Arc<CooperationStateMachine>,
    inventory: Arc<Inventory>,
    outcomes: Arc<Outcomes>,
}

fn config_for(id: &str) -> Config {
    let toml_str = format!(
        r#"
[node]
network_id = "{id}"
log_level = "debug"

[transport]
open_timeout_ms = 300
"#
    );
    toml::from_str(&toml_str).unwrap()
}

fn spawn_node(hub: &MockSessionHub, store: &MockProfileStore, id: &str) -> TestNode {
    let config = config_for(id);
    let inventory = Arc::new(Inventory::default());
    let outcomes = Arc::new(Outcomes::default());
    let machine = build_node(
        &config,
        hub.service_for(config.network_id()),
        store.service_for(config.network_id()),
        Collaborators {
            inventory: inventory.clone(),
            notifier: outcomes.clone(),
            forwarder: outcomes.clone(),
        },
    )
    .unwrap();
    hub.attach(machine.transport());
    TestNode {
        machine,
        inventory,
        outcomes,
    }
}

fn net(id: &str) -> NetworkId {
    NetworkId::from(id)
}

async fn setup_pair() -> (MockSessionHub, MockProfileStore, TestNode, TestNode) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config_for("node-left").node.log_level))
        .with_test_writer()
        .try_init();

    let hub = MockSessionHub::new();
    let store = MockProfileStore::new();
    let left = spawn_node(&hub, &store, "node-left");
    let right = spawn_node(&hub, &store, "node-right");

    left.machine.on_device_online(&net("node-right"));
    right.machine.on_device_online(&net("node-left"));
    left.machine.enable_cooperate(true).await.unwrap();
    right.machine.enable_cooperate(true).await.unwrap();
    settle().await;

    left.inventory.devices.lock().insert(
        POINTER,
        (
            net("node-left"),
            vec![DhId::from("left-touchpad"), DhId::from("left-keyboard")],
        ),
    );
    (hub, store, left, right)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn enabling_is_seen_by_the_other_node() {
    let (_hub, _store, left, right) = setup_pair().await;

    assert_eq!(left.machine.remote_switch(&net("node-right")), Some(true));
    assert_eq!(right.machine.remote_switch(&net("node-left")), Some(true));
    assert!(left.machine.is_cooperate_enabled(&net("node-right")));
}

#[tokio::test]
async fn full_cooperation_cycle() {
    let (hub, _store, left, right) = setup_pair().await;
    let touchpad = DhId::from("left-touchpad");
    let keyboard = DhId::from("left-keyboard");
    left.machine.dh_cache().refresh_abs_position(&touchpad, 640, 360);
    left.machine.dh_cache().add_key_down_state(&keyboard, 2047);
    left.machine.dh_cache().add_key_down_state(&keyboard, 2076);
    left.machine.dh_cache().on_key_repeat(&keyboard, 2047);

    left.machine
        .start_cooperate(&net("node-right"), POINTER)
        .await
        .unwrap();

    assert_eq!(left.machine.state(), CooperationState::Out);
    assert_eq!(right.machine.state(), CooperationState::In);
    assert_eq!(
        right.machine.dh_cache().dh_id_state(&keyboard),
        Some(DhIdState::ThroughIn)
    );
    assert_eq!(hub.open_count(), 1);

    // Held keys replay in recency order, then the touchpad position.
    let session = left.machine.transport().session_of(&net("node-right")).unwrap();
    let seeds = left.outcomes.seeds.lock().clone();
    let keys: Vec<i32> = seeds
        .iter()
        .filter_map(|(_, e)| match e {
            SeedEvent::Key { key_code, .. } => Some(*key_code),
            SeedEvent::AbsPosition { .. } => None,
        })
        .collect();
    assert_eq!(keys, vec![2076, 2047]);
    assert!(seeds.iter().all(|(s, _)| *s == session));
    assert_eq!(seeds.len(), 3);

    left.machine.stop_cooperate(POINTER).await.unwrap();
    assert_eq!(left.machine.state(), CooperationState::Free);
    assert_eq!(right.machine.state(), CooperationState::Free);
    assert_eq!(*left.outcomes.starts.lock(), vec![CooperateMessage::InfoSuccess]);
    assert_eq!(*left.outcomes.stops.lock(), vec![CooperateMessage::StopSuccess]);
    assert_eq!(*right.outcomes.stops.lock(), vec![CooperateMessage::StopSuccess]);
}

#[tokio::test]
async fn unreachable_peer_times_out() {
    let (hub, _store, left, _right) = setup_pair().await;
    hub.set_ignore_open(&net("node-right"), true);

    let err = left
        .machine
        .start_cooperate(&net("node-right"), POINTER)
        .await
        .unwrap_err();

    assert!(matches!(err, CooperateError::PrepareFailed(_)));
    assert_eq!(left.machine.prepared_pair(), None);
    assert_eq!(*left.outcomes.starts.lock(), vec![CooperateMessage::InfoFail]);
}

#[tokio::test]
async fn dropped_session_then_offline_recovers() {
    let (hub, _store, left, right) = setup_pair().await;
    left.machine
        .start_cooperate(&net("node-right"), POINTER)
        .await
        .unwrap();

    hub.disconnect(&net("node-left"), &net("node-right"));
    left.machine.on_device_offline(&net("node-right"));
    right.machine.on_device_offline(&net("node-left"));
    assert_eq!(left.machine.state(), CooperationState::Free);
    assert_eq!(right.machine.state(), CooperationState::Free);

    // Both come back: a fresh session and a fresh prepare.
    left.machine.on_device_online(&net("node-right"));
    right.machine.on_device_online(&net("node-left"));
    left.machine
        .start_cooperate(&net("node-right"), POINTER)
        .await
        .unwrap();
    assert_eq!(right.machine.state(), CooperationState::In);
    assert_eq!(hub.open_count(), 2);
}

#[tokio::test]
async fn lost_stop_reply_reports_stop_fail() {
    let (hub, _store, left, right) = setup_pair().await;
    left.machine
        .start_cooperate(&net("node-right"), POINTER)
        .await
        .unwrap();
    hub.set_fail_send(&net("node-right"), true);

    let err = left.machine.stop_cooperate(POINTER).await.unwrap_err();

    assert!(matches!(err, CooperateError::StopFailed(_)));
    assert_eq!(left.machine.state(), CooperationState::Out);
    assert_eq!(right.machine.state(), CooperationState::In);
    assert_eq!(*left.outcomes.stops.lock(), vec![CooperateMessage::StopFail]);

    hub.set_fail_send(&net("node-right"), false);
    left.machine.stop_cooperate(POINTER).await.unwrap();
    assert_eq!(right.machine.state(), CooperationState::Free);
}
