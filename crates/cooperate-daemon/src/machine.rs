//! Cooperation state machine.
//!
//! Drives one node's side of input cooperation: prepares a pair of nodes,
//! hands device handles to a remote node and takes them back, serves the
//! same requests when a remote node initiates, and keeps everything
//! consistent while nodes and devices come and go.
//!
//! The node state is one of [`CooperationState`]. In-flight starts and stops
//! are flags beside it: a second start while one is running is rejected, as
//! is a second stop, but a stop may interrupt a start. An interrupted start
//! is reported as failed and marks nothing. It sends no start request once
//! interrupted, and takes back any handles the remote node already
//! accepted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use cooperate_profile::{ProfileSyncClient, SwitchCallback};
use cooperate_transport::{ControlRequestHandler, ControlTransport, TransportError};
use cooperate_types::{
    ControlMessage, CooperateMessage, CooperationState, DhId, DhIdState, LocalDeviceId, NetworkId,
    RESULT_FAILED, RESULT_OK,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::DeviceHandleStateCache;
use crate::collab::{CooperateNotifier, DeviceInventory, EventForwarder};
use crate::error::CooperateError;

/// The last pair of nodes a prepare handshake succeeded for.
///
/// On the wire `remote` travels as `srcNetworkId` and `origin` as
/// `sinkNetworkId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPair {
    /// Node the input is handed to.
    pub remote: NetworkId,
    /// Node physically owning the shared devices.
    pub origin: NetworkId,
}

/// External collaborators of the state machine.
pub struct Collaborators {
    pub inventory: Arc<dyn DeviceInventory>,
    pub notifier: Arc<dyn CooperateNotifier>,
    pub forwarder: Arc<dyn EventForwarder>,
}

#[derive(Default)]
struct MachineState {
    state: CooperationState,
    prepared: Option<PreparedPair>,
    /// Other end of the live cooperation: the sink when `Out`, the source
    /// when `In`.
    peer: Option<NetworkId>,
    /// Remote node whose prepare this node accepted.
    prepared_by: Option<NetworkId>,
    /// Handle of the pointer that started the live outgoing cooperation.
    active_dh: Option<DhId>,
    online: HashSet<NetworkId>,
    /// Last crossing switch seen for each online node.
    switches: HashMap<NetworkId, bool>,
    enabled: bool,
    starting: bool,
    stopping: bool,
    /// Bumped whenever a running start must not complete.
    epoch: u64,
}

impl MachineState {
    fn reset(&mut self) -> CooperationState {
        let from = self.state;
        self.state = CooperationState::Free;
        self.peer = None;
        self.active_dh = None;
        from
    }
}

#[derive(Debug, Clone, Copy)]
enum Flight {
    Start,
    Stop,
}

/// Clears an in-flight flag when dropped.
struct InFlight<'a> {
    inner: &'a Mutex<MachineState>,
    flight: Flight,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        match self.flight {
            Flight::Start => inner.starting = false,
            Flight::Stop => inner.stopping = false,
        }
    }
}

/// Where a stop request goes and the pair it names.
struct StopTarget {
    node: NetworkId,
    src: NetworkId,
    sink: NetworkId,
}

pub struct CooperationStateMachine {
    local_id: NetworkId,
    transport: Arc<ControlTransport>,
    profile: Arc<ProfileSyncClient>,
    inventory: Arc<dyn DeviceInventory>,
    notifier: Arc<dyn CooperateNotifier>,
    cache: DeviceHandleStateCache,
    inner: Mutex<MachineState>,
    switch_listener: SwitchCallback,
}

impl CooperationStateMachine {
    /// Create the state machine and install it as the transport's request
    /// handler.
    ///
    /// Cooperation starts enabled only if this node's published crossing
    /// switch says so.
    pub fn new(
        transport: Arc<ControlTransport>,
        profile: Arc<ProfileSyncClient>,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let local_id = transport.local_id().clone();
        let enabled = profile.get_crossing_switch(&local_id);
        let machine = Arc::new_cyclic(|me: &Weak<Self>| {
            let target = me.clone();
            let switch_listener: SwitchCallback = Arc::new(move |device: &NetworkId, value: bool| {
                if let Some(machine) = target.upgrade() {
                    machine.on_crossing_switch(device, value);
                }
            });
            Self {
                local_id,
                transport,
                profile,
                inventory: collaborators.inventory,
                notifier: collaborators.notifier,
                cache: DeviceHandleStateCache::new(collaborators.forwarder),
                inner: Mutex::new(MachineState {
                    enabled,
                    ..MachineState::default()
                }),
                switch_listener,
            }
        });
        let weak = Arc::downgrade(&machine);
        let handler: Weak<dyn ControlRequestHandler> = weak;
        machine.transport.set_request_handler(handler);
        info!(node = %machine.local_id, enabled, "cooperation state machine ready");
        machine
    }

    pub fn local_id(&self) -> &NetworkId {
        &self.local_id
    }

    pub fn transport(&self) -> &Arc<ControlTransport> {
        &self.transport
    }

    /// The device-handle cache fed by the local input pipeline.
    pub fn dh_cache(&self) -> &DeviceHandleStateCache {
        &self.cache
    }

    /// State of this node.
    pub fn state(&self) -> CooperationState {
        self.inner.lock().state
    }

    /// Cooperation state as seen for `device`: this node's state for itself
    /// and for its live peer, `Free` for any other node.
    pub fn get_cooperate_state(&self, device: &NetworkId) -> CooperationState {
        let inner = self.inner.lock();
        if *device == self.local_id || inner.peer.as_ref() == Some(device) {
            inner.state
        } else {
            CooperationState::Free
        }
    }

    pub fn prepared_pair(&self) -> Option<PreparedPair> {
        self.inner.lock().prepared.clone()
    }

    pub fn peer(&self) -> Option<NetworkId> {
        self.inner.lock().peer.clone()
    }

    pub fn is_online(&self, device: &NetworkId) -> bool {
        self.inner.lock().online.contains(device)
    }

    /// Crossing switch of `device`, read from the profile service.
    pub fn is_cooperate_enabled(&self, device: &NetworkId) -> bool {
        self.profile.get_crossing_switch(device)
    }

    /// Last crossing switch pushed to this node for an online `device`.
    pub fn remote_switch(&self, device: &NetworkId) -> Option<bool> {
        self.inner.lock().switches.get(device).copied()
    }

    /// Hand the input devices moving with `device` to `remote`.
    ///
    /// The outcome is also reported through [`CooperateNotifier::on_start`].
    pub async fn start_cooperate(
        &self,
        remote: &NetworkId,
        device: LocalDeviceId,
    ) -> Result<(), CooperateError> {
        let result = match self.begin(Flight::Start) {
            Ok(_flight) => self.run_start(remote, device).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => self.notifier.on_start(CooperateMessage::InfoSuccess),
            Err(e) => {
                warn!(peer = %remote, device = %device, error = %e, "start failed");
                self.notifier.on_start(CooperateMessage::InfoFail);
            }
        }
        result
    }

    async fn run_start(
        &self,
        remote: &NetworkId,
        device: LocalDeviceId,
    ) -> Result<(), CooperateError> {
        if remote.is_empty() || *remote == self.local_id {
            return Err(CooperateError::StartFailed(format!(
                "invalid remote node '{remote}'"
            )));
        }
        let (epoch, enabled, state, peer) = {
            let inner = self.inner.lock();
            (inner.epoch, inner.enabled, inner.state, inner.peer.clone())
        };
        if !enabled {
            return Err(CooperateError::CooperateDisabled);
        }
        match state {
            CooperationState::In => {
                return Err(CooperateError::StartFailed(
                    "input is already coming in".to_string(),
                ));
            }
            CooperationState::Out if peer.as_ref() != Some(remote) => {
                return Err(CooperateError::StartFailed(format!(
                    "input already handed to {}",
                    peer.unwrap_or_else(|| NetworkId::new(""))
                )));
            }
            _ => {}
        }

        if !self.inventory.is_pointer_device(device) {
            debug!(device = %device, "device is not shared, start is local only");
            return Ok(());
        }
        if self.inventory.resolve_dh_ids(device).is_empty() {
            return Err(CooperateError::NoDeviceHandles(device));
        }

        let pair = PreparedPair {
            remote: remote.clone(),
            origin: self.inventory.origin_network_id(device),
        };
        let reuse = {
            let mut inner = self.inner.lock();
            if inner.prepared.as_ref() == Some(&pair) {
                true
            } else {
                inner.prepared = Some(pair.clone());
                false
            }
        };
        if reuse {
            debug!(remote = %pair.remote, origin = %pair.origin, "pair already prepared");
        } else {
            if let Err(e) = self.prepare_pair(&pair).await {
                let mut inner = self.inner.lock();
                if inner.prepared.as_ref() == Some(&pair) {
                    inner.prepared = None;
                }
                return Err(CooperateError::PrepareFailed(e.to_string()));
            }
            info!(remote = %pair.remote, origin = %pair.origin, "pair prepared");
        }

        self.check_epoch(epoch)?;
        self.start_remote_input(&pair, device, epoch).await
    }

    fn check_epoch(&self, epoch: u64) -> Result<(), CooperateError> {
        if self.inner.lock().epoch == epoch {
            Ok(())
        } else {
            Err(CooperateError::StartFailed(
                "interrupted before completion".to_string(),
            ))
        }
    }

    async fn prepare_pair(&self, pair: &PreparedPair) -> Result<(), TransportError> {
        self.transport.open(&pair.remote).await?;
        self.transport
            .prepare(&pair.remote, &pair.remote, &pair.origin)
            .await
    }

    async fn start_remote_input(
        &self,
        pair: &PreparedPair,
        device: LocalDeviceId,
        epoch: u64,
    ) -> Result<(), CooperateError> {
        let dh_ids = self.inventory.resolve_dh_ids(device);
        if dh_ids.is_empty() {
            return Err(CooperateError::NoDeviceHandles(device));
        }
        let start_failed = |e: TransportError| CooperateError::StartFailed(e.to_string());
        self.transport.open(&pair.remote).await.map_err(start_failed)?;
        self.check_epoch(epoch)?;
        self.transport
            .start(&pair.remote, &pair.remote, &pair.origin, &dh_ids)
            .await
            .map_err(start_failed)?;
        let session = self.transport.session_of(&pair.remote).ok_or_else(|| {
            CooperateError::StartFailed(format!("session to {} lost", pair.remote))
        })?;

        let active_dh = self.inventory.device_dh_id(device);
        let from = {
            let mut inner = self.inner.lock();
            (inner.epoch == epoch).then(|| {
                let from = inner.state;
                inner.state = CooperationState::Out;
                inner.peer = Some(pair.remote.clone());
                inner.active_dh = active_dh;
                from
            })
        };
        let Some(from) = from else {
            self.take_back(pair, &dh_ids).await;
            return Err(CooperateError::StartFailed(
                "interrupted before completion".to_string(),
            ));
        };
        info!(peer = %pair.remote, %from, handles = dh_ids.len(), "cooperation state -> Out");
        self.cache
            .record_dh_ids(&dh_ids, DhIdState::ThroughOut, session);
        Ok(())
    }

    /// Undo a start the remote node accepted after it was interrupted here.
    async fn take_back(&self, pair: &PreparedPair, dh_ids: &[DhId]) {
        match self
            .transport
            .stop(&pair.remote, &pair.remote, &pair.origin, dh_ids)
            .await
        {
            Ok(()) => info!(peer = %pair.remote, "interrupted start taken back"),
            Err(e) => warn!(peer = %pair.remote, error = %e, "cannot take back interrupted start"),
        }
    }

    /// Take back the input devices moving with `device`.
    ///
    /// A device without handles, or a node with nothing to stop remotely,
    /// stops locally. The outcome is also reported through
    /// [`CooperateNotifier::on_stop`].
    pub async fn stop_cooperate(&self, device: LocalDeviceId) -> Result<(), CooperateError> {
        let dh_ids = self.inventory.resolve_dh_ids(device);
        self.stop_handles(dh_ids).await
    }

    async fn stop_handles(&self, dh_ids: Vec<DhId>) -> Result<(), CooperateError> {
        let result = match self.begin(Flight::Stop) {
            Ok(_flight) => self.run_stop(dh_ids).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => self.notifier.on_stop(CooperateMessage::StopSuccess),
            Err(e) => {
                warn!(error = %e, "stop failed");
                self.notifier.on_stop(CooperateMessage::StopFail);
            }
        }
        result
    }

    async fn run_stop(&self, dh_ids: Vec<DhId>) -> Result<(), CooperateError> {
        let target = self.stop_target();
        let Some(target) = target.filter(|_| !dh_ids.is_empty()) else {
            self.stop_locally(&dh_ids);
            return Ok(());
        };
        self.transport
            .stop(&target.node, &target.src, &target.sink, &dh_ids)
            .await
            .map_err(|e| CooperateError::StopFailed(e.to_string()))?;
        self.stop_locally(&dh_ids);
        Ok(())
    }

    fn stop_target(&self) -> Option<StopTarget> {
        let inner = self.inner.lock();
        match inner.state {
            CooperationState::In => inner.peer.clone().map(|peer| StopTarget {
                src: self.local_id.clone(),
                sink: peer.clone(),
                node: peer,
            }),
            CooperationState::Out => {
                let peer = inner.peer.clone()?;
                let (src, sink) = match &inner.prepared {
                    Some(pair) if pair.remote == peer => (pair.remote.clone(), pair.origin.clone()),
                    _ => (peer.clone(), self.local_id.clone()),
                };
                Some(StopTarget {
                    node: peer,
                    src,
                    sink,
                })
            }
            // A running start takes back its own remote side.
            CooperationState::Free => None,
        }
    }

    fn stop_locally(&self, dh_ids: &[DhId]) {
        let from = self.inner.lock().reset();
        self.cache.remove_dh_ids(dh_ids);
        info!(%from, handles = dh_ids.len(), "cooperation state -> Free");
    }

    /// Tear down the prepared pair and wipe the device-handle cache.
    pub async fn unprepare(&self) -> Result<(), CooperateError> {
        let pair = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            if inner.state.is_active() {
                let from = inner.reset();
                info!(%from, "cooperation state -> Free");
            }
            inner.prepared.take()
        };
        self.cache.clear_all();
        let Some(pair) = pair else {
            debug!("nothing prepared");
            return Ok(());
        };
        info!(remote = %pair.remote, origin = %pair.origin, "unpreparing pair");
        self.transport
            .unprepare(&pair.remote, &pair.remote, &pair.origin)
            .await?;
        Ok(())
    }

    /// Set this node's crossing switch and broadcast it to every online
    /// node. Disabling while cooperation is live stops and unprepares
    /// first.
    pub async fn enable_cooperate(&self, enabled: bool) -> Result<(), CooperateError> {
        let (targets, active) = {
            let mut inner = self.inner.lock();
            inner.enabled = enabled;
            let mut targets: Vec<NetworkId> = inner.online.iter().cloned().collect();
            targets.sort();
            (targets, inner.state.is_active())
        };
        info!(enabled, targets = targets.len(), "cooperation switch changed");

        if !enabled && active {
            if let Err(e) = self.stop_handles(self.cache.recorded_dh_ids()).await {
                warn!(error = %e, "stop on disable failed");
            }
            if let Err(e) = self.unprepare().await {
                warn!(error = %e, "unprepare on disable failed");
            }
        }
        self.profile.set_crossing_switch(enabled, &targets)?;
        Ok(())
    }

    /// A node joined the network.
    pub fn on_device_online(&self, device: &NetworkId) {
        if *device == self.local_id || !self.inner.lock().online.insert(device.clone()) {
            return;
        }
        let crossing = self.profile.get_crossing_switch(device);
        self.inner.lock().switches.insert(device.clone(), crossing);
        if let Err(e) = self
            .profile
            .register_listener(device, Arc::clone(&self.switch_listener))
        {
            warn!(peer = %device, error = %e, "cannot watch crossing switch");
        }
        info!(peer = %device, crossing, "device online");
    }

    /// A node left the network. Losing a member of the prepared pair drops
    /// the pair; losing the live peer stops cooperation locally.
    pub fn on_device_offline(&self, device: &NetworkId) {
        self.profile.unregister_listener(device);
        let stopped = {
            let mut inner = self.inner.lock();
            inner.online.remove(device);
            inner.switches.remove(device);
            if inner.prepared_by.as_ref() == Some(device) {
                inner.prepared_by = None;
            }
            if inner
                .prepared
                .as_ref()
                .is_some_and(|pair| pair.remote == *device || pair.origin == *device)
            {
                inner.prepared = None;
                inner.epoch += 1;
                debug!(peer = %device, "prepared pair dropped");
            }
            if inner.state.is_active() && inner.peer.as_ref() == Some(device) {
                inner.epoch += 1;
                Some(inner.reset())
            } else {
                None
            }
        };
        if let Some(from) = stopped {
            self.cache.clear_all();
            warn!(peer = %device, %from, "peer went offline, cooperation state -> Free");
            self.notifier.on_stop(CooperateMessage::StopSuccess);
        }
        self.transport.close(device);
        info!(peer = %device, "device offline");
    }

    /// A keyboard was plugged in. While input is handed out it follows the
    /// pointer to the same node.
    pub async fn on_keyboard_online(&self, dh_id: &DhId) -> Result<(), CooperateError> {
        let target = {
            let inner = self.inner.lock();
            if inner.state == CooperationState::Out {
                inner
                    .peer
                    .clone()
                    .zip(inner.prepared.clone())
                    .filter(|(peer, pair)| pair.remote == *peer)
            } else {
                None
            }
        };
        let Some((peer, pair)) = target else {
            debug!(dh_id = %dh_id, "keyboard online, nothing to extend");
            return Ok(());
        };

        let dh_ids = [dh_id.clone()];
        self.transport
            .start(&peer, &pair.remote, &pair.origin, &dh_ids)
            .await
            .map_err(|e| CooperateError::StartFailed(e.to_string()))?;
        let session = self
            .transport
            .session_of(&peer)
            .ok_or_else(|| CooperateError::StartFailed(format!("session to {peer} lost")))?;
        self.cache
            .record_dh_ids(&dh_ids, DhIdState::ThroughOut, session);
        info!(peer = %peer, dh_id = %dh_id, "keyboard joined cooperation");
        Ok(())
    }

    /// A pointer was unplugged.
    ///
    /// `sink` is the node the pointer was driving and `peer_keyboards` the
    /// keyboards that were moving with it.
    pub async fn on_pointer_offline(
        &self,
        dh_id: &DhId,
        sink: &NetworkId,
        peer_keyboards: &[DhId],
    ) -> Result<(), CooperateError> {
        let (state, active_dh) = {
            let inner = self.inner.lock();
            (inner.state, inner.active_dh.clone())
        };
        match state {
            CooperationState::Free => {
                self.inner.lock().active_dh = None;
                Ok(())
            }
            CooperationState::In => {
                if sink.is_empty() || *sink == self.local_id {
                    // Keyboards may still be driving this node.
                    self.inner.lock().active_dh = None;
                    return Ok(());
                }
                let mut dh_ids = vec![dh_id.clone()];
                dh_ids.extend_from_slice(peer_keyboards);
                self.stop_locally(&dh_ids);
                self.notifier.on_stop(CooperateMessage::StopSuccess);
                Ok(())
            }
            CooperationState::Out => {
                if active_dh.as_ref() != Some(dh_id) {
                    debug!(dh_id = %dh_id, "inactive pointer offline");
                    return Ok(());
                }
                let mut dh_ids = vec![dh_id.clone()];
                dh_ids.extend_from_slice(peer_keyboards);
                self.stop_handles(dh_ids).await
            }
        }
    }

    fn begin(&self, flight: Flight) -> Result<InFlight<'_>, CooperateError> {
        let mut inner = self.inner.lock();
        match flight {
            Flight::Start => {
                if inner.starting {
                    return Err(CooperateError::AlreadyStarting);
                }
                inner.starting = true;
            }
            Flight::Stop => {
                if inner.stopping {
                    return Err(CooperateError::AlreadyStopping);
                }
                inner.stopping = true;
                inner.epoch += 1;
            }
        }
        Ok(InFlight {
            inner: &self.inner,
            flight,
        })
    }

    fn on_crossing_switch(&self, device: &NetworkId, value: bool) {
        let mut inner = self.inner.lock();
        if !inner.online.contains(device) {
            return;
        }
        inner.switches.insert(device.clone(), value);
        info!(peer = %device, crossing = value, "remote crossing switch changed");
    }

    fn serve_prepare(&self, from: &NetworkId) -> i32 {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            warn!(peer = %from, "prepare refused, cooperation disabled");
            return RESULT_FAILED;
        }
        inner.prepared_by = Some(from.clone());
        info!(peer = %from, "prepared by remote");
        RESULT_OK
    }

    fn serve_unprepare(&self, from: &NetworkId) -> i32 {
        {
            let mut inner = self.inner.lock();
            if inner.prepared_by.as_ref() == Some(from) {
                inner.prepared_by = None;
            }
            if inner.state == CooperationState::In && inner.peer.as_ref() == Some(from) {
                let from_state = inner.reset();
                info!(peer = %from, from = %from_state, "cooperation state -> Free");
            }
        }
        self.cache.clear_all();
        RESULT_OK
    }

    fn serve_start(&self, from: &NetworkId, dh_ids: &[DhId]) -> i32 {
        let Some(session) = self.transport.session_of(from) else {
            warn!(peer = %from, "start without session");
            return RESULT_FAILED;
        };
        {
            let mut inner = self.inner.lock();
            if !inner.enabled || inner.prepared_by.as_ref() != Some(from) {
                warn!(peer = %from, enabled = inner.enabled, "start refused, not prepared");
                return RESULT_FAILED;
            }
            match inner.state {
                CooperationState::Out => {
                    warn!(peer = %from, "start refused, input handed out");
                    return RESULT_FAILED;
                }
                CooperationState::In if inner.peer.as_ref() != Some(from) => {
                    warn!(peer = %from, "start refused, input coming from another node");
                    return RESULT_FAILED;
                }
                _ => {}
            }
            inner.state = CooperationState::In;
            inner.peer = Some(from.clone());
        }
        self.cache
            .record_dh_ids(dh_ids, DhIdState::ThroughIn, session);
        info!(peer = %from, handles = dh_ids.len(), "cooperation state -> In");
        self.notifier.on_start(CooperateMessage::InfoSuccess);
        RESULT_OK
    }

    fn serve_stop(&self, from: &NetworkId, dh_ids: &[DhId]) -> i32 {
        let from_state = {
            let mut inner = self.inner.lock();
            if inner.peer.as_ref() != Some(from) {
                if inner.state.is_active() {
                    warn!(peer = %from, "stop refused, not the peer");
                    return RESULT_FAILED;
                }
                debug!(peer = %from, "stop with nothing live");
                return RESULT_OK;
            }
            inner.reset()
        };
        self.cache.remove_dh_ids(dh_ids);
        info!(peer = %from, from = %from_state, "cooperation state -> Free");
        self.notifier.on_stop(CooperateMessage::StopSuccess);
        RESULT_OK
    }
}

#[async_trait]
impl ControlRequestHandler for CooperationStateMachine {
    async fn handle_request(&self, from: &NetworkId, message: &ControlMessage) -> i32 {
        debug!(peer = %from, method = %message.method(), "control request");
        match message {
            ControlMessage::Prepare { .. } => self.serve_prepare(from),
            ControlMessage::Unprepare { .. } => self.serve_unprepare(from),
            ControlMessage::Start { dh_ids, .. } => self.serve_start(from, dh_ids),
            ControlMessage::Stop { dh_ids, .. } => self.serve_stop(from, dh_ids),
        }
    }
}
