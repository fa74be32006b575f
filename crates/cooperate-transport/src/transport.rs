//! Control transport: one session per remote node, request/response
//! correlation by `(node, method)`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use cooperate_types::{
    ControlFrame, ControlMessage, DhId, Method, NetworkId, SessionId, RESULT_FAILED, RESULT_OK,
};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::session::{ControlRequestHandler, SessionService};
use crate::wire;

/// Default bound on [`ControlTransport::open`].
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Static transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Network id of this node, written into every frame.
    pub local_id: NetworkId,
    /// Session name used on both ends.
    pub session_name: String,
    /// How long [`ControlTransport::open`] waits for the open completion.
    pub open_timeout: Duration,
}

impl TransportConfig {
    pub fn new(local_id: NetworkId) -> Self {
        Self {
            local_id,
            session_name: "input-cooperate.control".to_string(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

type Reply = Result<i32, TransportError>;

/// A request waiting for its response.
struct PendingSlot {
    token: u64,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct Inner {
    /// The one session used to reach each node.
    sessions: HashMap<NetworkId, SessionId>,
    /// Every live session and the node behind it.
    devices: HashMap<SessionId, NetworkId>,
    /// Outbound opens awaiting their completion.
    opening: HashMap<SessionId, (NetworkId, oneshot::Sender<i32>)>,
    /// Completions that arrived while `open` had started a session but not
    /// yet registered its waiter. `None` outside that window.
    unclaimed: Option<HashMap<SessionId, i32>>,
    pending: HashMap<(NetworkId, Method), PendingSlot>,
    next_token: u64,
}

impl Inner {
    fn register(&mut self, device: NetworkId, session: SessionId) {
        self.devices.insert(session, device.clone());
        self.sessions.entry(device).or_insert(session);
    }

    /// Forget `session`. Returns the pending slots that lost their route.
    fn unregister(&mut self, session: SessionId) -> Vec<(Method, PendingSlot)> {
        let Some(device) = self.devices.remove(&session) else {
            return Vec::new();
        };
        if self.sessions.get(&device) != Some(&session) {
            return Vec::new();
        }
        self.sessions.remove(&device);

        // A second session to the same node (both ends opened at once) takes over.
        if let Some(other) = self
            .devices
            .iter()
            .find_map(|(s, d)| (*d == device).then_some(*s))
        {
            self.sessions.insert(device, other);
            return Vec::new();
        }

        let keys: Vec<(NetworkId, Method)> = self
            .pending
            .keys()
            .filter(|(d, _)| *d == device)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|slot| (key.1, slot)))
            .collect()
    }
}

/// Control-plane transport toward remote nodes.
pub struct ControlTransport {
    config: TransportConfig,
    service: Arc<dyn SessionService>,
    handler: RwLock<Option<Weak<dyn ControlRequestHandler>>>,
    inner: Mutex<Inner>,
    /// Serialises `open` so a node never gets two outbound sessions.
    open_lock: tokio::sync::Mutex<()>,
    runtime: Handle,
}

impl ControlTransport {
    /// Create a transport. Must be called from within a tokio runtime; the
    /// runtime is used to serve inbound requests.
    pub fn new(
        config: TransportConfig,
        service: Arc<dyn SessionService>,
    ) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        Ok(Self {
            config,
            service,
            handler: RwLock::new(None),
            inner: Mutex::new(Inner::default()),
            open_lock: tokio::sync::Mutex::new(()),
            runtime,
        })
    }

    /// Network id of this node.
    pub fn local_id(&self) -> &NetworkId {
        &self.config.local_id
    }

    /// Install the handler for requests sent by remote nodes.
    ///
    /// Held weakly: the handler usually owns the transport.
    pub fn set_request_handler(&self, handler: Weak<dyn ControlRequestHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Whether a session to `remote` is open.
    pub fn is_connected(&self, remote: &NetworkId) -> bool {
        self.inner.lock().sessions.contains_key(remote)
    }

    /// The session used to reach `remote`, if open.
    pub fn session_of(&self, remote: &NetworkId) -> Option<SessionId> {
        self.inner.lock().sessions.get(remote).copied()
    }

    /// Open a session to `remote` and wait for it to come up.
    ///
    /// A second open for a node that already has a session succeeds
    /// without touching the session service.
    pub async fn open(&self, remote: &NetworkId) -> Result<(), TransportError> {
        let _guard = self.open_lock.lock().await;
        if self.is_connected(remote) {
            debug!(peer = %remote, "session already open");
            return Ok(());
        }

        let name = &self.config.session_name;
        self.inner.lock().unclaimed = Some(HashMap::new());
        let session = match self.service.open_session(name, name, remote) {
            Ok(session) => session,
            Err(e) => {
                self.inner.lock().unclaimed = None;
                return Err(e);
            }
        };
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            // Completion overtook us.
            match inner.unclaimed.take().and_then(|mut early| early.remove(&session)) {
                Some(RESULT_OK) => {
                    inner.register(remote.clone(), session);
                    info!(peer = %remote, session = %session, "session open");
                    return Ok(());
                }
                Some(code) => {
                    warn!(peer = %remote, code, "session open failed");
                    return Err(TransportError::SessionOpenFailed(code));
                }
                None if inner.devices.contains_key(&session) => return Ok(()),
                None => {}
            }
            inner.opening.insert(session, (remote.clone(), tx));
        }
        debug!(peer = %remote, session = %session, "opening session");

        match tokio::time::timeout(self.config.open_timeout, rx).await {
            Ok(Ok(RESULT_OK)) => {
                info!(peer = %remote, session = %session, "session open");
                Ok(())
            }
            Ok(Ok(code)) => {
                warn!(peer = %remote, code, "session open failed");
                Err(TransportError::SessionOpenFailed(code))
            }
            Ok(Err(_)) => {
                warn!(peer = %remote, "session closed while opening");
                Err(TransportError::SessionOpenFailed(RESULT_FAILED))
            }
            Err(_) => {
                self.inner.lock().opening.remove(&session);
                self.service.close_session(session);
                warn!(peer = %remote, timeout = ?self.config.open_timeout, "session open timed out");
                Err(TransportError::SessionOpenTimeout(remote.clone()))
            }
        }
    }

    /// Close the session to `remote`, if any. Pending requests to it fail.
    pub fn close(&self, remote: &NetworkId) {
        let (session, orphaned) = {
            let mut inner = self.inner.lock();
            let Some(session) = inner.sessions.get(remote).copied() else {
                return;
            };
            (session, inner.unregister(session))
        };
        self.service.close_session(session);
        fail_slots(orphaned);
        info!(peer = %remote, session = %session, "session closed");
    }

    /// Ask `remote` to prepare the input path from `src` to `sink`.
    pub async fn prepare(
        &self,
        remote: &NetworkId,
        src: &NetworkId,
        sink: &NetworkId,
    ) -> Result<(), TransportError> {
        let message = ControlMessage::Prepare {
            src_network_id: src.clone(),
            sink_network_id: sink.clone(),
        };
        self.request(remote, message).await
    }

    /// Ask `remote` to tear down the input path from `src` to `sink`.
    pub async fn unprepare(
        &self,
        remote: &NetworkId,
        src: &NetworkId,
        sink: &NetworkId,
    ) -> Result<(), TransportError> {
        let message = ControlMessage::Unprepare {
            src_network_id: src.clone(),
            sink_network_id: sink.clone(),
        };
        self.request(remote, message).await
    }

    /// Ask `remote` to take over `dh_ids`.
    pub async fn start(
        &self,
        remote: &NetworkId,
        src: &NetworkId,
        sink: &NetworkId,
        dh_ids: &[DhId],
    ) -> Result<(), TransportError> {
        let message = ControlMessage::Start {
            src_network_id: src.clone(),
            sink_network_id: sink.clone(),
            dh_ids: dh_ids.to_vec(),
        };
        self.request(remote, message).await
    }

    /// Ask `remote` to give `dh_ids` back.
    pub async fn stop(
        &self,
        remote: &NetworkId,
        src: &NetworkId,
        sink: &NetworkId,
        dh_ids: &[DhId],
    ) -> Result<(), TransportError> {
        let message = ControlMessage::Stop {
            src_network_id: src.clone(),
            sink_network_id: sink.clone(),
            dh_ids: dh_ids.to_vec(),
        };
        self.request(remote, message).await
    }

    async fn request(
        &self,
        remote: &NetworkId,
        message: ControlMessage,
    ) -> Result<(), TransportError> {
        let method = message.method();
        let frame = ControlFrame::request(self.config.local_id.clone(), message);
        let buf = wire::encode_frame(&frame)?;

        let (session, token, rx) = {
            let mut inner = self.inner.lock();
            let session = *inner
                .sessions
                .get(remote)
                .ok_or_else(|| TransportError::NotConnected(remote.clone()))?;
            inner.next_token += 1;
            let token = inner.next_token;
            let (tx, rx) = oneshot::channel();
            let replaced = inner
                .pending
                .insert((remote.clone(), method), PendingSlot { token, tx });
            if replaced.is_some() {
                warn!(peer = %remote, %method, "replacing in-flight request");
            }
            (session, token, rx)
        };

        if let Err(e) = self.service.send_bytes(session, &buf).await {
            let mut inner = self.inner.lock();
            let key = (remote.clone(), method);
            if inner.pending.get(&key).is_some_and(|slot| slot.token == token) {
                inner.pending.remove(&key);
            }
            warn!(peer = %remote, %method, error = %e, "failed to send request");
            return Err(e);
        }
        trace!(peer = %remote, %method, session = %session, "request sent");

        match rx.await {
            Ok(Ok(RESULT_OK)) => Ok(()),
            Ok(Ok(code)) => Err(TransportError::Rejected { method, code }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Superseded(method)),
        }
    }

    /// Open completion from the session service.
    ///
    /// Completions for sessions this node did not open are inbound sessions
    /// from peers and are registered on success.
    pub fn on_session_opened(&self, session: SessionId, result: i32) {
        let waiter = {
            let mut inner = self.inner.lock();
            let waiter = inner.opening.remove(&session);
            match &waiter {
                Some((device, _)) if result == RESULT_OK => {
                    inner.register(device.clone(), session);
                }
                Some(_) => {}
                None => {
                    if let Some(early) = inner.unclaimed.as_mut() {
                        early.insert(session, result);
                        if result != RESULT_OK {
                            debug!(session = %session, result, "open failed before its waiter");
                            return;
                        }
                    }
                }
            }
            waiter
        };
        if let Some((_, tx)) = waiter {
            let _ = tx.send(result);
            return;
        }

        if result != RESULT_OK {
            debug!(session = %session, result, "inbound session failed to open");
            return;
        }
        let Some(device) = self.service.peer_device_id(session) else {
            warn!(session = %session, "inbound session without peer id");
            return;
        };
        info!(peer = %device, session = %session, "accepted inbound session");
        self.inner.lock().register(device, session);
    }

    /// Session torn down by the service or the peer.
    pub fn on_session_closed(&self, session: SessionId) {
        let orphaned = {
            let mut inner = self.inner.lock();
            // Dropping the open waiter fails the pending `open`.
            inner.opening.remove(&session);
            inner.unregister(session)
        };
        debug!(session = %session, failed = orphaned.len(), "session closed by peer");
        fail_slots(orphaned);
    }

    /// Inbound bytes from the session service.
    pub fn on_bytes_received(&self, session: SessionId, data: &[u8]) {
        let frame = match wire::decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session = %session, error = %e, "dropping undecodable frame");
                return;
            }
        };
        let Some(device) = self.inner.lock().devices.get(&session).cloned() else {
            warn!(session = %session, "frame on unknown session");
            return;
        };

        let method = frame.method();
        if let Some(result) = frame.result {
            let slot = self.inner.lock().pending.remove(&(device.clone(), method));
            match slot {
                Some(slot) => {
                    trace!(peer = %device, %method, result, "response matched");
                    let _ = slot.tx.send(Ok(result));
                }
                None => debug!(peer = %device, %method, "response without pending request"),
            }
            return;
        }

        self.dispatch_request(session, device, frame);
    }

    fn dispatch_request(&self, session: SessionId, device: NetworkId, frame: ControlFrame) {
        let handler = self.handler.read().as_ref().and_then(Weak::upgrade);
        let service = Arc::clone(&self.service);
        let local_id = self.config.local_id.clone();
        debug!(peer = %device, method = %frame.method(), "serving request");

        self.runtime.spawn(async move {
            let result = match handler {
                Some(handler) => handler.handle_request(&device, &frame.message).await,
                None => {
                    warn!(peer = %device, "no request handler installed");
                    RESULT_FAILED
                }
            };
            let response = frame.respond(local_id, result);
            let sent = match wire::encode_frame(&response) {
                Ok(buf) => service.send_bytes(session, &buf).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!(peer = %device, error = %e, "failed to send response");
            }
        });
    }
}

fn fail_slots(slots: Vec<(Method, PendingSlot)>) {
    for (method, slot) in slots {
        let _ = slot.tx.send(Err(TransportError::SessionClosed(method)));
    }
}
