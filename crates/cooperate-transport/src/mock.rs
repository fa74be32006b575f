//! In-memory session service for testing.
//!
//! A [`MockSessionHub`] plays the network: every attached
//! [`ControlTransport`] gets a [`MockSessionService`] from the hub, and
//! bytes written on one end are delivered to the transport on the other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use cooperate_types::{NetworkId, SessionId, RESULT_FAILED, RESULT_OK};
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::session::SessionService;
use crate::transport::ControlTransport;

/// One end of a mock session.
#[derive(Debug, Clone)]
struct SessionEnd {
    owner: NetworkId,
    peer: NetworkId,
    peer_session: SessionId,
}

/// A write that was held back instead of delivered.
struct HeldFrame {
    to: NetworkId,
    session: SessionId,
    data: Vec<u8>,
}

#[derive(Default)]
struct HubState {
    nodes: HashMap<NetworkId, Weak<ControlTransport>>,
    sessions: HashMap<SessionId, SessionEnd>,
    next_session: i32,
    opens: usize,
    refuse_open: HashSet<NetworkId>,
    ignore_open: HashSet<NetworkId>,
    fail_send: HashSet<NetworkId>,
    hold: HashSet<NetworkId>,
    held: Vec<HeldFrame>,
    delivered: Vec<(NetworkId, NetworkId, Vec<u8>)>,
}

impl HubState {
    fn transport(&self, id: &NetworkId) -> Option<Arc<ControlTransport>> {
        self.nodes.get(id).and_then(Weak::upgrade)
    }
}

/// Shared in-memory network linking mock session services.
#[derive(Clone, Default)]
pub struct MockSessionHub {
    state: Arc<Mutex<HubState>>,
}

impl MockSessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session service for the node `local`.
    pub fn service_for(&self, local: NetworkId) -> Arc<MockSessionService> {
        Arc::new(MockSessionService {
            state: Arc::clone(&self.state),
            local,
        })
    }

    /// Make `transport` reachable under its local id.
    pub fn attach(&self, transport: &Arc<ControlTransport>) {
        self.state
            .lock()
            .nodes
            .insert(transport.local_id().clone(), Arc::downgrade(transport));
    }

    /// Opens toward `peer` complete with a failure code.
    pub fn set_refuse_open(&self, peer: &NetworkId, on: bool) {
        toggle(&mut self.state.lock().refuse_open, peer, on);
    }

    /// Opens toward `peer` never complete.
    pub fn set_ignore_open(&self, peer: &NetworkId, on: bool) {
        toggle(&mut self.state.lock().ignore_open, peer, on);
    }

    /// Writes toward `peer` fail.
    pub fn set_fail_send(&self, peer: &NetworkId, on: bool) {
        toggle(&mut self.state.lock().fail_send, peer, on);
    }

    /// Writes toward `peer` are queued until [`release_held`](Self::release_held).
    pub fn set_hold(&self, peer: &NetworkId, on: bool) {
        toggle(&mut self.state.lock().hold, peer, on);
    }

    /// Number of writes currently held back.
    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Wait until at least `n` writes are held. Returns `false` after two
    /// seconds without reaching `n`.
    pub async fn wait_held(&self, n: usize) -> bool {
        let wait = async {
            while self.held_count() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .is_ok()
    }

    /// Deliver every held write in order.
    pub async fn release_held(&self) {
        let held = std::mem::take(&mut self.state.lock().held);
        for frame in held {
            let target = self.state.lock().transport(&frame.to);
            if let Some(target) = target {
                target.on_bytes_received(frame.session, &frame.data);
            }
            tokio::task::yield_now().await;
        }
    }

    /// Number of sessions opened through the hub (outbound opens only).
    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    /// Every delivered write as `(from, to, bytes)`.
    pub fn delivered(&self) -> Vec<(NetworkId, NetworkId, Vec<u8>)> {
        self.state.lock().delivered.clone()
    }

    /// Drop every session between `a` and `b`, notifying both transports.
    pub fn disconnect(&self, a: &NetworkId, b: &NetworkId) {
        let closed: Vec<(SessionId, NetworkId)> = {
            let mut state = self.state.lock();
            let ids: Vec<SessionId> = state
                .sessions
                .iter()
                .filter(|(_, end)| {
                    (end.owner == *a && end.peer == *b) || (end.owner == *b && end.peer == *a)
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.sessions.remove(&id).map(|end| (id, end.owner)))
                .collect()
        };
        self.notify_closed(closed);
    }

    fn notify_closed(&self, closed: Vec<(SessionId, NetworkId)>) {
        for (session, owner) in closed {
            let target = self.state.lock().transport(&owner);
            if let Some(target) = target {
                target.on_session_closed(session);
            }
        }
    }
}

fn toggle(set: &mut HashSet<NetworkId>, id: &NetworkId, on: bool) {
    if on {
        set.insert(id.clone());
    } else {
        set.remove(id);
    }
}

/// Session service handed to one node by a [`MockSessionHub`].
pub struct MockSessionService {
    state: Arc<Mutex<HubState>>,
    local: NetworkId,
}

#[async_trait]
impl SessionService for MockSessionService {
    fn open_session(
        &self,
        _local_name: &str,
        _peer_name: &str,
        peer: &NetworkId,
    ) -> Result<SessionId, TransportError> {
        let mut state = self.state.lock();
        if !state.nodes.contains_key(peer) {
            return Err(TransportError::SessionOpenFailed(RESULT_FAILED));
        }
        state.opens += 1;
        state.next_session += 2;
        let ours = SessionId(state.next_session - 1);
        let theirs = SessionId(state.next_session);

        if state.ignore_open.contains(peer) {
            return Ok(ours);
        }
        let refused = state.refuse_open.contains(peer);
        if !refused {
            state.sessions.insert(
                ours,
                SessionEnd {
                    owner: self.local.clone(),
                    peer: peer.clone(),
                    peer_session: theirs,
                },
            );
            state.sessions.insert(
                theirs,
                SessionEnd {
                    owner: peer.clone(),
                    peer: self.local.clone(),
                    peer_session: ours,
                },
            );
        }

        let local = state.transport(&self.local);
        let remote = state.transport(peer);
        drop(state);

        // Completion is asynchronous, as with a real service.
        tokio::spawn(async move {
            if refused {
                if let Some(local) = local {
                    local.on_session_opened(ours, RESULT_FAILED);
                }
                return;
            }
            if let Some(remote) = remote {
                remote.on_session_opened(theirs, RESULT_OK);
            }
            if let Some(local) = local {
                local.on_session_opened(ours, RESULT_OK);
            }
        });
        Ok(ours)
    }

    fn close_session(&self, session: SessionId) {
        let peer_end = {
            let mut state = self.state.lock();
            let Some(end) = state.sessions.remove(&session) else {
                return;
            };
            state.sessions.remove(&end.peer_session);
            state.transport(&end.peer).map(|t| (t, end.peer_session))
        };
        if let Some((peer, peer_session)) = peer_end {
            peer.on_session_closed(peer_session);
        }
    }

    async fn send_bytes(&self, session: SessionId, buf: &[u8]) -> Result<(), TransportError> {
        let target = {
            let mut state = self.state.lock();
            let end = state
                .sessions
                .get(&session)
                .cloned()
                .ok_or_else(|| TransportError::Send(format!("unknown session {session}")))?;
            if state.fail_send.contains(&end.peer) {
                return Err(TransportError::Send(format!("write to {} failed", end.peer)));
            }
            if state.hold.contains(&end.peer) {
                state.held.push(HeldFrame {
                    to: end.peer,
                    session: end.peer_session,
                    data: buf.to_vec(),
                });
                return Ok(());
            }
            state
                .delivered
                .push((end.owner.clone(), end.peer.clone(), buf.to_vec()));
            state.transport(&end.peer).map(|t| (t, end.peer_session))
        };
        if let Some((peer, peer_session)) = target {
            peer.on_bytes_received(peer_session, buf);
        }
        Ok(())
    }

    fn peer_device_id(&self, session: SessionId) -> Option<NetworkId> {
        self.state.lock().sessions.get(&session).map(|end| end.peer.clone())
    }
}
