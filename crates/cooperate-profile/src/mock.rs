//! In-memory profile service for testing.
//!
//! One [`MockProfileStore`] stands in for the distributed store: every node
//! sees every other node's published profile, and a sync toward a node
//! fires that node's profile-change subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cooperate_types::NetworkId;
use parking_lot::Mutex;

use crate::error::ProfileError;
use crate::{ProfileChangeListener, ProfileEvent, ProfileService};

#[derive(Default)]
struct StoreState {
    profiles: HashMap<(NetworkId, String), String>,
    listeners: HashMap<NetworkId, Vec<Arc<dyn ProfileChangeListener>>>,
    syncs: Vec<(NetworkId, Vec<NetworkId>)>,
    fail_sync: bool,
    fail_subscribe: bool,
}

/// Shared in-memory profile store.
#[derive(Clone, Default)]
pub struct MockProfileStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile service for the node `local`.
    pub fn service_for(&self, local: NetworkId) -> Arc<MockProfileService> {
        Arc::new(MockProfileService {
            state: Arc::clone(&self.state),
            local,
        })
    }

    /// Store raw profile text for `device`, bypassing the client.
    pub fn put_raw(&self, device: &NetworkId, service_id: &str, json: &str) {
        self.state
            .lock()
            .profiles
            .insert((device.clone(), service_id.to_string()), json.to_string());
    }

    pub fn set_fail_sync(&self, on: bool) {
        self.state.lock().fail_sync = on;
    }

    pub fn set_fail_subscribe(&self, on: bool) {
        self.state.lock().fail_subscribe = on;
    }

    /// Every sync request as `(from, targets)`.
    pub fn sync_calls(&self) -> Vec<(NetworkId, Vec<NetworkId>)> {
        self.state.lock().syncs.clone()
    }

    /// Number of live subscriptions held by `device`.
    pub fn subscription_count(&self, device: &NetworkId) -> usize {
        self.state.lock().listeners.get(device).map_or(0, Vec::len)
    }
}

/// Profile service handed to one node by a [`MockProfileStore`].
pub struct MockProfileService {
    state: Arc<Mutex<StoreState>>,
    local: NetworkId,
}

#[async_trait]
impl ProfileService for MockProfileService {
    fn put_profile(&self, service_id: &str, json: &str) -> Result<(), ProfileError> {
        self.state
            .lock()
            .profiles
            .insert((self.local.clone(), service_id.to_string()), json.to_string());
        Ok(())
    }

    fn get_profile(&self, device: &NetworkId, service_id: &str) -> Result<String, ProfileError> {
        self.state
            .lock()
            .profiles
            .get(&(device.clone(), service_id.to_string()))
            .cloned()
            .ok_or_else(|| ProfileError::Service(format!("no profile for {device}")))
    }

    fn subscribe_profile_events(
        &self,
        _service_id: &str,
        events: &[ProfileEvent],
        listener: Arc<dyn ProfileChangeListener>,
    ) -> Vec<ProfileEvent> {
        let mut state = self.state.lock();
        if state.fail_subscribe {
            return events.to_vec();
        }
        state
            .listeners
            .entry(self.local.clone())
            .or_default()
            .push(listener);
        Vec::new()
    }

    async fn sync_profile(&self, devices: &[NetworkId]) -> Result<(), ProfileError> {
        let targets = {
            let mut state = self.state.lock();
            state.syncs.push((self.local.clone(), devices.to_vec()));
            if state.fail_sync {
                return Err(ProfileError::SyncFailed("injected failure".to_string()));
            }
            devices
                .iter()
                .flat_map(|d| state.listeners.get(d).cloned().unwrap_or_default())
                .collect::<Vec<_>>()
        };
        for listener in targets {
            listener.on_profile_changed(&self.local);
        }
        Ok(())
    }
}
