//! Crossing-switch client on top of a [`ProfileService`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use cooperate_types::NetworkId;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ProfileError;
use crate::{ProfileChangeListener, ProfileEvent, ProfileService};

/// Invoked with `(device, switch value)` when a device's profile changes.
pub type SwitchCallback = Arc<dyn Fn(&NetworkId, bool) + Send + Sync>;

/// Where the crossing switch lives in the profile store.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub service_id: String,
    pub characteristic: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            service_id: "input-cooperate".to_string(),
            characteristic: "crossingSwitchState".to_string(),
        }
    }
}

/// Publishes, reads and watches the per-node crossing switch.
pub struct ProfileSyncClient {
    config: ProfileConfig,
    service: Arc<dyn ProfileService>,
    me: Weak<ProfileSyncClient>,
    callbacks: Mutex<HashMap<NetworkId, SwitchCallback>>,
    /// Whether the shared profile-change subscription exists. Held across
    /// the subscribe call; change notifications never take it.
    subscribed: Mutex<bool>,
}

impl ProfileSyncClient {
    pub fn new(config: ProfileConfig, service: Arc<dyn ProfileService>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            service,
            me: me.clone(),
            callbacks: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(false),
        })
    }

    /// Write this node's crossing switch, then push it to `targets` in the
    /// background.
    ///
    /// The local write is the commit point. Sync failures are logged and
    /// never retried.
    pub fn set_crossing_switch(
        &self,
        enabled: bool,
        targets: &[NetworkId],
    ) -> Result<(), ProfileError> {
        let mut profile = Map::new();
        profile.insert(self.config.characteristic.clone(), Value::Bool(enabled));
        self.service
            .put_profile(&self.config.service_id, &Value::Object(profile).to_string())?;
        info!(enabled, targets = targets.len(), "crossing switch written");

        if targets.is_empty() {
            return Ok(());
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime, crossing switch not synced");
            return Ok(());
        };
        let service = Arc::clone(&self.service);
        let targets = targets.to_vec();
        runtime.spawn(async move {
            match service.sync_profile(&targets).await {
                Ok(()) => debug!(targets = targets.len(), "crossing switch synced"),
                Err(e) => warn!(error = %e, "crossing switch sync failed"),
            }
        });
        Ok(())
    }

    /// Read `device`'s crossing switch. Missing or malformed data reads as
    /// `false`.
    pub fn get_crossing_switch(&self, device: &NetworkId) -> bool {
        match self.read_switch(device) {
            Ok(value) => value,
            Err(e) => {
                warn!(device = %device, error = %e, "crossing switch unreadable");
                false
            }
        }
    }

    fn read_switch(&self, device: &NetworkId) -> Result<bool, ProfileError> {
        let raw = self.service.get_profile(device, &self.config.service_id)?;
        let value: Value =
            serde_json::from_str(&raw).map_err(|e| ProfileError::Malformed(e.to_string()))?;
        value
            .get(&self.config.characteristic)
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                ProfileError::Malformed(format!("missing {}", self.config.characteristic))
            })
    }

    /// Call `callback` whenever `device`'s profile changes.
    ///
    /// Registering the same callback again is a no-op; a different callback
    /// replaces the old one. The underlying subscription is created on the
    /// first registration and shared by every listener.
    pub fn register_listener(
        &self,
        device: &NetworkId,
        callback: SwitchCallback,
    ) -> Result<(), ProfileError> {
        if let Some(existing) = self.callbacks.lock().get(device) {
            if same_callback(existing, &callback) {
                debug!(device = %device, "listener already registered");
                return Ok(());
            }
        }
        self.ensure_subscribed()?;
        if self
            .callbacks
            .lock()
            .insert(device.clone(), callback)
            .is_some()
        {
            debug!(device = %device, "listener replaced");
        }
        Ok(())
    }

    /// Stop calling back for `device`. Idempotent.
    pub fn unregister_listener(&self, device: &NetworkId) {
        if self.callbacks.lock().remove(device).is_some() {
            debug!(device = %device, "listener removed");
        }
    }

    /// Whether a listener is registered for `device`.
    pub fn has_listener(&self, device: &NetworkId) -> bool {
        self.callbacks.lock().contains_key(device)
    }

    /// Profile-change notification: re-read the switch and hand it to the
    /// device's listener. Dropped when nobody listens.
    pub fn on_profile_changed(&self, device: &NetworkId) {
        let callback = self.callbacks.lock().get(device).cloned();
        let Some(callback) = callback else {
            debug!(device = %device, "profile change without listener");
            return;
        };
        let value = self.get_crossing_switch(device);
        callback(device, value);
    }

    fn ensure_subscribed(&self) -> Result<(), ProfileError> {
        let mut subscribed = self.subscribed.lock();
        if *subscribed {
            return Ok(());
        }
        let relay = Arc::new(ChangeRelay {
            client: self.me.clone(),
        });
        let failed = self.service.subscribe_profile_events(
            &self.config.service_id,
            &[ProfileEvent::ProfileChanged],
            relay,
        );
        if failed.contains(&ProfileEvent::ProfileChanged) {
            warn!(?failed, "profile subscription failed");
            return Err(ProfileError::Subscribe(failed));
        }
        *subscribed = true;
        info!(service = %self.config.service_id, "subscribed to profile changes");
        Ok(())
    }
}

fn same_callback(a: &SwitchCallback, b: &SwitchCallback) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Routes service notifications back to the client without keeping it alive.
struct ChangeRelay {
    client: Weak<ProfileSyncClient>,
}

impl ProfileChangeListener for ChangeRelay {
    fn on_profile_changed(&self, device: &NetworkId) {
        if let Some(client) = self.client.upgrade() {
            client.on_profile_changed(device);
        }
    }
}
