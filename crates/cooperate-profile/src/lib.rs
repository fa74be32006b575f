//! Crossing-switch profile synchronisation for input-cooperate.
//!
//! Defines the [`ProfileService`] trait for the external distributed
//! profile store, and [`ProfileSyncClient`], which publishes this node's
//! crossing switch, reads any node's switch, and fans profile-change
//! notifications out to per-device listeners.

use std::sync::Arc;

use async_trait::async_trait;
use cooperate_types::NetworkId;

pub mod client;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::{ProfileConfig, ProfileSyncClient, SwitchCallback};
pub use error::ProfileError;

/// Kinds of profile events a subscriber can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileEvent {
    /// A node's profile changed.
    ProfileChanged,
}

/// Receives profile-change notifications from the profile service.
pub trait ProfileChangeListener: Send + Sync + 'static {
    fn on_profile_changed(&self, device: &NetworkId);
}

/// External distributed key-value/pub-sub profile service.
#[async_trait]
pub trait ProfileService: Send + Sync + 'static {
    /// Write this node's profile for `service_id`.
    fn put_profile(&self, service_id: &str, json: &str) -> Result<(), ProfileError>;

    /// Read the profile `device` published for `service_id`.
    fn get_profile(&self, device: &NetworkId, service_id: &str) -> Result<String, ProfileError>;

    /// Subscribe to `events` for `service_id`. Returns the events that
    /// could not be subscribed (empty on full success).
    fn subscribe_profile_events(
        &self,
        service_id: &str,
        events: &[ProfileEvent],
        listener: Arc<dyn ProfileChangeListener>,
    ) -> Vec<ProfileEvent>;

    /// Push this node's profile to `devices`.
    async fn sync_profile(&self, devices: &[NetworkId]) -> Result<(), ProfileError>;
}
