//! Device port: a named thing with a property cache, writes and change
//! notifications.
//!
//! Implemented by the Web Thing adapter (remote devices) and by
//! [`StoreDevice`](crate::store_device::StoreDevice) (the virtual `db`).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use thingrules_domain::property::{PropertyMap, PropertyValue};

/// Delta published by a device: only the properties that changed.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub device: String,
    pub properties: PropertyMap,
}

/// Shared handle to a device living in the registry.
pub type DeviceHandle = Arc<dyn Device>;

/// A device registered in the [`DeviceRegistry`](crate::registry::DeviceRegistry).
///
/// Failures never escape these methods: transport problems are logged by
/// the implementation and surface as `None` or as a skipped notification.
#[async_trait]
pub trait Device: Send + Sync {
    /// Unique name within the registry.
    fn name(&self) -> &str;

    /// Names of the properties currently held in the cache.
    fn property_names(&self) -> Vec<String>;

    /// Read a property, reloading it when the cache is stale or when
    /// `force_load` is set. `None` means the value is unknown.
    async fn get_property(&self, name: &str, force_load: bool) -> Option<PropertyValue>;

    /// Read a property, falling back to `default` when it is unknown.
    async fn get_property_or(&self, name: &str, default: PropertyValue) -> PropertyValue {
        self.get_property(name, false).await.unwrap_or(default)
    }

    /// Write a property. `reason` is recorded in the logs.
    async fn set_property(&self, name: &str, value: PropertyValue, reason: &str);

    /// Subscribe to change deltas published after this call.
    fn subscribe(&self) -> broadcast::Receiver<PropertyChange>;

    /// Start background activity (polling, push channel).
    async fn start(&self) {}

    /// Stop background activity and end every subscription.
    async fn close(&self);
}
