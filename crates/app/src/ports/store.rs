//! Store port: durable key-value persistence behind the `db` device.

use std::future::Future;

use thingrules_domain::property::{PropertyMap, PropertyValue};

use crate::error::EngineError;

/// Durable map from property name to value, surviving restarts.
pub trait KeyValueStore: Send + Sync {
    /// Load every stored entry.
    fn load_all(&self) -> impl Future<Output = Result<PropertyMap, EngineError>> + Send;

    /// Insert or overwrite one entry.
    fn put(
        &self,
        name: &str,
        value: &PropertyValue,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}
