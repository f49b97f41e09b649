//! The virtual `db` device: a property cache backed by a [`KeyValueStore`].
//!
//! Rules use it to keep state across restarts. Writes are persisted before
//! they are visible to readers, and there is no network IO.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use thingrules_domain::device_config::STORE_DEVICE_NAME;
use thingrules_domain::property::{PropertyMap, PropertyValue, changed_entries};

use crate::change_bus::{ChangeBus, DEFAULT_CAPACITY};
use crate::error::EngineError;
use crate::ports::device::{Device, PropertyChange};
use crate::ports::store::KeyValueStore;

/// Called with the property name after every successful write.
pub type StoreListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Device named `db` persisting every property it holds.
pub struct StoreDevice<S> {
    store: S,
    cache: RwLock<PropertyMap>,
    bus: ChangeBus,
    listener: Mutex<Option<StoreListener>>,
}

impl<S: KeyValueStore> StoreDevice<S> {
    /// Load every stored entry into the cache.
    ///
    /// # Errors
    ///
    /// Returns the store error if the initial load fails.
    pub async fn open(store: S) -> Result<Self, EngineError> {
        let cache = store.load_all().await?;
        info!(properties = cache.len(), "store device opened");
        Ok(Self {
            store,
            cache: RwLock::new(cache),
            bus: ChangeBus::new(STORE_DEVICE_NAME, DEFAULT_CAPACITY),
            listener: Mutex::new(None),
        })
    }

    /// Install the single write listener, replacing any previous one.
    pub fn set_listener(&self, listener: StoreListener) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn cached(&self, name: &str) -> Option<PropertyValue> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl<S: KeyValueStore + 'static> Device for StoreDevice<S> {
    fn name(&self) -> &str {
        STORE_DEVICE_NAME
    }

    fn property_names(&self) -> Vec<String> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    async fn get_property(&self, name: &str, _force_load: bool) -> Option<PropertyValue> {
        self.cached(name)
    }

    async fn set_property(&self, name: &str, value: PropertyValue, reason: &str) {
        if let Err(error) = self.store.put(name, &value).await {
            warn!(property = name, %error, "failed to persist store property");
            return;
        }
        debug!(property = name, %value, reason, "store property written");

        let delta = {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            let delta = changed_entries(&cache, &PropertyMap::from([(name.to_string(), value.clone())]));
            cache.insert(name.to_string(), value);
            delta
        };

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener(name);
        }
        self.bus.publish(delta);
    }

    fn subscribe(&self) -> broadcast::Receiver<PropertyChange> {
        self.bus.subscribe()
    }

    async fn close(&self) {
        self.bus.close();
    }
}
