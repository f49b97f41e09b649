//! Device registry: the directory of live devices.
//!
//! The registry always holds the virtual `db` device plus every device built
//! from the current device configuration. It reloads that configuration when
//! the configuration file changes, and lazily when a lookup misses (at most
//! once per [`RELOAD_THROTTLE`]).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use thingrules_domain::device_config::{
    DeviceDeclaration, DeviceDeclarations, ReloadPolicy, STORE_DEVICE_NAME,
};

use crate::ports::device::DeviceHandle;
use crate::ports::device_source::{DeviceConfigSource, DeviceFactory};
use crate::ports::file_events::FileEvent;

/// Minimum time between two reloads caused by lookup misses.
pub const RELOAD_THROTTLE: Duration = Duration::from_secs(30);

/// Called after every configuration reload attempt.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Which declaration produced a live device.
#[derive(Debug, Clone)]
struct Origin {
    declaration: String,
    url: String,
}

/// Lookup table of live devices with file-driven reload.
pub struct DeviceRegistry {
    source: Arc<dyn DeviceConfigSource>,
    factory: Arc<dyn DeviceFactory>,
    policy: ReloadPolicy,
    devices: RwLock<BTreeMap<String, DeviceHandle>>,
    origins: Mutex<BTreeMap<String, Origin>>,
    last_reload: Mutex<Option<Instant>>,
    reload_lock: tokio::sync::Mutex<()>,
    listeners: Mutex<Vec<ChangeListener>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceRegistry {
    /// Create a registry holding only `store` (the `db` device).
    pub fn new(
        store: DeviceHandle,
        source: Arc<dyn DeviceConfigSource>,
        factory: Arc<dyn DeviceFactory>,
        policy: ReloadPolicy,
    ) -> Self {
        let devices = BTreeMap::from([(store.name().to_string(), store)]);
        Self {
            source,
            factory,
            policy,
            devices: RwLock::new(devices),
            origins: Mutex::new(BTreeMap::new()),
            last_reload: Mutex::new(None),
            reload_lock: tokio::sync::Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            watch_task: Mutex::new(None),
        }
    }

    /// Register a listener called after every reload attempt.
    pub fn add_listener(&self, listener: ChangeListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Look up a device by name.
    ///
    /// On a miss the available names are logged and, if the last reload
    /// attempt is older than [`RELOAD_THROTTLE`] (or none happened yet), the
    /// configuration is reloaded and the lookup retried once.
    pub async fn device(&self, name: &str) -> Option<DeviceHandle> {
        if let Some(device) = self.lookup(name) {
            return Some(device);
        }
        warn!(device = name, available = ?self.names(), "device not available");
        if !self.try_claim_reload() {
            return None;
        }
        info!(device = name, "reloading device configuration after lookup miss");
        self.reload_unthrottled().await;
        self.lookup(name)
    }

    /// Snapshot of every live device, ordered by name.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.read_devices().values().cloned().collect()
    }

    /// Names of every live device.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read_devices().keys().cloned().collect()
    }

    /// Re-read the device configuration and reconcile live devices with it.
    ///
    /// A failed read keeps the current devices. Listeners are notified in
    /// every case.
    pub async fn reload_configuration(&self) {
        self.mark_reload();
        self.reload_unthrottled().await;
    }

    /// Reload whenever `events` reports a change to the configuration file.
    pub fn watch(self: &Arc<Self>, mut events: mpsc::Receiver<FileEvent>) {
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.touches(registry.source.file_name()) {
                    debug!(?event, "device configuration file changed");
                    registry.reload_configuration().await;
                }
            }
            debug!("device configuration watch ended");
        });
        let previous = self
            .watch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop watching and close every device, `db` included.
    pub async fn close(&self) {
        let watch = self
            .watch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watch) = watch {
            watch.abort();
        }
        let devices = std::mem::take(&mut *self.write_devices());
        self.origins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for device in devices.into_values() {
            device.close().await;
        }
        info!("device registry closed");
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, device: DeviceHandle) {
        self.write_devices()
            .insert(device.name().to_string(), device);
    }

    fn lookup(&self, name: &str) -> Option<DeviceHandle> {
        self.read_devices().get(name).cloned()
    }

    fn read_devices(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, DeviceHandle>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_devices(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, DeviceHandle>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_reload(&self) {
        *self
            .last_reload
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Check the throttle and, if it has expired, record a new attempt.
    fn try_claim_reload(&self) -> bool {
        let mut last = self
            .last_reload
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) <= RELOAD_THROTTLE => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    async fn reload_unthrottled(&self) {
        let _guard = self.reload_lock.lock().await;
        match self.source.read().await {
            Ok(declarations) => self.reconcile(&declarations).await,
            Err(error) => {
                warn!(
                    file = self.source.file_name(),
                    %error,
                    "failed to read device configuration, keeping current devices"
                );
            }
        }
        self.notify_listeners();
    }

    async fn reconcile(&self, declarations: &DeviceDeclarations) {
        for (declared, declaration) in declarations {
            if declared == STORE_DEVICE_NAME {
                warn!(device = declared, "declaration shadows the store device, skipped");
                continue;
            }
            self.apply(declared, declaration).await;
        }

        let gone: Vec<String> = self
            .origins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, origin)| !declarations.contains_key(&origin.declaration))
            .map(|(name, _)| name.clone())
            .collect();
        for name in gone {
            info!(device = %name, "device no longer declared");
            self.remove(&name).await;
        }
        info!(devices = ?self.names(), "device configuration applied");
    }

    async fn apply(&self, declared: &str, declaration: &DeviceDeclaration) {
        let url = declaration.url.trim_end_matches('/');
        let existing = self.devices_declared_by(declared);
        if !existing.is_empty() {
            match self.policy {
                ReloadPolicy::AddOnly => return,
                ReloadPolicy::Upsert if existing.values().all(|origin| origin.url == url) => {
                    return;
                }
                ReloadPolicy::Upsert => {}
            }
        }

        let created = self.factory.create(declared, url).await;
        if created.is_empty() {
            warn!(device = declared, url, "no device created for declaration");
            return;
        }

        let created_names: BTreeSet<String> =
            created.iter().map(|device| device.name().to_string()).collect();
        for name in existing.keys() {
            if !created_names.contains(name) {
                self.remove(name).await;
            }
        }

        for device in created {
            let name = device.name().to_string();
            if self.is_owned_by_other(&name, declared) {
                warn!(device = %name, declaration = declared, "name already taken, skipped");
                device.close().await;
                continue;
            }
            device.start().await;
            let replaced = self.write_devices().insert(name.clone(), device);
            self.origins
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(
                    name.clone(),
                    Origin {
                        declaration: declared.to_string(),
                        url: url.to_string(),
                    },
                );
            if let Some(previous) = replaced {
                info!(device = %name, url, "device replaced");
                previous.close().await;
            } else {
                info!(device = %name, url, "device added");
            }
        }
    }

    fn devices_declared_by(&self, declared: &str) -> BTreeMap<String, Origin> {
        self.origins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, origin)| origin.declaration == declared)
            .map(|(name, origin)| (name.clone(), origin.clone()))
            .collect()
    }

    fn is_owned_by_other(&self, name: &str, declared: &str) -> bool {
        if name == STORE_DEVICE_NAME {
            return true;
        }
        let origins = self.origins.lock().unwrap_or_else(PoisonError::into_inner);
        match origins.get(name) {
            Some(origin) => origin.declaration != declared,
            None => self.read_devices().contains_key(name),
        }
    }

    async fn remove(&self, name: &str) {
        self.origins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        let removed = self.write_devices().remove(name);
        if let Some(device) = removed {
            device.close().await;
            info!(device = name, "device removed");
        }
    }

    fn notify_listeners(&self) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener();
        }
    }
}
