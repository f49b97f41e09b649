//! In-memory fakes for the ports, shared by the unit tests of this crate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use thingrules_domain::device_config::{DeviceDeclaration, DeviceDeclarations, ReloadPolicy};
use thingrules_domain::property::{PropertyMap, PropertyValue, changed_entries};
use thingrules_domain::time::LocalTimestamp;

use crate::change_bus::ChangeBus;
use crate::error::EngineError;
use crate::ports::{
    Annotations, CronEvaluator, Device, DeviceConfigSource, DeviceFactory, DeviceHandle,
    KeyValueStore, PropertyChange, RuleModuleSource,
};
use crate::registry::DeviceRegistry;

// ── Device ─────────────────────────────────────────────────────────

pub(crate) struct FakeDevice {
    name: String,
    properties: Mutex<PropertyMap>,
    bus: ChangeBus,
    started: AtomicBool,
    closed: AtomicBool,
    last_reason: Mutex<Option<String>>,
}

impl FakeDevice {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::with(name, [])
    }

    pub(crate) fn with<const N: usize>(
        name: &str,
        properties: [(&str, PropertyValue); N],
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            properties: Mutex::new(
                properties
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            bus: ChangeBus::new(name, 64),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_reason: Mutex::new(None),
        })
    }

    pub(crate) fn value(&self, name: &str) -> Option<PropertyValue> {
        self.properties.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn last_reason(&self) -> Option<String> {
        self.last_reason.lock().unwrap().clone()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate a change reported by the device itself.
    pub(crate) fn push<const N: usize>(&self, properties: [(&str, PropertyValue); N]) {
        let incoming: PropertyMap = properties
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let delta = {
            let mut current = self.properties.lock().unwrap();
            let delta = changed_entries(&current, &incoming);
            current.extend(incoming);
            delta
        };
        self.bus.publish(delta);
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.lock().unwrap().keys().cloned().collect()
    }

    async fn get_property(&self, name: &str, _force_load: bool) -> Option<PropertyValue> {
        self.value(name)
    }

    async fn set_property(&self, name: &str, value: PropertyValue, reason: &str) {
        *self.last_reason.lock().unwrap() = Some(reason.to_string());
        self.push([(name, value)]);
    }

    fn subscribe(&self) -> broadcast::Receiver<PropertyChange> {
        self.bus.subscribe()
    }

    async fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.bus.close();
    }
}

pub(crate) fn memory_store_device() -> DeviceHandle {
    FakeDevice::new("db")
}

/// Registry holding `devices` plus a fake `db`, over an empty configuration.
pub(crate) fn registry_with(devices: Vec<Arc<FakeDevice>>) -> DeviceRegistry {
    let registry = DeviceRegistry::new(
        memory_store_device(),
        Arc::new(FakeConfigSource::default()),
        Arc::new(FakeFactory::default()),
        ReloadPolicy::AddOnly,
    );
    for device in devices {
        registry.insert(device);
    }
    registry
}

// ── Device configuration ───────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeConfigSource {
    declarations: Mutex<DeviceDeclarations>,
    failing: AtomicBool,
    reads: AtomicUsize,
}

impl FakeConfigSource {
    pub(crate) fn with<const N: usize>(entries: [(&str, &str); N]) -> Self {
        let source = Self::default();
        source.set(entries);
        source
    }

    pub(crate) fn set<const N: usize>(&self, entries: [(&str, &str); N]) {
        *self.declarations.lock().unwrap() = entries
            .into_iter()
            .map(|(name, url)| {
                (
                    name.to_string(),
                    DeviceDeclaration {
                        url: url.to_string(),
                    },
                )
            })
            .collect();
        self.failing.store(false, Ordering::SeqCst);
    }

    pub(crate) fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConfigSource for FakeConfigSource {
    fn file_name(&self) -> &str {
        "webthings.yml"
    }

    async fn read(&self) -> Result<DeviceDeclarations, EngineError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::DeviceConfig("unreadable".into()));
        }
        Ok(self.declarations.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeFactory {
    things: Mutex<BTreeMap<String, Vec<String>>>,
    created: Mutex<Vec<Arc<FakeDevice>>>,
    urls: Mutex<Vec<String>>,
}

impl FakeFactory {
    /// Make `url` expose several things instead of one named after the
    /// declaration.
    pub(crate) fn expose(&self, url: &str, names: &[&str]) {
        self.things.lock().unwrap().insert(
            url.to_string(),
            names.iter().map(ToString::to_string).collect(),
        );
    }

    /// Last device created under `name`.
    pub(crate) fn created(&self, name: &str) -> Option<Arc<FakeDevice>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|device| device.name == name)
            .cloned()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceFactory for FakeFactory {
    async fn create(&self, name: &str, url: &str) -> Vec<DeviceHandle> {
        self.urls.lock().unwrap().push(url.to_string());
        let names = self
            .things
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| vec![name.to_string()]);
        let devices: Vec<Arc<FakeDevice>> = names.iter().map(|n| FakeDevice::new(n)).collect();
        self.created.lock().unwrap().extend(devices.iter().cloned());
        devices
            .into_iter()
            .map(|device| device as DeviceHandle)
            .collect()
    }
}

// ── Store ──────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub(crate) struct InMemoryStore {
    entries: Arc<Mutex<PropertyMap>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub(crate) fn with<const N: usize>(entries: [(&str, PropertyValue); N]) -> Self {
        let store = Self::default();
        store
            .entries
            .lock()
            .unwrap()
            .extend(entries.into_iter().map(|(k, v)| (k.to_string(), v)));
        store
    }

    pub(crate) fn entry(&self, name: &str) -> Option<PropertyValue> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl KeyValueStore for InMemoryStore {
    async fn load_all(&self) -> Result<PropertyMap, EngineError> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn put(&self, name: &str, value: &PropertyValue) -> Result<(), EngineError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Storage("disk full".into()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(name.to_string(), value.clone());
        Ok(())
    }
}

// ── Cron ───────────────────────────────────────────────────────────

/// Accepts any expression with at least five fields; matches only the
/// expressions switched on with [`FakeCron::fire`].
#[derive(Default)]
pub(crate) struct FakeCron {
    firing: Mutex<BTreeSet<String>>,
    evaluations: AtomicUsize,
}

impl FakeCron {
    pub(crate) fn fire(&self, expression: &str) {
        self.firing.lock().unwrap().insert(expression.to_string());
    }

    pub(crate) fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl CronEvaluator for FakeCron {
    fn is_valid(&self, expression: &str) -> bool {
        expression.split_whitespace().count() >= 5
    }

    fn matches(&self, expression: &str, _at: LocalTimestamp) -> bool {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.firing.lock().unwrap().contains(expression)
    }
}

// ── Rule modules ───────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct InMemoryRuleSource {
    modules: Mutex<BTreeMap<String, Annotations>>,
    broken: Mutex<BTreeSet<String>>,
}

impl InMemoryRuleSource {
    pub(crate) fn put(&self, module: &str, entries: &[(&str, &[&str])]) {
        let annotations = entries
            .iter()
            .map(|(function, declarations)| {
                (
                    (*function).to_string(),
                    declarations.iter().map(ToString::to_string).collect(),
                )
            })
            .collect();
        self.modules
            .lock()
            .unwrap()
            .insert(module.to_string(), annotations);
        self.broken.lock().unwrap().remove(module);
    }

    pub(crate) fn delete(&self, module: &str) {
        self.modules.lock().unwrap().remove(module);
    }

    /// Make `module` present but unparsable.
    pub(crate) fn corrupt(&self, module: &str) {
        self.put(module, &[]);
        self.broken.lock().unwrap().insert(module.to_string());
    }
}

impl RuleModuleSource for InMemoryRuleSource {
    fn module_id(&self, file_name: &str) -> Option<String> {
        file_name.strip_suffix(".toml").map(ToString::to_string)
    }

    async fn list_files(&self) -> Result<Vec<String>, EngineError> {
        Ok(self
            .modules
            .lock()
            .unwrap()
            .keys()
            .map(|module| format!("{module}.toml"))
            .collect())
    }

    async fn parse_annotations(&self, module: &str) -> Result<Annotations, EngineError> {
        if self.broken.lock().unwrap().contains(module) {
            return Err(EngineError::RuleModule("invalid toml".into()));
        }
        self.modules
            .lock()
            .unwrap()
            .get(module)
            .cloned()
            .ok_or_else(|| EngineError::RuleModule(format!("{module} not found").into()))
    }
}
