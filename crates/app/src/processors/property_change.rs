//! `property <device>#<property> changed`: runs rules when a device
//! property changes.
//!
//! One subscription task per device, shared by every rule on that device.
//! Each changed property of a delta fans out to all rules registered for
//! that `(device, property)` pair.
//!
//! A declaration naming a device that is not available is kept aside and
//! offered again after every device-configuration reload.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use thingrules_domain::trigger::{Trigger, TriggerKind};

use super::{RuleSet, TriggerProcessor, invoke_rule};
use crate::ports::device::{DeviceHandle, PropertyChange};
use crate::registry::DeviceRegistry;
use crate::rule::{Rule, RuleBinding};

struct PropertyState {
    registry: Arc<DeviceRegistry>,
    rules: RuleSet,
}

impl PropertyState {
    async fn dispatch(&self, change: &PropertyChange) {
        for property in change.properties.keys() {
            let rules = self
                .rules
                .matching(|rule| targets(rule, &change.device, property));
            for rule in rules {
                invoke_rule(&rule, &self.registry, property).await;
            }
        }
    }
}

fn targets(rule: &Rule, device_name: &str, property_name: &str) -> bool {
    matches!(
        rule.trigger(),
        Trigger::PropertyChanged { device, property }
            if device == device_name && property == property_name
    )
}

struct Subscription {
    device: DeviceHandle,
    task: JoinHandle<()>,
}

impl Subscription {
    fn follows(&self, device: &DeviceHandle) -> bool {
        !self.task.is_finished()
            && Arc::as_ptr(&self.device).cast::<()>() == Arc::as_ptr(device).cast::<()>()
    }
}

struct PendingDeclaration {
    device: String,
    declaration: String,
    binding: RuleBinding,
}

impl PendingDeclaration {
    fn is(&self, declaration: &str, binding: &RuleBinding) -> bool {
        self.declaration == declaration
            && self.binding.module == binding.module
            && self.binding.function.name() == binding.function.name()
    }
}

pub struct PropertyChangeProcessor {
    state: Arc<PropertyState>,
    subscriptions: Mutex<BTreeMap<String, Subscription>>,
    pending: Mutex<Vec<PendingDeclaration>>,
}

impl PropertyChangeProcessor {
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            state: Arc::new(PropertyState {
                registry,
                rules: RuleSet::default(),
            }),
            subscriptions: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Declarations waiting for their device, as `(device, declaration)`.
    #[must_use]
    pub fn pending_declarations(&self) -> Vec<(String, String)> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|pending| (pending.device.clone(), pending.declaration.clone()))
            .collect()
    }

    fn defer(&self, device: &str, declaration: &str, binding: &RuleBinding) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.iter().any(|entry| entry.is(declaration, binding)) {
            return;
        }
        pending.push(PendingDeclaration {
            device: device.to_string(),
            declaration: declaration.to_string(),
            binding: binding.clone(),
        });
    }

    /// Take every pending declaration whose device is in `available`.
    fn take_ready(&self, available: &BTreeMap<String, DeviceHandle>) -> Vec<PendingDeclaration> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
            .into_iter()
            .partition(|entry| available.contains_key(&entry.device));
        *pending = waiting;
        ready
    }

    fn targeted_devices(&self) -> BTreeSet<String> {
        self.state
            .rules
            .snapshot()
            .iter()
            .filter_map(|rule| match rule.trigger() {
                Trigger::PropertyChanged { device, .. } => Some(device.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of the devices currently subscribed to.
    #[must_use]
    pub fn subscribed_devices(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, subscription)| !subscription.task.is_finished())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Subscribe to `device` unless a live subscription to that very
    /// device instance already exists.
    fn ensure_subscription(&self, device: DeviceHandle) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let name = device.name().to_string();
        if subscriptions
            .get(&name)
            .is_some_and(|subscription| subscription.follows(&device))
        {
            return;
        }

        let mut changes = device.subscribe();
        let state = Arc::clone(&self.state);
        let device_name = name.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => state.dispatch(&change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(device = %device_name, skipped, "property changes dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(device = %device_name, "property change subscription ended");
        });

        if let Some(previous) = subscriptions.insert(name.clone(), Subscription { device, task }) {
            previous.task.abort();
        }
        info!(device = %name, "subscribed to property changes");
    }

    fn drop_unused_subscriptions(&self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let rules = self.state.rules.snapshot();
        subscriptions.retain(|name, subscription| {
            let used = rules.iter().any(|rule| {
                matches!(rule.trigger(), Trigger::PropertyChanged { device, .. } if device == name)
            });
            if !used {
                subscription.task.abort();
                info!(device = %name, "unsubscribed from property changes");
            }
            used
        });
    }
}

#[async_trait]
impl TriggerProcessor for PropertyChangeProcessor {
    fn name(&self) -> &'static str {
        "property change"
    }

    async fn on_annotation(&self, declaration: &str, binding: &RuleBinding) -> bool {
        if TriggerKind::of(declaration) != Some(TriggerKind::PropertyChanged) {
            return false;
        }
        let trigger = match Trigger::parse(declaration) {
            Ok(trigger) => trigger,
            Err(error) => {
                warn!(module = %binding.module, trigger = declaration, %error, "property declaration rejected");
                return false;
            }
        };
        if let Trigger::PropertyChanged { device, .. } = &trigger
            && self.state.registry.device(device).await.is_none()
        {
            warn!(
                module = %binding.module,
                function = binding.function.name(),
                device = %device,
                "device of property declaration is not available"
            );
            self.defer(device, declaration, binding);
            return false;
        }
        self.add_rule(Arc::new(Rule::new(binding, declaration, trigger)))
            .await;
        true
    }

    async fn add_rule(&self, rule: Arc<Rule>) -> bool {
        let Trigger::PropertyChanged { device, .. } = rule.trigger() else {
            return false;
        };
        let Some(handle) = self.state.registry.device(device).await else {
            return false;
        };
        let added = self.state.rules.insert(Arc::clone(&rule));
        self.ensure_subscription(handle);
        added
    }

    fn remove_rules_for_module(&self, module: &str) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| entry.binding.module != module);
        let removed = self.state.rules.remove_module(module).len();
        if removed > 0 {
            self.drop_unused_subscriptions();
        }
        removed
    }

    fn rules(&self) -> Vec<Arc<Rule>> {
        self.state.rules.snapshot()
    }

    /// Register declarations whose device appeared and follow replaced
    /// device instances.
    async fn on_devices_reloaded(&self) {
        let available: BTreeMap<String, DeviceHandle> = self
            .state
            .registry
            .devices()
            .into_iter()
            .map(|device| (device.name().to_string(), device))
            .collect();

        for entry in self.take_ready(&available) {
            debug!(
                module = %entry.binding.module,
                device = %entry.device,
                trigger = %entry.declaration,
                "retrying property declaration"
            );
            self.on_annotation(&entry.declaration, &entry.binding).await;
        }

        for name in self.targeted_devices() {
            if let Some(device) = available.get(&name) {
                self.ensure_subscription(Arc::clone(device));
            }
        }
    }

    fn stop(&self) {
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for subscription in subscriptions.into_values() {
            subscription.task.abort();
        }
        info!("property change processor stopped");
    }
}
