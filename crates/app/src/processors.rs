//! Trigger processors: turn trigger declarations into registered rules and
//! dispatch them when their trigger fires.
//!
//! Every processor owns a [`RuleSet`] deduplicated by fingerprint. A
//! declaration is offered to every processor; exactly one grammar matches,
//! so a rule belongs to exactly one processor.

pub mod cron;
pub mod loaded;
pub mod property_change;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{info, warn};

use thingrules_domain::rule::Fingerprint;

use crate::registry::DeviceRegistry;
use crate::rule::{Rule, RuleBinding};

pub use self::cron::CronProcessor;
pub use self::loaded::LoadedProcessor;
pub use self::property_change::PropertyChangeProcessor;

/// Common contract of the trigger processors.
#[async_trait]
pub trait TriggerProcessor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Register a rule if `declaration` belongs to this processor's grammar
    /// and is valid. Returns `true` when the rule is registered.
    async fn on_annotation(&self, declaration: &str, binding: &RuleBinding) -> bool;

    /// Register `rule` (ignored if its fingerprint is already present) and
    /// run the processor-specific hook. Returns `true` if it was new.
    async fn add_rule(&self, rule: Arc<Rule>) -> bool;

    /// Drop every rule of `module`. Returns how many were removed.
    fn remove_rules_for_module(&self, module: &str) -> usize;

    /// Registered rules, sorted by fingerprint.
    fn rules(&self) -> Vec<Arc<Rule>>;

    /// Called after every device-configuration reload attempt.
    async fn on_devices_reloaded(&self) {}

    fn start(&self) {}

    fn stop(&self) {}
}

/// Fingerprint-keyed rule set shared by the processors.
#[derive(Default)]
pub struct RuleSet {
    rules: Mutex<BTreeMap<Fingerprint, Arc<Rule>>>,
}

impl RuleSet {
    /// Insert `rule` unless a rule with the same fingerprint exists.
    pub fn insert(&self, rule: Arc<Rule>) -> bool {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        if rules.contains_key(rule.fingerprint()) {
            return false;
        }
        info!(
            module = rule.module(),
            function = rule.function_name(),
            trigger = rule.declaration(),
            "rule registered"
        );
        rules.insert(rule.fingerprint().clone(), rule);
        true
    }

    /// Remove and return every rule of `module`.
    pub fn remove_module(&self, module: &str) -> Vec<Arc<Rule>> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let (removed, kept): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut *rules)
            .into_iter()
            .partition(|(fingerprint, _)| fingerprint.module == module);
        *rules = kept;
        for rule in removed.values() {
            info!(
                module = rule.module(),
                function = rule.function_name(),
                trigger = rule.declaration(),
                "rule unregistered"
            );
        }
        removed.into_values().collect()
    }

    /// Current rules, sorted by fingerprint.
    pub fn snapshot(&self) -> Vec<Arc<Rule>> {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Rules whose [`Rule`] satisfies `predicate`, sorted by fingerprint.
    pub fn matching(&self, predicate: impl Fn(&Rule) -> bool) -> Vec<Arc<Rule>> {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|rule| predicate(rule))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run `rule`, containing any panic that escapes it.
pub async fn invoke_rule(rule: &Rule, registry: &DeviceRegistry, initiator: &str) {
    let run = AssertUnwindSafe(rule.invoke(registry, initiator)).catch_unwind();
    if run.await.is_err() {
        warn!(rule = %rule.fingerprint(), "rule dispatch panicked");
    }
}
