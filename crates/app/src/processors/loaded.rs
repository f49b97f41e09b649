//! `rule loaded`: runs a rule once, when it is registered.

use std::sync::Arc;

use async_trait::async_trait;

use thingrules_domain::trigger::{Trigger, TriggerKind};

use super::{RuleSet, TriggerProcessor, invoke_rule};
use crate::registry::DeviceRegistry;
use crate::rule::{Rule, RuleBinding};

pub struct LoadedProcessor {
    registry: Arc<DeviceRegistry>,
    rules: RuleSet,
}

impl LoadedProcessor {
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            rules: RuleSet::default(),
        }
    }
}

#[async_trait]
impl TriggerProcessor for LoadedProcessor {
    fn name(&self) -> &'static str {
        "rule loaded"
    }

    async fn on_annotation(&self, declaration: &str, binding: &RuleBinding) -> bool {
        if TriggerKind::of(declaration) != Some(TriggerKind::Loaded) {
            return false;
        }
        self.add_rule(Arc::new(Rule::new(binding, declaration, Trigger::Loaded)))
            .await;
        true
    }

    async fn add_rule(&self, rule: Arc<Rule>) -> bool {
        if !self.rules.insert(Arc::clone(&rule)) {
            return false;
        }
        invoke_rule(&rule, &self.registry, &Trigger::Loaded.to_string()).await;
        true
    }

    fn remove_rules_for_module(&self, module: &str) -> usize {
        self.rules.remove_module(module).len()
    }

    fn rules(&self) -> Vec<Arc<Rule>> {
        self.rules.snapshot()
    }
}
