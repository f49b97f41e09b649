//! `time cron <expr>`: runs rules on a cron schedule.
//!
//! A timer ticks every [`TICK`]; the rule set is evaluated at most once per
//! [`EVALUATION_GATE`], at minute granularity.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use thingrules_domain::time::{self, LocalTimestamp};
use thingrules_domain::trigger::{Trigger, TriggerKind};

use super::{RuleSet, TriggerProcessor, invoke_rule};
use crate::ports::cron::CronEvaluator;
use crate::registry::DeviceRegistry;
use crate::rule::{Rule, RuleBinding};

/// Timer period.
pub const TICK: Duration = Duration::from_secs(5);

/// Minimum time between two evaluation passes.
pub const EVALUATION_GATE: Duration = Duration::from_secs(60);

struct CronState {
    registry: Arc<DeviceRegistry>,
    cron: Arc<dyn CronEvaluator>,
    rules: RuleSet,
    last_evaluation: Mutex<Option<Instant>>,
}

impl CronState {
    fn claim_evaluation(&self) -> bool {
        let mut last = self
            .last_evaluation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < EVALUATION_GATE => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    async fn evaluate(&self, at: LocalTimestamp) -> usize {
        let due: Vec<Arc<Rule>> = self.rules.matching(|rule| match rule.trigger() {
            Trigger::Cron { expression } => self.cron.matches(expression, at),
            _ => false,
        });
        for rule in &due {
            let Trigger::Cron { expression } = rule.trigger() else {
                continue;
            };
            invoke_rule(rule, &self.registry, expression).await;
        }
        due.len()
    }
}

pub struct CronProcessor {
    state: Arc<CronState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CronProcessor {
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>, cron: Arc<dyn CronEvaluator>) -> Self {
        Self {
            state: Arc::new(CronState {
                registry,
                cron,
                rules: RuleSet::default(),
                last_evaluation: Mutex::new(None),
            }),
            timer: Mutex::new(None),
        }
    }

    /// One timer tick: evaluate the rule set if the gate allows it.
    ///
    /// Returns the number of rules dispatched, or `None` when the gate is
    /// still closed.
    pub async fn tick(&self) -> Option<usize> {
        tick(&self.state).await
    }
}

async fn tick(state: &CronState) -> Option<usize> {
    if !state.claim_evaluation() {
        return None;
    }
    let dispatched = state.evaluate(time::local_now()).await;
    debug!(dispatched, "cron rules evaluated");
    Some(dispatched)
}

#[async_trait]
impl TriggerProcessor for CronProcessor {
    fn name(&self) -> &'static str {
        "cron"
    }

    async fn on_annotation(&self, declaration: &str, binding: &RuleBinding) -> bool {
        if TriggerKind::of(declaration) != Some(TriggerKind::Cron) {
            return false;
        }
        let trigger = match Trigger::parse(declaration) {
            Ok(trigger) => trigger,
            Err(error) => {
                warn!(module = %binding.module, trigger = declaration, %error, "cron declaration rejected");
                return false;
            }
        };
        if let Trigger::Cron { expression } = &trigger
            && !self.state.cron.is_valid(expression)
        {
            warn!(
                module = %binding.module,
                function = binding.function.name(),
                cron = %expression,
                "cron expression is invalid (syntax error?)"
            );
            return false;
        }
        self.add_rule(Arc::new(Rule::new(binding, declaration, trigger)))
            .await;
        true
    }

    async fn add_rule(&self, rule: Arc<Rule>) -> bool {
        self.state.rules.insert(rule)
    }

    fn remove_rules_for_module(&self, module: &str) -> usize {
        self.state.rules.remove_module(module).len()
    }

    fn rules(&self) -> Vec<Arc<Rule>> {
        self.state.rules.snapshot()
    }

    fn start(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return;
        }
        let state = Arc::clone(&self.state);
        *timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                interval.tick().await;
                tick(&state).await;
            }
        }));
        info!("cron processor started");
    }

    fn stop(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
            info!("cron processor stopped");
        }
    }
}
