//! Rule: one trigger declaration bound to one rule function.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};

use futures_util::FutureExt;
use tracing::{debug, warn};

use thingrules_domain::rule::{Fingerprint, RuleStatus};
use thingrules_domain::time;
use thingrules_domain::trigger::Trigger;

use crate::function::RuleFunction;
use crate::invoker::Invoker;
use crate::registry::DeviceRegistry;

/// What a rule module offers a processor: its identity and the function
/// a declaration is attached to.
#[derive(Debug, Clone)]
pub struct RuleBinding {
    pub module: String,
    pub function: RuleFunction,
}

impl RuleBinding {
    #[must_use]
    pub fn new(module: impl Into<String>, function: RuleFunction) -> Self {
        Self {
            module: module.into(),
            function,
        }
    }
}

/// A registered rule.
///
/// Equality, ordering and hashing only consider the [`Fingerprint`], so a
/// rule rebuilt from an unchanged module is the same rule.
#[derive(Debug)]
pub struct Rule {
    fingerprint: Fingerprint,
    trigger: Trigger,
    function: RuleFunction,
    status: Mutex<RuleStatus>,
}

impl Rule {
    /// Build a rule from the raw `declaration` and its parsed `trigger`.
    #[must_use]
    pub fn new(binding: &RuleBinding, declaration: &str, trigger: Trigger) -> Self {
        Self {
            fingerprint: Fingerprint::new(
                binding.module.as_str(),
                binding.function.name(),
                declaration.trim(),
            ),
            trigger,
            function: binding.function.clone(),
            status: Mutex::new(RuleStatus::default()),
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.fingerprint.module
    }

    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.fingerprint.function
    }

    /// The declaration text as written in the rule module.
    #[must_use]
    pub fn declaration(&self) -> &str {
        &self.fingerprint.trigger
    }

    #[must_use]
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    #[must_use]
    pub fn status(&self) -> RuleStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind parameters and run the function.
    ///
    /// Success stamps `last_executed`; a binding error, a function error or
    /// a panic stamps `last_failed`. Nothing propagates to the caller.
    pub async fn invoke(&self, registry: &DeviceRegistry, initiator: &str) {
        debug!(rule = %self.fingerprint, initiator, "executing rule");
        let invoker = Invoker::new(registry);
        let call = invoker.invoke(&self.function, initiator);
        let outcome = AssertUnwindSafe(call).catch_unwind().await;

        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(Ok(())) => status.record_success(time::now()),
            Ok(Err(error)) => {
                warn!(
                    module = self.module(),
                    function = self.function_name(),
                    trigger = self.declaration(),
                    error = %error,
                    source = ?std::error::Error::source(&error),
                    "rule execution failed"
                );
                status.record_failure(time::now());
            }
            Err(_) => {
                warn!(
                    module = self.module(),
                    function = self.function_name(),
                    trigger = self.declaration(),
                    "rule function panicked"
                );
                status.record_failure(time::now());
            }
        }
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for Rule {}

impl PartialOrd for Rule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fingerprint.cmp(&other.fingerprint)
    }
}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}
