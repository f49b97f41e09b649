//! Rule identity and execution bookkeeping.
//!
//! A rule is identified by its [`Fingerprint`], not by the function object
//! it calls: re-registering an unchanged rule module after a hot reload
//! yields rules that compare equal to the previous ones.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Identity key of a rule: `(module, function, trigger)`.
///
/// Field order defines the sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub module: String,
    pub function: String,
    pub trigger: String,
}

impl Fingerprint {
    #[must_use]
    pub fn new(
        module: impl Into<String>,
        function: impl Into<String>,
        trigger: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            trigger: trigger.into(),
        }
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.module, self.function, self.trigger)
    }
}

/// When a rule last ran successfully and when it last failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatus {
    pub last_executed: Option<Timestamp>,
    pub last_failed: Option<Timestamp>,
}

impl RuleStatus {
    pub fn record_success(&mut self, at: Timestamp) {
        self.last_executed = Some(at);
    }

    pub fn record_failure(&mut self, at: Timestamp) {
        self.last_failed = Some(at);
    }
}
