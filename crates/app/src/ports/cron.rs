//! Cron port: schedule validation and matching.

use thingrules_domain::time::LocalTimestamp;

/// Evaluates cron expressions at minute granularity.
pub trait CronEvaluator: Send + Sync {
    /// Whether `expression` can be evaluated at all.
    fn is_valid(&self, expression: &str) -> bool;

    /// Whether `expression` fires within the minute containing `at`.
    /// Invalid expressions never match.
    fn matches(&self, expression: &str, at: LocalTimestamp) -> bool;
}
