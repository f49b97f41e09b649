//! Cron parsing errors.

/// A cron expression could not be turned into a schedule.
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    /// Fewer than five or more than seven fields.
    #[error("expected 5 to 7 fields, found {0}")]
    FieldCount(usize),

    /// The cron crate rejected the expression.
    #[error("invalid cron expression")]
    Parse(#[from] cron::error::Error),
}
