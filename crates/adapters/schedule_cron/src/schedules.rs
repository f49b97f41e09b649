//! Parsed-schedule cache implementing [`CronEvaluator`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use chrono::{Duration, Timelike};
use cron::Schedule;
use tracing::debug;

use thingrules_app::ports::CronEvaluator;
use thingrules_domain::time::LocalTimestamp;

use crate::error::CronError;

/// Evaluates cron expressions, caching every schedule it has parsed.
#[derive(Default)]
pub struct CronSchedules {
    schedules: Mutex<HashMap<String, Schedule>>,
}

impl CronSchedules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `expression` into a schedule.
    ///
    /// Five-field expressions get a leading `0` seconds field. `?` is read
    /// as `*`.
    ///
    /// # Errors
    ///
    /// Returns [`CronError`] when the field count is wrong or the cron
    /// crate rejects the expression.
    pub fn parse(expression: &str) -> Result<Schedule, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            6 | 7 => fields.join(" "),
            count => return Err(CronError::FieldCount(count)),
        };
        Ok(Schedule::from_str(&normalized.replace('?', "*"))?)
    }

    fn schedule(&self, expression: &str) -> Option<Schedule> {
        let mut schedules = self
            .schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(schedule) = schedules.get(expression) {
            return Some(schedule.clone());
        }
        match Self::parse(expression) {
            Ok(schedule) => {
                schedules.insert(expression.to_string(), schedule.clone());
                Some(schedule)
            }
            Err(error) => {
                debug!(expression, %error, "cron expression rejected");
                None
            }
        }
    }
}

impl CronEvaluator for CronSchedules {
    fn is_valid(&self, expression: &str) -> bool {
        self.schedule(expression).is_some()
    }

    fn matches(&self, expression: &str, at: LocalTimestamp) -> bool {
        let Some(schedule) = self.schedule(expression) else {
            return false;
        };
        let Some(minute) = at.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        schedule
            .after(&(minute - Duration::seconds(1)))
            .next()
            .is_some_and(|next| next < minute + Duration::minutes(1))
    }
}
