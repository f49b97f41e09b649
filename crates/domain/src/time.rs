//! Time and timestamp helpers.

use chrono::{DateTime, Local, Utc};

/// UTC timestamp used for rule bookkeeping (`last_executed`, `last_failed`).
pub type Timestamp = DateTime<Utc>;

/// Wall-clock time in the host's zone; cron schedules are evaluated against it.
pub type LocalTimestamp = DateTime<Local>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Return the current local wall-clock time.
#[must_use]
pub fn local_now() -> LocalTimestamp {
    Local::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_agree_between_local_and_utc_clocks() {
        let utc = now();
        let local = local_now();
        let drift = (local.with_timezone(&Utc) - utc).num_seconds().abs();
        assert!(drift < 5);
    }
}
