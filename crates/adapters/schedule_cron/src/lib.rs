//! # thingrules-adapter-cron
//!
//! Cron schedule evaluation using the [cron](https://docs.rs/cron) crate.
//!
//! ## Responsibilities
//! - Implement the `CronEvaluator` port defined in `thingrules-app::ports::cron`
//! - Accept classic five-field expressions (`min hour dom month dow`) as well
//!   as six/seven-field ones with seconds and years, including `?`
//! - Decide whether a schedule fires within a given wall-clock minute
//!
//! ## Dependency rule
//! Depends on `thingrules-app` (for port traits) and `thingrules-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod error;
pub mod schedules;

pub use schedules::CronSchedules;
