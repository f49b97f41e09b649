//! # thingrules-domain
//!
//! Pure domain model for the thingrules automation engine.
//!
//! ## Responsibilities
//! - Foundational types: error conventions, timestamps
//! - Define **property values** (the scalar state exposed by a Web Thing)
//!   and the delta logic used to decide what actually changed
//! - Define the **trigger grammar** (`rule loaded`, `time cron …`,
//!   `property <device>#<property> changed`)
//! - Define **rule identity** (the fingerprint that survives a hot reload)
//!   and execution bookkeeping
//! - Define **device declarations** read from the device configuration
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod time;

pub mod device_config;
pub mod property;
pub mod rule;
pub mod trigger;
