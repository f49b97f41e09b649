//! # thingrules-app
//!
//! Application layer: the event/dispatch core and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `Device`: a readable, settable, observable thing
//!   - `KeyValueStore`: persistence behind the virtual `db` device
//!   - `CronEvaluator`: schedule validation and matching
//!   - `DeviceConfigSource` / `DeviceFactory`: where devices come from
//!   - `RuleModuleSource`: where rule modules come from
//! - Own the **device registry** (lookup, configuration reload, throttle)
//! - Own the **trigger processors** (`rule loaded`, cron, property change)
//!   and the **rule loader** that keeps them in sync with rule modules
//! - Bind rule-function parameters to live devices at call time (`Invoker`)
//!
//! ## Dependency rule
//! Depends on `thingrules-domain` only (plus `tokio` for tasks and channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod change_bus;
pub mod engine;
pub mod error;
pub mod function;
pub mod invoker;
pub mod ports;
pub mod processors;
pub mod registry;
pub mod rule;
pub mod rule_loader;
pub mod store_device;

#[cfg(test)]
pub(crate) mod testing;
