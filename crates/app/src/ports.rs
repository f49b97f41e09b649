//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the engine core and the outside world.
//! They are defined here (in `app`) so that both the core and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod cron;
pub mod device;
pub mod device_source;
pub mod file_events;
pub mod rule_source;
pub mod store;

pub use cron::CronEvaluator;
pub use device::{Device, DeviceHandle, PropertyChange};
pub use device_source::{DeviceConfigSource, DeviceFactory};
pub use file_events::FileEvent;
pub use rule_source::{Annotations, RuleModuleSource};
pub use store::KeyValueStore;
