//! # thingrules-adapter-fs
//!
//! Filesystem adapter: everything the engine reads from disk.
//!
//! ## Responsibilities
//! - Watch a directory with [notify](https://docs.rs/notify) and translate
//!   its events into `FileEvent`s on a tokio channel
//! - Implement `DeviceConfigSource` over a `webthings.yml` file
//!   (`name: {url: ...}` per device)
//! - Implement `RuleModuleSource` over a directory of `*.toml` rule modules
//!
//! ## Dependency rule
//! Depends on `thingrules-app` (for port traits) and `thingrules-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod device_config;
pub mod error;
pub mod rule_modules;
pub mod watcher;

pub use device_config::{DEVICE_CONFIG_FILE, YamlDeviceConfigSource};
pub use rule_modules::{RULE_MODULE_SUFFIX, TomlRuleModuleSource};
pub use watcher::DirectoryWatcher;
