//! # thingrules-adapter-webthing
//!
//! Web Thing adapter: devices reachable over the Web Thing REST API.
//!
//! ## Responsibilities
//! - Implement the `Device` port for a remote thing (`RemoteDevice`):
//!   property cache with freshness, writes, periodic full refresh
//! - Keep a WebSocket push channel open per device and fold
//!   `propertyStatus` messages into the cache (`event_channel`)
//! - Implement the `DeviceFactory` port by probing a declared URL for one
//!   or several thing descriptions (`WebthingFactory`)
//!
//! ## Dependency rule
//! Depends on `thingrules-app` (for port traits) and `thingrules-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod event_channel;

pub mod error;
pub mod factory;
pub mod remote_device;

pub use factory::WebthingFactory;
pub use remote_device::RemoteDevice;
