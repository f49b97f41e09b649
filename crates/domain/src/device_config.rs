//! Device declarations: what the device configuration file describes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the always-present virtual store device.
pub const STORE_DEVICE_NAME: &str = "db";

/// One entry of the device configuration: where the thing lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDeclaration {
    pub url: String,
}

/// Device name to declaration, as read from the configuration source.
pub type DeviceDeclarations = BTreeMap<String, DeviceDeclaration>;

/// How a configuration reload treats a device whose name is already live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Never touch a live device, even if its URL changed.
    #[default]
    AddOnly,
    /// Replace a live device whose URL changed.
    Upsert,
}
