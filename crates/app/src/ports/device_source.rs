//! Device source ports: where device declarations come from and how they
//! become live devices.

use async_trait::async_trait;

use thingrules_domain::device_config::DeviceDeclarations;

use crate::error::EngineError;
use crate::ports::device::DeviceHandle;

/// Reads the device configuration (e.g. a `webthings.yml` file).
#[async_trait]
pub trait DeviceConfigSource: Send + Sync {
    /// File name whose changes should trigger a reload.
    fn file_name(&self) -> &str;

    /// Read the current declarations.
    async fn read(&self) -> Result<DeviceDeclarations, EngineError>;
}

/// Builds devices from a declaration.
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// Construct the device(s) found at `url`. A single URL may expose
    /// several things. Construction failures are logged and yield an empty
    /// vector; returned devices are not started yet.
    async fn create(&self, name: &str, url: &str) -> Vec<DeviceHandle>;
}
