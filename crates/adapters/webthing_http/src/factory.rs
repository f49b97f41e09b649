//! Builds [`RemoteDevice`]s from a declared URL.
//!
//! A gateway answers its root URL with an array of thing descriptions;
//! a single thing answers with one description object.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use thingrules_app::ports::{DeviceFactory, DeviceHandle};

use crate::error::WebthingError;
use crate::remote_device::{RemoteDevice, build_client};

/// [`DeviceFactory`] for Web Things.
pub struct WebthingFactory {
    client: reqwest::Client,
}

impl Default for WebthingFactory {
    fn default() -> Self {
        Self {
            client: build_client(),
        }
    }
}

impl WebthingFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe `url` and build the device(s) it describes.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is invalid or the probe request fails.
    pub async fn discover(&self, name: &str, url: &str) -> Result<Vec<RemoteDevice>, WebthingError> {
        let base = Url::parse(url)?;
        let description: serde_json::Value = self
            .client
            .get(base.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let serde_json::Value::Array(things) = description else {
            return Ok(vec![RemoteDevice::new(name, url)]);
        };
        Ok(things
            .iter()
            .filter_map(|thing| {
                let Some(title) = thing.get("title").and_then(serde_json::Value::as_str) else {
                    tracing::warn!(%url, "thing description without title, skipping");
                    return None;
                };
                Some(RemoteDevice::new(title, &thing_location(&base, thing)))
            })
            .collect())
    }
}

/// `base` of the description, else its `href` resolved against the
/// gateway URL, else the gateway URL itself.
fn thing_location(gateway: &Url, thing: &serde_json::Value) -> String {
    if let Some(base) = thing.get("base").and_then(serde_json::Value::as_str) {
        return base.to_string();
    }
    thing
        .get("href")
        .and_then(serde_json::Value::as_str)
        .and_then(|href| gateway.join(href).ok())
        .map_or_else(|| gateway.to_string(), |location| location.to_string())
}

#[async_trait]
impl DeviceFactory for WebthingFactory {
    async fn create(&self, name: &str, url: &str) -> Vec<DeviceHandle> {
        match self.discover(name, url).await {
            Ok(devices) => devices
                .into_iter()
                .map(|device| Arc::new(device) as DeviceHandle)
                .collect(),
            Err(err) => {
                tracing::warn!(%err, device = name, %url, "unable to create device");
                Vec::new()
            }
        }
    }
}
