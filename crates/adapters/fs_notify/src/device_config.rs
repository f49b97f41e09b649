//! `webthings.yml`: the device configuration file.
//!
//! ```yaml
//! lamp:
//!   url: http://10.0.0.5:8080
//! energy:
//!   url: http://10.0.0.9:9000/
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use thingrules_app::error::EngineError;
use thingrules_app::ports::DeviceConfigSource;
use thingrules_domain::device_config::DeviceDeclarations;

use crate::error::ConfigSourceError;

/// File name of the device configuration.
pub const DEVICE_CONFIG_FILE: &str = "webthings.yml";

/// Reads device declarations from `<dir>/webthings.yml`.
pub struct YamlDeviceConfigSource {
    path: PathBuf,
}

impl YamlDeviceConfigSource {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(DEVICE_CONFIG_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse declarations from YAML text. An empty document declares no
    /// devices.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigSourceError::Yaml`] on malformed content.
    pub fn parse(content: &str) -> Result<DeviceDeclarations, ConfigSourceError> {
        if content.trim().is_empty() {
            return Ok(DeviceDeclarations::new());
        }
        let declarations: Option<DeviceDeclarations> = serde_yaml::from_str(content)?;
        Ok(declarations.unwrap_or_default())
    }
}

#[async_trait]
impl DeviceConfigSource for YamlDeviceConfigSource {
    fn file_name(&self) -> &str {
        DEVICE_CONFIG_FILE
    }

    async fn read(&self) -> Result<DeviceDeclarations, EngineError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(ConfigSourceError::from)?;
        let declarations = Self::parse(&content)?;
        debug!(path = %self.path.display(), devices = declarations.len(), "device configuration read");
        Ok(declarations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_declarations_keyed_by_device_name() {
        let declarations = YamlDeviceConfigSource::parse(
            "lamp:\n  url: http://10.0.0.5:8080\nenergy:\n  url: http://10.0.0.9:9000/\n",
        )
        .unwrap();

        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations["lamp"].url, "http://10.0.0.5:8080");
        assert_eq!(declarations["energy"].url, "http://10.0.0.9:9000/");
    }

    #[test]
    fn should_treat_empty_document_as_no_devices() {
        assert!(YamlDeviceConfigSource::parse("").unwrap().is_empty());
        assert!(YamlDeviceConfigSource::parse("~\n").unwrap().is_empty());
    }

    #[test]
    fn should_reject_entry_without_url() {
        let err = YamlDeviceConfigSource::parse("lamp:\n  host: 10.0.0.5\n").unwrap_err();
        assert!(matches!(err, ConfigSourceError::Yaml(_)));
    }

    #[tokio::test]
    async fn should_read_file_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEVICE_CONFIG_FILE),
            "lamp:\n  url: http://10.0.0.5\n",
        )
        .unwrap();
        let source = YamlDeviceConfigSource::new(dir.path());

        let declarations = source.read().await.unwrap();

        assert_eq!(source.file_name(), "webthings.yml");
        assert_eq!(declarations["lamp"].url, "http://10.0.0.5");
    }

    #[tokio::test]
    async fn should_report_missing_file_as_device_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = YamlDeviceConfigSource::new(dir.path());

        let err = source.read().await.unwrap_err();

        assert!(matches!(err, EngineError::DeviceConfig(_)));
    }
}
