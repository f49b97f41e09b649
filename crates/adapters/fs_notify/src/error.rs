//! Filesystem adapter errors.

use thingrules_app::error::EngineError;

/// The device configuration file could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ConfigSourceError {
    #[error("unable to read device configuration")]
    Io(#[from] std::io::Error),

    #[error("unable to parse device configuration")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<ConfigSourceError> for EngineError {
    fn from(err: ConfigSourceError) -> Self {
        Self::DeviceConfig(Box::new(err))
    }
}

/// A rule module could not be listed or read.
#[derive(Debug, thiserror::Error)]
pub enum RuleModuleError {
    #[error("unable to read rule modules")]
    Io(#[from] std::io::Error),

    #[error("unable to parse rule module")]
    Toml(#[from] toml::de::Error),
}

impl From<RuleModuleError> for EngineError {
    fn from(err: RuleModuleError) -> Self {
        Self::RuleModule(Box::new(err))
    }
}

/// The directory watcher could not be set up.
#[derive(Debug, thiserror::Error)]
#[error("unable to watch directory")]
pub struct WatchError(#[from] notify::Error);
