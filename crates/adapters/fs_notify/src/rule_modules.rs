//! Rule modules: TOML files binding catalog functions to trigger
//! declarations.
//!
//! ```toml
//! [[rule]]
//! function = "lights_off"
//! when = ["time cron 0 0 23 * * ?", "property lamp#on changed"]
//! ```
//!
//! The module identity is the file name without `.toml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use thingrules_app::error::EngineError;
use thingrules_app::ports::{Annotations, RuleModuleSource};

use crate::error::RuleModuleError;

/// Suffix of rule module files.
pub const RULE_MODULE_SUFFIX: &str = ".toml";

#[derive(Debug, Default, Deserialize)]
struct ModuleFile {
    #[serde(default)]
    rule: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    function: String,
    #[serde(default)]
    when: Vec<String>,
}

/// Rule modules stored as `*.toml` files in one directory.
pub struct TomlRuleModuleSource {
    dir: PathBuf,
}

impl TomlRuleModuleSource {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse a module's content into its annotations. Entries naming the
    /// same function are merged.
    ///
    /// # Errors
    ///
    /// Returns [`RuleModuleError::Toml`] on malformed content.
    pub fn parse(content: &str) -> Result<Annotations, RuleModuleError> {
        let file: ModuleFile = toml::from_str(content)?;
        let mut annotations = Annotations::new();
        for entry in file.rule {
            if entry.when.is_empty() {
                continue;
            }
            annotations
                .entry(entry.function)
                .or_default()
                .extend(entry.when);
        }
        Ok(annotations)
    }

    async fn list(&self) -> Result<Vec<String>, RuleModuleError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str()
                && self.module_id(name).is_some()
            {
                files.push(name.to_string());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read(&self, module: &str) -> Result<Annotations, RuleModuleError> {
        let path = self.dir.join(format!("{module}{RULE_MODULE_SUFFIX}"));
        let content = tokio::fs::read_to_string(&path).await?;
        let annotations = Self::parse(&content)?;
        debug!(path = %path.display(), functions = annotations.len(), "rule module parsed");
        Ok(annotations)
    }
}

impl RuleModuleSource for TomlRuleModuleSource {
    fn module_id(&self, file_name: &str) -> Option<String> {
        file_name
            .strip_suffix(RULE_MODULE_SUFFIX)
            .filter(|stem| !stem.is_empty() && !stem.starts_with('.'))
            .map(ToString::to_string)
    }

    async fn list_files(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.list().await?)
    }

    async fn parse_annotations(&self, module: &str) -> Result<Annotations, EngineError> {
        Ok(self.read(module).await?)
    }
}
