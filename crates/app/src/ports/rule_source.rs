//! Rule module port: lists rule module files and extracts their trigger
//! declarations.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::EngineError;

/// Function name to the trigger declarations attached to it.
pub type Annotations = BTreeMap<String, Vec<String>>;

/// A directory of rule modules.
pub trait RuleModuleSource: Send + Sync {
    /// Module identity of a file name, or `None` if the file is not a rule
    /// module (wrong suffix).
    fn module_id(&self, file_name: &str) -> Option<String>;

    /// File names of every rule module currently present.
    fn list_files(&self) -> impl Future<Output = Result<Vec<String>, EngineError>> + Send;

    /// Trigger declarations of `module`, keyed by function name.
    fn parse_annotations(
        &self,
        module: &str,
    ) -> impl Future<Output = Result<Annotations, EngineError>> + Send;
}

impl<T: RuleModuleSource> RuleModuleSource for Arc<T> {
    fn module_id(&self, file_name: &str) -> Option<String> {
        self.as_ref().module_id(file_name)
    }

    fn list_files(&self) -> impl Future<Output = Result<Vec<String>, EngineError>> + Send {
        self.as_ref().list_files()
    }

    fn parse_annotations(
        &self,
        module: &str,
    ) -> impl Future<Output = Result<Annotations, EngineError>> + Send {
        self.as_ref().parse_annotations(module)
    }
}
