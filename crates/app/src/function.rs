//! Rule functions: compiled automation logic addressable by name.
//!
//! A rule module only names functions; the code itself lives in a
//! [`FunctionCatalog`] built into the daemon. Each [`RuleFunction`] declares
//! its parameters up front so the [`Invoker`](crate::invoker::Invoker) can
//! bind them against the device registry without introspection.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BoxError;
use crate::invoker::InvokeError;
use crate::ports::device::DeviceHandle;

/// Reserved parameter name receiving the initiator string.
pub const INITIATOR: &str = "initiator";

/// Boxed future returned by a rule function body.
pub type RuleFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

type Body = dyn Fn(RuleArgs) -> RuleFuture + Send + Sync;

/// Arguments bound for one call of a rule function.
#[derive(Clone)]
pub struct RuleArgs {
    initiator: String,
    devices: BTreeMap<String, DeviceHandle>,
}

impl RuleArgs {
    pub(crate) fn new(initiator: impl Into<String>) -> Self {
        Self {
            initiator: initiator.into(),
            devices: BTreeMap::new(),
        }
    }

    pub(crate) fn bind(&mut self, parameter: impl Into<String>, device: DeviceHandle) {
        self.devices.insert(parameter.into(), device);
    }

    /// What fired the rule: `rule loaded`, the cron expression or the
    /// changed property name.
    #[must_use]
    pub fn initiator(&self) -> &str {
        &self.initiator
    }

    /// The device bound to parameter `name`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::NotDeclared`] if the function did not declare
    /// `name` as a parameter.
    pub fn device(&self, name: &str) -> Result<DeviceHandle, InvokeError> {
        self.devices
            .get(name)
            .cloned()
            .ok_or_else(|| InvokeError::NotDeclared(name.to_string()))
    }
}

/// A named function with a parameter descriptor.
#[derive(Clone)]
pub struct RuleFunction {
    name: String,
    parameters: Vec<String>,
    body: Arc<Body>,
}

impl RuleFunction {
    /// Wrap `body` as a rule function taking `parameters`.
    ///
    /// Every parameter other than [`INITIATOR`] is a device name.
    pub fn new<F, Fut>(name: impl Into<String>, parameters: &[&str], body: F) -> Self
    where
        F: Fn(RuleArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            parameters: parameters.iter().map(ToString::to_string).collect(),
            body: Arc::new(move |args| Box::pin(body(args))),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub(crate) fn call(&self, args: RuleArgs) -> RuleFuture {
        (self.body)(args)
    }
}

impl std::fmt::Debug for RuleFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleFunction")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Every rule function known to the process, by name.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    functions: BTreeMap<String, RuleFunction>,
}

impl FunctionCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function, replacing any previous one with the same name.
    #[must_use]
    pub fn with(mut self, function: RuleFunction) -> Self {
        self.register(function);
        self
    }

    pub fn register(&mut self, function: RuleFunction) {
        self.functions.insert(function.name.clone(), function);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<RuleFunction> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
