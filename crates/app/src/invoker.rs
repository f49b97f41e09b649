//! Invoker: binds a rule function's declared parameters and calls it.

use tracing::debug;

use crate::error::BoxError;
use crate::function::{INITIATOR, RuleArgs, RuleFunction};
use crate::registry::DeviceRegistry;

/// Why a rule function could not be called, or what it reported.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// A declared parameter names no device, even after a reload attempt.
    #[error("parameter `{0}` does not resolve to a device")]
    Unbound(String),

    /// The function body returned an error.
    #[error("rule function failed")]
    Function(#[source] BoxError),

    /// The function body asked for a device it did not declare.
    #[error("parameter `{0}` is not declared by the function")]
    NotDeclared(String),
}

/// Resolves parameters against a [`DeviceRegistry`] at call time.
pub struct Invoker<'a> {
    registry: &'a DeviceRegistry,
}

impl<'a> Invoker<'a> {
    #[must_use]
    pub fn new(registry: &'a DeviceRegistry) -> Self {
        Self { registry }
    }

    /// Bind every parameter of `function`.
    ///
    /// [`INITIATOR`] receives `initiator`; any other name is looked up as a
    /// device, which may trigger a throttled configuration reload.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Unbound`] on the first parameter that names
    /// no device.
    pub async fn bind(
        &self,
        function: &RuleFunction,
        initiator: &str,
    ) -> Result<RuleArgs, InvokeError> {
        let mut args = RuleArgs::new(initiator);
        for parameter in function.parameters() {
            if parameter == INITIATOR {
                continue;
            }
            let device = self
                .registry
                .device(parameter)
                .await
                .ok_or_else(|| InvokeError::Unbound(parameter.clone()))?;
            args.bind(parameter.clone(), device);
        }
        Ok(args)
    }

    /// Bind and call `function`.
    ///
    /// # Errors
    ///
    /// Returns a binding error, or [`InvokeError::Function`] wrapping what
    /// the function body returned.
    pub async fn invoke(&self, function: &RuleFunction, initiator: &str) -> Result<(), InvokeError> {
        let args = self.bind(function, initiator).await?;
        debug!(function = function.name(), initiator, "calling rule function");
        function.call(args).await.map_err(InvokeError::Function)
    }
}
