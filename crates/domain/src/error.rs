//! Error types shared across the workspace.
//!
//! Each layer defines its own typed errors and converts via `#[from]`.
//! The domain only knows about malformed input: trigger declarations and
//! property values that fall outside the Web Thing scalar types.

/// A trigger declaration could not be turned into a [`Trigger`](crate::trigger::Trigger).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    /// The text matches none of the known grammars.
    #[error("declaration does not match any trigger grammar")]
    Unrecognized,

    /// `time cron` without an expression.
    #[error("cron expression is empty")]
    EmptyCron,

    /// `property … changed` without a `#` between device and property.
    #[error("expected `<device>#<property>` between `property` and `changed`")]
    MissingSeparator,

    /// `property #on changed`.
    #[error("device name is empty")]
    EmptyDevice,

    /// `property lamp# changed`.
    #[error("property name is empty")]
    EmptyProperty,
}

/// A JSON value that cannot be stored as a property.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyValueError {
    /// Only booleans, numbers and strings are supported.
    #[error("unsupported property value of type {0}")]
    Unsupported(&'static str),
}
