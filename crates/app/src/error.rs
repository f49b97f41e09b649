//! Errors crossing port boundaries.
//!
//! Adapters wrap their own typed errors into [`EngineError`] through
//! `From` impls so the core never names adapter types.

/// Boxed error used at port boundaries and as the rule-function error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by an adapter through a port.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The persistent key-value store failed.
    #[error("storage error")]
    Storage(#[source] BoxError),

    /// The device configuration could not be read or parsed.
    #[error("device configuration error")]
    DeviceConfig(#[source] BoxError),

    /// A rule module could not be listed or parsed.
    #[error("rule module error")]
    RuleModule(#[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn should_keep_source_of_wrapped_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "webthings.yml");
        let err = EngineError::DeviceConfig(Box::new(io));
        assert_eq!(err.to_string(), "device configuration error");
        assert_eq!(err.source().unwrap().to_string(), "webthings.yml");
    }
}
