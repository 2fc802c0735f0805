//! Configuration Errors
//!
//! Errors raised when a chart session cannot be configured. These are fatal
//! for the affected session and are never retried automatically.

/// A session was requested with settings that can never succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Timeframe code is not in the supported table.
    #[error("unrecognized timeframe code: {0:?}")]
    UnknownTimeframe(String),

    /// Symbol is missing or blank.
    #[error("symbol must not be empty")]
    EmptySymbol,

    /// Auth token environment variable is not set.
    #[error("missing auth token: environment variable {0} is not set")]
    MissingAuthToken(&'static str),
}
