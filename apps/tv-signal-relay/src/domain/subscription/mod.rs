//! Subscriber Settings
//!
//! Domain types describing what a subscriber watches. A subscriber is only
//! streamable once both its symbol and its timeframe are known.

use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;
use super::signal::Timeframe;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscriber (chat id of the front-end).
pub type SubscriberId = i64;

/// An instrument identifier as understood by the chart service (`BINANCE:BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Normalize and validate a symbol.
    ///
    /// Symbols are trimmed and upper-cased.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::EmptySymbol` if nothing is left after trimming.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ConfigurationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ConfigurationError::EmptySymbol);
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    /// Symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = ConfigurationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symbol and timeframe a chart session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Watched instrument.
    pub symbol: Symbol,
    /// Chart resolution.
    pub timeframe: Timeframe,
}

impl StreamSettings {
    /// Validate raw settings.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` for an empty symbol or an unknown
    /// timeframe code.
    pub fn parse(symbol: &str, timeframe: &str) -> Result<Self, ConfigurationError> {
        Ok(Self {
            symbol: Symbol::new(symbol)?,
            timeframe: timeframe.parse()?,
        })
    }
}

/// Persisted subscriber record, restored at startup by the front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    /// Subscriber id.
    pub id: SubscriberId,
    /// Stream settings, `None` until fully configured.
    pub settings: Option<StreamSettings>,
}

// =============================================================================
// Tests
// =============================================================================
