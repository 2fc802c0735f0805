//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_ACCEPT_LANGUAGE, DEFAULT_ORIGIN, DEFAULT_USER_AGENT, DEFAULT_WS_URL,
    ReconnectSettings, RelayConfig, ServerSettings, SessionSettings, TradingViewSettings,
    parse_subscriptions,
};
