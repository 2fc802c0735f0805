//! Relay Configuration Settings
//!
//! Configuration types for the signal relay, loaded from environment variables.

use std::time::Duration;

use crate::domain::error::ConfigurationError;
use crate::domain::subscription::{StreamSettings, SubscriberId, SubscriberRecord};
use crate::infrastructure::tradingview::handshake::{AUTH_TOKEN_ENV, AuthToken};

/// Default chart socket endpoint.
pub const DEFAULT_WS_URL: &str =
    "wss://data.tradingview.com/socket.io/websocket?from=chart%2F&type=chart";

/// Default `Origin` header.
pub const DEFAULT_ORIGIN: &str = "https://ru.tradingview.com";

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0";

/// Default `Accept-Language` header.
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "ru";

/// Lower bound for the handshake and idle timeouts.
const MIN_SESSION_TIMEOUT: Duration = Duration::from_secs(1);

/// Chart socket endpoint and browser-like headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingViewSettings {
    /// Websocket endpoint.
    pub url: String,
    /// `Origin` header.
    pub origin: String,
    /// `User-Agent` header.
    pub user_agent: String,
    /// `Accept-Language` header.
    pub accept_language: String,
}

impl Default for TradingViewSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
        }
    }
}

/// Per-session timing and buffering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bound on connecting and on each handshake read.
    pub handshake_timeout: Duration,
    /// Silence after which a streaming socket is considered dead.
    pub idle_timeout: Duration,
    /// Capacity of each session's signal channel.
    pub signal_channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            signal_channel_capacity: 64,
        }
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(1000),
            delay_max: Duration::from_secs(60),
            delay_multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 10000 }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Chart socket auth token, `None` if unset.
    pub auth_token: Option<AuthToken>,
    /// Chart socket endpoint and headers.
    pub tradingview: TradingViewSettings,
    /// Session timing.
    pub session: SessionSettings,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Server ports.
    pub server: ServerSettings,
    /// Subscribers to start with.
    pub subscriptions: Vec<SubscriberRecord>,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// A missing auth token is not an error here; sessions report it when
    /// they are started.
    ///
    /// # Errors
    ///
    /// Returns an error if `RELAY_SUBSCRIPTIONS` is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `RELAY_SUBSCRIPTIONS` is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_token = lookup(AUTH_TOKEN_ENV).and_then(|t| AuthToken::new(t).ok());

        let defaults = TradingViewSettings::default();
        let tradingview = TradingViewSettings {
            url: lookup("TV_WS_URL").unwrap_or(defaults.url),
            origin: lookup("TV_ORIGIN").unwrap_or(defaults.origin),
            user_agent: lookup("TV_USER_AGENT").unwrap_or(defaults.user_agent),
            accept_language: lookup("TV_ACCEPT_LANGUAGE").unwrap_or(defaults.accept_language),
        };

        let defaults = SessionSettings::default();
        let session = SessionSettings {
            handshake_timeout: parse_env_duration_secs(
                &lookup,
                "RELAY_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout,
            )
            .max(MIN_SESSION_TIMEOUT),
            idle_timeout: parse_env_duration_secs(
                &lookup,
                "RELAY_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout,
            )
            .max(MIN_SESSION_TIMEOUT),
            signal_channel_capacity: parse_env(
                &lookup,
                "RELAY_SIGNAL_CHANNEL_CAPACITY",
                defaults.signal_channel_capacity,
            )
            .max(1),
        };

        let defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delay_initial: parse_env_duration_millis(
                &lookup,
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                defaults.delay_initial,
            ),
            delay_max: parse_env_duration_secs(
                &lookup,
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                defaults.delay_max,
            ),
            delay_multiplier: parse_env(
                &lookup,
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                defaults.delay_multiplier,
            ),
            max_attempts: parse_env(
                &lookup,
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                defaults.max_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env(&lookup, "PORT", ServerSettings::default().health_port),
        };

        let subscriptions = lookup("RELAY_SUBSCRIPTIONS")
            .map(|raw| parse_subscriptions(&raw))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            auth_token,
            tradingview,
            session,
            reconnect,
            server,
            subscriptions,
        })
    }
}

/// Parse a seed list of the form `id=SYMBOL@TIMEFRAME;id=SYMBOL@TIMEFRAME`.
///
/// Empty entries are skipped.
///
/// # Errors
///
/// Returns `ConfigError::InvalidSubscription` for an entry that is not
/// well formed or whose settings are rejected.
pub fn parse_subscriptions(raw: &str) -> Result<Vec<SubscriberRecord>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = |reason: String| ConfigError::InvalidSubscription {
                entry: entry.to_string(),
                reason,
            };

            let (id, stream) = entry
                .split_once('=')
                .ok_or_else(|| invalid("expected id=SYMBOL@TIMEFRAME".to_string()))?;
            let id: SubscriberId = id
                .trim()
                .parse()
                .map_err(|e| invalid(format!("bad subscriber id: {e}")))?;
            let (symbol, timeframe) = stream
                .rsplit_once('@')
                .ok_or_else(|| invalid("expected SYMBOL@TIMEFRAME".to_string()))?;
            let settings = StreamSettings::parse(symbol, timeframe.trim())
                .map_err(|e: ConfigurationError| invalid(e.to_string()))?;

            Ok(SubscriberRecord {
                id,
                settings: Some(settings),
            })
        })
        .collect()
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A seed subscription entry could not be parsed.
    #[error("invalid subscription entry {entry:?}: {reason}")]
    InvalidSubscription {
        /// Offending entry.
        entry: String,
        /// What was wrong with it.
        reason: String,
    },
}

fn parse_env<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::signal::Timeframe;

    fn config_from(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = config_from(&[]).unwrap();

        assert!(config.auth_token.is_none());
        assert_eq!(config.tradingview, TradingViewSettings::default());
        assert_eq!(config.tradingview.url, DEFAULT_WS_URL);
        assert_eq!(config.session.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.session.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.session.signal_channel_capacity, 64);
        assert_eq!(config.reconnect, ReconnectSettings::default());
        assert_eq!(config.server.health_port, 10000);
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn variables_override_defaults() {
        let config = config_from(&[
            ("TR_VIEW_AUTH_TOKEN", "secret"),
            ("TV_WS_URL", "ws://127.0.0.1:9000/socket"),
            ("RELAY_IDLE_TIMEOUT_SECS", "5"),
            ("RELAY_SIGNAL_CHANNEL_CAPACITY", "0"),
            ("RELAY_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("RELAY_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("RELAY_MAX_RECONNECT_ATTEMPTS", "0"),
            ("PORT", "8080"),
        ])
        .unwrap();

        assert_eq!(config.auth_token.unwrap().expose(), "secret");
        assert_eq!(config.tradingview.url, "ws://127.0.0.1:9000/socket");
        assert_eq!(config.session.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.session.signal_channel_capacity, 1);
        assert_eq!(config.reconnect.delay_initial, Duration::from_millis(250));
        assert!((config.reconnect.delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.server.health_port, 8080);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = config_from(&[("PORT", "http"), ("RELAY_IDLE_TIMEOUT_SECS", "-3")]).unwrap();
        assert_eq!(config.server.health_port, 10000);
        assert_eq!(config.session.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_timeouts_are_raised_to_one_second() {
        let config = config_from(&[
            ("RELAY_HANDSHAKE_TIMEOUT_SECS", "0"),
            ("RELAY_IDLE_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.session.handshake_timeout, Duration::from_secs(1));
        assert_eq!(config.session.idle_timeout, Duration::from_secs(1));
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let config = config_from(&[("TR_VIEW_AUTH_TOKEN", "  ")]).unwrap();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn seed_list_parses() {
        let records = parse_subscriptions(" 1=BINANCE:BTCUSDT@15; ;-42=eurusd@1D;").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        let settings = records[1].settings.as_ref().unwrap();
        assert_eq!(records[1].id, -42);
        assert_eq!(settings.symbol.as_str(), "EURUSD");
        assert_eq!(settings.timeframe, Timeframe::Day1);
    }

    #[test]
    fn seed_list_rejects_bad_entries() {
        for raw in ["BTCUSDT@15", "x=BTCUSDT@15", "1=BTCUSDT", "1=BTCUSDT@7", "1=@15"] {
            assert!(
                matches!(
                    parse_subscriptions(raw),
                    Err(ConfigError::InvalidSubscription { .. })
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn malformed_seed_list_fails_config() {
        assert!(config_from(&[("RELAY_SUBSCRIPTIONS", "nope")]).is_err());
    }
}
