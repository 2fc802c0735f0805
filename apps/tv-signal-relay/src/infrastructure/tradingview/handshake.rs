//! Chart Session Handshake
//!
//! Builds the bootstrap messages that bind a fresh chart session to a symbol,
//! a timeframe and the signal study.
//!
//! # Handshake Order
//!
//! 1. `set_auth_token` - authorize the socket
//! 2. `chart_create_session` - open chart session `cs_*`
//! 3. `resolve_symbol` - bind series alias `sds_sym_1` to the symbol
//! 4. `create_series` - 300 bars of the timeframe on `sds_1`
//! 5. `create_study` - attach the compiled study as `st7`
//!
//! The study is a published Pine script compiled on TradingView's side. Its
//! payload is an opaque, versioned artifact and is sent exactly as captured.

use serde::Serialize;
use serde_json::{Value, json};

use super::codec::{CodecError, FrameCodec};
use crate::domain::error::ConfigurationError;
use crate::domain::signal::Timeframe;
use crate::domain::subscription::{StreamSettings, Symbol};

// =============================================================================
// Constants
// =============================================================================

/// Environment variable holding the TradingView auth token.
pub const AUTH_TOKEN_ENV: &str = "TR_VIEW_AUTH_TOKEN";

/// Series alias bound to the resolved symbol.
pub const SYMBOL_ALIAS: &str = "sds_sym_1";

/// Series identifier.
pub const SERIES_ID: &str = "sds_1";

/// Series turnaround id.
pub const SERIES_TURNAROUND: &str = "s1";

/// Study slot that carries the signal plots in `du` messages.
pub const STUDY_ID: &str = "st7";

/// Study turnaround id.
pub const STUDY_TURNAROUND: &str = "st1";

/// Number of bars requested for the series.
pub const SERIES_LOOKBACK: u32 = 300;

/// Script loader identifier understood by the scripting backend.
pub const SCRIPT_LOADER: &str = "Script@tv-scripting-101!";

/// Published id of the signal study.
pub const PINE_ID: &str = "PUB;b5decac5edce49b6b86bce93d4a3db0b";

/// Version of the published study.
pub const PINE_VERSION: &str = "1.0";

/// Compiled study body.
const COMPILED_STUDY: &str = "bmI9Ks46_o2JPCHE64Wi9r2wKsxwHgg==_NY7xehFQEgbSayc8ow170Wt7/e75lpTj3KSQYgssqvKfpBIREYDS9enFAKtVQ3rKg4aWimTuZ0BcW4N2YLwABE3SsmeMoAU6fkOSO8brzqMberW3WaMK1tJ4/DJX2klYZwv/P/nJvXzHPEIb5130TE4Ca/t00N2a1GhtbC8cvKEj0uxI1PXXQcPcBUQcJ8gCQoSk65P0yPpVO/q6uUXsuyo/vDWKB4SNi3HY+qd59wtSEqDStUoRYzZBI23zDMnsr957of72JVVswziJm7/+wOSH2hDHIGQIDj7cPnyWF37FnAESQocr9cu1lar2YuQr0cAG9RaT8CLd0RQQQj5Oan8QNSzT6zg1jomBihqWxLWst9HnKuEk/3f02oPWSDuVpYdhZkwp1jjWoZeRGxeQAmag1V122SAvIttEaNc5hto5i0p6NyvKYG1q6j388Ty4FprS95Rss+A75FedaRLGFibsx2DMnEwUgtZbYBe+95rv7wQatJGBQcaWWZoTvJhHPOggizQoZJR3vjt0OulZ4FLfP/Q372LaDBZli0XOZdaBUGVGONUW4ZdhcLui/YnWHh73Hgk8jFamF1/i34KFrEgZ6KvIxFQPNhrpt95ls2mESex2XqwcB/KlX6vXfB972s4ELMueW/2gWk+X2/HGG7APOWgq2ro/r/Fdp+bWrQrB6SZxrfqnIqoBIXgtO5uKBFRw4UVuk0IWa5QwwO8ZeovBsPMKO0u4bOhlAmOmtlzJFBgGZGVyfsQFQDyyQrcarG51eysUzP6g/elkSXuFr5cI9xVaEh3VM+w71Yme7wo7dhNTVXmNa/H1VVo9OE/QdzXXKrtOBtUpjY5ocNK5YZZ6SYWgFRXjhhfaAi5/0Z4wieZS/LPG+szc/0SPWoaPHhcZgktsQp6ZtQR4DF5/UOYkervPBPyXzObBqB7AWi29Vdk0k/nGyHUqL1sRKliZHJJ12afyOXwTgTTuLWF0O6bGdqO5i4ZKdiX8cESBwPeI55w/2n1tZb4shwPJRuSnkO11jMsNpAUKxxbO25PqTuhZ9Mn5wgH1omT4qKNSFnZ/soBkrsd30I7uv0I/6neJZ8tJoXvG9X/6Etng9v4HWQTIAlE3xNuCX2OkYbzzjNBXomPPxWiBNa/y51pViAz0w3Ih2+bI+otBZC6zZFS0zH4xnyYe/kPPZ6/UDvb1tWVPUaOjeasXusiABNzsg2MIM8YHHBlPRaWfMWie3f+JxprnSt5m70fFAR438gxM69ePV13aK+OxsjHhEmOb1MRaVKbwFJVktyxSVwzUQ0kdIWk3qwtL0kmqp5Vq+UJILG4c02jJyGv9eY/xwTndrw/9RSiB5ghZomTCgjxaOWzliCSpH1/7vL/Ymz5EghnyZizaSxPBdpFk3dXgZh3h+OGgIizntKcpZeEJtdHgMjjwBZYPYxx40/SSyh0z+ndBGzbNwqHA/QZ3IiuplLUrf4/z8vfIl90gCV7Ugjo7KQkrWQogP7bpCpIbRxK/BATuAo7Oidv3JcBZzRcHswThaSpxofQGGNgZYCucVjrMv78mTInRMvp3336JJOrKq0iGXeIbqA8rpI+weV+23Y5w4IOG5x8XoA9pUmDNhMzGLY3rB8Fncle7lJngEsoX0jgdS2XY58JR4rMoZOZtXI6UfCATu1t3WHxGZifTvyTjh1mY9hSkQcFUzwy3wLYm8a9MmKLd3rbKvyJTBLTpkUARl53ntxUi1uMlP0vhoYdx+o4mPbdidSyYXTRie+0Wv2nWvQX15gmVRVnTKjtvRgCoAlFYi5qbsZN8+PI/EBWPXTzr2D+BEst4FCbr46UnRwA58fB8ZYYmXLVq4R/EuYqD5w9hVw+uQAvUXz0tuJTr7JZV9NQxwkMXOrw+geHDy1pL8ADen+Vj72ZiUsDVOni4Du+Xg8KhCMOLJ2w82Jo6GDx8vNg8fx1u6ulNxh/WttzVcmIG18ScN9FDBt1ndvIvkdN1hkwZVeTUpDLP75/ycovlbT6OhJgr2c7VsNmroeOhXoKXs06DqPhvDAXCs7UD/oCbD8UOZ97mSmk7QbeeSJVkTL8inxAPXhT3Q1U/dmNAQzCD6jcmheBgknQNg/XmI36Jx0rV/hE/Yr/X6kSU6iwu9YEUQu833yMT3pDjaSRzuW4Kqt6mkC5M4gXcI70jVdpJgXpqf+OOERSNvJ06dpNgNN9kzIXdZ6jWIiHMcXzVs5CvKIiuqWMamutP/KLJ8jXkL8h5u6DCoRhxiFqeENMB1xnqFBGV+jSvtX9f6HIjalrrYuPDHLRE9jyZkTOeM8uMW+I5FK+k3A4qf16rykEbZbd39Fcr8ui3J+6lDy+qaGm+IZ96AeZ96lAWnfkGfqS1uSCRN/ESl2pZoTweKEAKrVF+/DZS6sTYmZR3IJTzWneYFk0rBLmBd3LXMPL52Z2XfViWjt3zgCPBqUMRWbfdh+uuVMCA+Hc9ljNUl3bhZdR6NM/JNCKgmREGl/wl6HyvTyA1WrEiVaeLWOLs8iHhPrjzoNdBIo4/YNC0m4UOmITlWQgAYIm07Q9dd8kCkJGkfhMs00dcsWwDvUFDZYPpSgkqjvtu1U+uyFN2ZYwZBmrlSKrPM/Jl9rC+/7LChbue1MyPWugLHmxA3QupHBTj44bWS3OofKTAYcUKAqTeWJuaYRqX4UK1ChNerq9qHCVbrcWhDJdlohkMFBBINfReHo5nt0VbjMuyuBdxY7thymhv6HIUiBkTQaffE9hnaIKUmDBio3mw8kmwLVWWXHJADsxnsr0L5HH8hCzSWduTfPxejmFddk1HVkyYAEVJEh+SIPT8jNSjXwEw+/bVv4eypTmqWY0d/OZ+FaJtOW/dmLYXFOPPuebYgV/0dHvbcZ4OQEwTbUb0Ws1aVADhFdtBvvS8EzCIKwdrAzSnOdau09Jocq5WVFjbzYZHRwrP5/9YYnA9tuk7Ak0afomeYN1JLU0cdrPx8OisHNFuvqN+zR8fL/LfQzyMLFcRnu/z8hXw6re6vIq4PIKIEtZItrMxrJxmcukkCgIWFn3QboEoKzn2MzQhIWIzEnY4kg==";

/// Feature flags the compiled study was built with.
const PINE_FEATURES: &str =
    r#"{\"indicator\":1,\"plot\":1,\"array\":1,\"ta\":1,\"math\":1,\"alertcondition\":1}"#;

// =============================================================================
// Auth Token
// =============================================================================

/// Bearer token for the chart socket.
///
/// The `Debug` implementation redacts the value for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a token.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::MissingAuthToken` if the token is blank.
    pub fn new(token: impl Into<String>) -> Result<Self, ConfigurationError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ConfigurationError::MissingAuthToken(AUTH_TOKEN_ENV));
        }
        Ok(Self(token))
    }

    /// Read the token from `TR_VIEW_AUTH_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::MissingAuthToken` if the variable is
    /// unset or blank.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let token = std::env::var(AUTH_TOKEN_ENV)
            .map_err(|_| ConfigurationError::MissingAuthToken(AUTH_TOKEN_ENV))?;
        Self::new(token)
    }

    /// Token value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

// =============================================================================
// Session Key
// =============================================================================

/// Identifier of one chart session, `cs_` followed by 12 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Generate a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("cs_{}", &hex[..12]))
    }

    /// Key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Everything a chart session is bound to. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeSpec {
    symbol: Symbol,
    timeframe: Timeframe,
}

impl HandshakeSpec {
    /// Create a spec for the signal study.
    #[must_use]
    pub const fn new(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self { symbol, timeframe }
    }

    /// Watched symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Chart timeframe.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        self.timeframe
    }
}

impl From<StreamSettings> for HandshakeSpec {
    fn from(settings: StreamSettings) -> Self {
        Self::new(settings.symbol, settings.timeframe)
    }
}

/// Outbound protocol message `{"m": <method>, "p": [<params>]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMessage {
    /// Method name.
    pub m: &'static str,
    /// Positional parameters.
    pub p: Vec<Value>,
}

impl ClientMessage {
    fn new(m: &'static str, p: Vec<Value>) -> Self {
        Self { m, p }
    }
}

/// Builds the ordered bootstrap messages of a chart session.
#[derive(Debug, Clone)]
pub struct HandshakeBuilder<'a> {
    token: &'a AuthToken,
    session_key: &'a SessionKey,
    spec: &'a HandshakeSpec,
}

impl<'a> HandshakeBuilder<'a> {
    /// Create a builder for one session.
    #[must_use]
    pub const fn new(
        token: &'a AuthToken,
        session_key: &'a SessionKey,
        spec: &'a HandshakeSpec,
    ) -> Self {
        Self {
            token,
            session_key,
            spec,
        }
    }

    /// The five handshake messages, in send order.
    #[must_use]
    pub fn messages(&self) -> [ClientMessage; 5] {
        let key = self.session_key.as_str();
        let resolve = json!({
            "adjustment": "splits",
            "symbol": self.spec.symbol().as_str(),
        });

        [
            ClientMessage::new("set_auth_token", vec![json!(self.token.expose())]),
            ClientMessage::new("chart_create_session", vec![json!(key), json!("")]),
            ClientMessage::new(
                "resolve_symbol",
                vec![json!(key), json!(SYMBOL_ALIAS), json!(format!("={resolve}"))],
            ),
            ClientMessage::new(
                "create_series",
                vec![
                    json!(key),
                    json!(SERIES_ID),
                    json!(SERIES_TURNAROUND),
                    json!(SYMBOL_ALIAS),
                    json!(self.spec.timeframe().code()),
                    json!(SERIES_LOOKBACK),
                    json!(""),
                ],
            ),
            ClientMessage::new(
                "create_study",
                vec![
                    json!(key),
                    json!(STUDY_ID),
                    json!(STUDY_TURNAROUND),
                    json!(SERIES_ID),
                    json!(SCRIPT_LOADER),
                    study_inputs(),
                ],
            ),
        ]
    }

    /// The handshake messages framed for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if a message cannot be serialized.
    pub fn frames(&self, codec: &FrameCodec) -> Result<Vec<String>, CodecError> {
        self.messages()
            .iter()
            .map(|message| codec.encode(message))
            .collect()
    }
}

/// Compiled study payload plus its typed inputs.
fn study_inputs() -> Value {
    json!({
        "text": COMPILED_STUDY,
        "pineId": PINE_ID,
        "pineVersion": PINE_VERSION,
        "pineFeatures": {"v": PINE_FEATURES, "f": true, "t": "text"},
        "in_0": {"v": 8, "f": true, "t": "float"},
        "in_1": {"v": 8, "f": true, "t": "float"},
        "in_2": {"v": 25, "f": true, "t": "integer"},
        "in_3": {"v": false, "f": true, "t": "bool"},
        "in_4": {"v": 2, "f": true, "t": "integer"},
        "in_5": {"v": 5, "f": true, "t": "integer"},
        "in_6": {"v": 20, "f": true, "t": "integer"},
        "in_7": {"v": 10, "f": true, "t": "integer"},
        "__profile": {"v": false, "f": true, "t": "bool"},
    })
}
