//! TradingView Chart Socket Adapter
//!
//! Client side of the `data.tradingview.com` websocket:
//!
//! - `codec`: `~m~<len>~m~<json>` framing
//! - `handshake`: chart session bootstrap messages
//! - `parser`: indicator samples from data updates
//! - `session`: one socket per chart session with its read loop
//! - `reconnect`: backoff between session attempts

pub mod codec;
pub mod handshake;
pub mod parser;
pub mod reconnect;
pub mod session;

pub use codec::{CodecError, FrameCodec};
pub use handshake::{AuthToken, HandshakeBuilder, HandshakeSpec, SessionKey};
pub use parser::{ParsedChunk, StreamParser};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{
    CloseReason, SessionConfig, SessionConnection, SessionError, SessionHandle, SessionState,
    TransportError,
};
