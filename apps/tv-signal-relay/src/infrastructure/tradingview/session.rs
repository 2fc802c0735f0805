//! Chart Session Connection
//!
//! One websocket bound to one chart session.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──► Handshaking ──► Streaming ──► Closed
//!      │              │                          ▲
//!      └──────────────┴──────── error ───────────┘
//! ```
//!
//! Transitions are one-way. Once streaming, a spawned read loop echoes
//! keepalives, feeds samples to the session's [`SignalExtractor`] and pushes
//! signals onto a bounded channel. Errors never escape the read loop; they end
//! the session and are reported as its [`CloseReason`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, FrameCodec};
use super::handshake::{AUTH_TOKEN_ENV, AuthToken, HandshakeBuilder, HandshakeSpec, STUDY_ID, SessionKey};
use super::parser::{ParsedChunk, StreamParser};
use crate::domain::error::ConfigurationError;
use crate::domain::signal::{SignalEvent, SignalExtractor};
use crate::infrastructure::config::{RelayConfig, TradingViewSettings};
use crate::infrastructure::metrics::{self, FailureStage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for the close handshake once the read loop ends.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Configuration
// =============================================================================

/// Settings shared by every session of the relay.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Chart socket auth token.
    pub auth_token: Option<AuthToken>,
    /// Endpoint and headers.
    pub endpoint: TradingViewSettings,
    /// Bound on connecting and on each handshake read.
    pub handshake_timeout: Duration,
    /// Silence after which a streaming socket is considered dead.
    pub idle_timeout: Duration,
    /// Signal channel capacity.
    pub channel_capacity: usize,
}

impl SessionConfig {
    /// Extract session settings from the relay configuration.
    #[must_use]
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            auth_token: config.auth_token.clone(),
            endpoint: config.tradingview.clone(),
            handshake_timeout: config.session.handshake_timeout,
            idle_timeout: config.session.idle_timeout,
            channel_capacity: config.session.signal_channel_capacity,
        }
    }

    /// The auth token, or the configuration error naming its variable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::MissingAuthToken` if no token is set.
    pub fn require_token(&self) -> Result<&AuthToken, ConfigurationError> {
        self.auth_token
            .as_ref()
            .ok_or(ConfigurationError::MissingAuthToken(AUTH_TOKEN_ENV))
    }
}

// =============================================================================
// State & Errors
// =============================================================================

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the socket.
    Connecting,
    /// Exchanging bootstrap messages.
    Handshaking,
    /// Read loop running.
    Streaming,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// State name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        }
    }
}

/// Socket-level failures. These are retryable.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Endpoint or header values are unusable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Handshake frames could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A connect or handshake step took too long.
    #[error("timed out waiting for {phase} after {timeout:?}")]
    HandshakeTimeout {
        /// Step that timed out.
        phase: &'static str,
        /// Applied bound.
        timeout: Duration,
    },

    /// No inbound traffic while streaming.
    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),

    /// Server closed the socket.
    #[error("connection closed by server")]
    ConnectionClosed,
}

/// Errors opening a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Settings are unusable; retrying cannot help.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Network failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Whether a later attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Why a streaming session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner closed it.
    Requested,
    /// The socket failed or went away.
    Lost(String),
}

impl CloseReason {
    /// Short label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Lost(_) => "lost",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => f.write_str("closed by owner"),
            Self::Lost(reason) => write!(f, "connection lost: {reason}"),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A chart session that has not been opened yet.
#[derive(Debug)]
pub struct SessionConnection {
    config: Arc<SessionConfig>,
    spec: HandshakeSpec,
    key: SessionKey,
    state: watch::Sender<SessionState>,
}

impl SessionConnection {
    /// Prepare a session with a fresh key.
    #[must_use]
    pub fn new(config: Arc<SessionConfig>, spec: HandshakeSpec) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            config,
            spec,
            key: SessionKey::generate(),
            state,
        }
    }

    /// Key of this chart session.
    #[must_use]
    pub const fn session_key(&self) -> &SessionKey {
        &self.key
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Connect, run the handshake and start streaming.
    ///
    /// Nothing is retried here. Dropping the returned future abandons the
    /// attempt and its socket; the state still ends at `Closed`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` without connecting if no auth
    /// token is configured, and `SessionError::Transport` if the socket or
    /// handshake fails.
    pub async fn open(self) -> Result<SessionHandle, SessionError> {
        let attempt = OpenAttempt::new(&self.state);

        let frames = match self.handshake_frames() {
            Ok(frames) => frames,
            Err(e) => {
                metrics::record_session_failure(FailureStage::Configuration);
                return Err(e);
            }
        };

        let started = Instant::now();
        tracing::info!(
            session_key = %self.key,
            symbol = %self.spec.symbol(),
            timeframe = %self.spec.timeframe(),
            url = %self.config.endpoint.url,
            "Connecting chart session"
        );

        let mut ws = match self.connect().await {
            Ok(ws) => ws,
            Err(e) => return Err(self.fail(FailureStage::Connect, e)),
        };

        self.state.send_replace(SessionState::Handshaking);
        if let Err(e) = self.handshake(&mut ws, frames).await {
            return Err(self.fail(FailureStage::Handshake, e));
        }

        let elapsed = started.elapsed();
        metrics::record_session_opened(elapsed);
        tracing::info!(
            session_key = %self.key,
            handshake_ms = elapsed.as_millis(),
            "Chart session streaming"
        );

        attempt.streaming();
        Ok(self.spawn_stream(ws))
    }

    fn handshake_frames(&self) -> Result<Vec<String>, SessionError> {
        let token = self.config.require_token()?;
        HandshakeBuilder::new(token, &self.key, &self.spec)
            .frames(&FrameCodec::new())
            .map_err(|e| TransportError::from(e).into())
    }

    fn fail(&self, stage: FailureStage, error: TransportError) -> SessionError {
        metrics::record_session_failure(stage);
        tracing::warn!(
            session_key = %self.key,
            state = self.state.borrow().as_str(),
            error = %error,
            "Chart session failed to open"
        );
        error.into()
    }

    async fn connect(&self) -> Result<WsStream, TransportError> {
        let request = build_request(&self.config.endpoint)?;
        let timeout = self.config.handshake_timeout;

        let (ws, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| TransportError::HandshakeTimeout {
                phase: "connect",
                timeout,
            })??;
        Ok(ws)
    }

    async fn handshake(&self, ws: &mut WsStream, frames: Vec<String>) -> Result<(), TransportError> {
        let timeout = self.config.handshake_timeout;

        let greeting = read_text(ws, timeout, "greeting").await?;
        tracing::debug!(session_key = %self.key, greeting = %excerpt(&greeting), "Server greeting");

        for frame in frames {
            ws.send(Message::text(frame)).await?;
        }

        let ack = read_text(ws, timeout, "acknowledgement").await?;
        tracing::debug!(session_key = %self.key, ack = %excerpt(&ack), "Handshake acknowledged");
        Ok(())
    }

    fn spawn_stream(self, ws: WsStream) -> SessionHandle {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let (write, read) = ws.split();

        let task = StreamTask {
            write,
            read,
            parser: StreamParser::new(self.key.clone(), STUDY_ID),
            extractor: SignalExtractor::new(self.spec.timeframe()),
            signals: tx,
            cancel: cancel.clone(),
            idle_timeout: self.config.idle_timeout,
            key: self.key.clone(),
        };

        let state_rx = self.state.subscribe();
        self.state.send_replace(SessionState::Streaming);
        let state = self.state;
        let join = tokio::spawn(async move {
            let reason = task.run().await;
            state.send_replace(SessionState::Closed);
            metrics::record_session_closed(reason.label());
            reason
        });

        SessionHandle {
            key: self.key,
            state: state_rx,
            signals: Some(ReceiverStream::new(rx)),
            cancel,
            task: join,
        }
    }
}

/// Publishes `Closed` unless the open attempt reached streaming.
struct OpenAttempt<'a> {
    state: &'a watch::Sender<SessionState>,
    streaming: bool,
}

impl<'a> OpenAttempt<'a> {
    const fn new(state: &'a watch::Sender<SessionState>) -> Self {
        Self {
            state,
            streaming: false,
        }
    }

    fn streaming(mut self) {
        self.streaming = true;
    }
}

impl Drop for OpenAttempt<'_> {
    fn drop(&mut self) {
        if !self.streaming {
            self.state.send_replace(SessionState::Closed);
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Owner's side of a streaming session.
///
/// Dropping the handle cancels the read loop.
#[derive(Debug)]
pub struct SessionHandle {
    key: SessionKey,
    state: watch::Receiver<SessionState>,
    signals: Option<ReceiverStream<SignalEvent>>,
    cancel: CancellationToken,
    task: JoinHandle<CloseReason>,
}

impl SessionHandle {
    /// Key of this chart session.
    #[must_use]
    pub const fn session_key(&self) -> &SessionKey {
        &self.key
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Take the signal stream. It ends when the session closes.
    ///
    /// Returns `None` after the first call.
    pub fn take_signals(&mut self) -> Option<ReceiverStream<SignalEvent>> {
        self.signals.take()
    }

    /// Close the session and wait for the read loop to finish.
    pub async fn close(mut self) -> CloseReason {
        self.cancel.cancel();
        match (&mut self.task).await {
            Ok(reason) => reason,
            Err(e) => CloseReason::Lost(format!("read loop aborted: {e}")),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Read Loop
// =============================================================================

struct StreamTask {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    parser: StreamParser,
    extractor: SignalExtractor,
    signals: mpsc::Sender<SignalEvent>,
    cancel: CancellationToken,
    idle_timeout: Duration,
    key: SessionKey,
}

impl StreamTask {
    async fn run(mut self) -> CloseReason {
        let reason = loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => break CloseReason::Requested,
                next = tokio::time::timeout(self.idle_timeout, self.read.next()) => next,
            };

            let message = match next {
                Err(_) => break self.lost(TransportError::IdleTimeout(self.idle_timeout)),
                Ok(None) => break self.lost(TransportError::ConnectionClosed),
                Ok(Some(Err(e))) => break self.lost(e.into()),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    if let ControlFlow::Break(reason) = self.on_text(text).await {
                        break reason;
                    }
                }
                Message::Ping(data) => {
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        break self.lost(e.into());
                    }
                }
                Message::Close(frame) => {
                    tracing::info!(session_key = %self.key, ?frame, "Server sent close frame");
                    break self.lost(TransportError::ConnectionClosed);
                }
                _ => {}
            }
        };

        let _ = tokio::time::timeout(CLOSE_GRACE, self.write.close()).await;
        tracing::info!(session_key = %self.key, reason = %reason, "Chart session closed");
        reason
    }

    async fn on_text(&mut self, text: Utf8Bytes) -> ControlFlow<CloseReason> {
        let parsed = self.parser.parse(text.as_str(), Utc::now());

        match parsed {
            ParsedChunk::Keepalive => {
                if let Err(e) = self.write.send(Message::Text(text)).await {
                    return ControlFlow::Break(self.lost(e.into()));
                }
                metrics::record_keepalive();
                tracing::trace!(session_key = %self.key, "Echoed keepalive");
            }
            ParsedChunk::Frames { samples, errors } => {
                if !errors.is_empty() {
                    for error in &errors {
                        tracing::warn!(session_key = %self.key, error = %error, "Dropping malformed frame");
                    }
                    metrics::record_frame_errors(u64::try_from(errors.len()).unwrap_or(u64::MAX));
                }

                for sample in samples {
                    for event in self.extractor.on_sample(&sample) {
                        metrics::record_signal_emitted(event.kind);
                        tracing::info!(
                            session_key = %self.key,
                            kind = event.kind.as_str(),
                            price = %event.price,
                            "Signal"
                        );

                        tokio::select! {
                            () = self.cancel.cancelled() => return ControlFlow::Break(CloseReason::Requested),
                            sent = self.signals.send(event) => {
                                if sent.is_err() {
                                    tracing::debug!(session_key = %self.key, "Signal receiver dropped");
                                }
                            }
                        }
                    }
                }
            }
        }

        ControlFlow::Continue(())
    }

    fn lost(&self, error: TransportError) -> CloseReason {
        tracing::warn!(session_key = %self.key, error = %error, "Chart session lost");
        CloseReason::Lost(error.to_string())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Build the upgrade request with browser-like headers.
///
/// `Host` is derived from the endpoint URL.
///
/// # Errors
///
/// Returns `TransportError` if the URL or a header value is invalid.
pub fn build_request(endpoint: &TradingViewSettings) -> Result<Request, TransportError> {
    let mut request = endpoint.url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(header::ORIGIN, header_value(&endpoint.origin)?);
    headers.insert(header::USER_AGENT, header_value(&endpoint.user_agent)?);
    headers.insert(header::ACCEPT_LANGUAGE, header_value(&endpoint.accept_language)?);
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(request)
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidEndpoint(format!("header value {value:?}: {e}")))
}

/// Next text message, skipping control frames.
async fn read_text<S>(
    stream: &mut S,
    timeout: Duration,
    phase: &'static str,
) -> Result<String, TransportError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::time::timeout(timeout, stream.next())
            .await
            .map_err(|_| TransportError::HandshakeTimeout { phase, timeout })?;

        match next {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(120).collect()
}

// =============================================================================
// Tests
// =============================================================================
