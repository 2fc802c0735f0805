//! Subscription Registry
//!
//! Owns one chart session pipeline per subscriber.
//!
//! # Replacement
//!
//! Each subscriber has a slot with an async change lock. Changing a
//! subscriber's settings takes that lock, stops the running supervisor and
//! awaits the old session's close before the new supervisor is spawned, so a
//! subscriber never has two live sessions. Different subscribers do not
//! contend. Read accessors never wait on a change lock, so a sink may query
//! the registry while a replacement is closing the old session.
//!
//! # Supervision
//!
//! A supervisor task opens a session, forwards its signals to the
//! [`SignalSink`] and reconnects with backoff when the transport fails.
//! Configuration errors end the supervisor immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{SessionNotice, SignalSink};
use crate::domain::error::ConfigurationError;
use crate::domain::subscription::{StreamSettings, SubscriberId, SubscriberRecord};
use crate::infrastructure::metrics;
use crate::infrastructure::tradingview::{
    ReconnectConfig, ReconnectPolicy, SessionConfig, SessionConnection, SessionError,
    SessionHandle,
};

// =============================================================================
// Errors
// =============================================================================

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Settings were rejected.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The registry no longer accepts changes.
    #[error("subscription registry is shut down")]
    ShutDown,
}

// =============================================================================
// Registry
// =============================================================================

/// Per-subscriber session lifecycle manager.
pub struct SubscriptionRegistry {
    session_config: Arc<SessionConfig>,
    reconnect: ReconnectConfig,
    sink: Arc<dyn SignalSink>,
    slots: RwLock<HashMap<SubscriberId, Arc<Slot>>>,
    streaming: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct Slot {
    /// Serializes changes to one subscriber. Held across supervisor stops.
    changes: tokio::sync::Mutex<()>,
    /// Never held across an await.
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    settings: Option<StreamSettings>,
    supervisor: Option<Supervisor>,
    removed: bool,
}

impl SlotState {
    fn is_running(&self) -> bool {
        self.supervisor.as_ref().is_some_and(Supervisor::is_running)
    }
}

struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Supervisor {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Subscriber supervisor panicked");
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscribers", &self.len())
            .field("streaming", &self.streaming_sessions())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        session_config: Arc<SessionConfig>,
        reconnect: ReconnectConfig,
        sink: Arc<dyn SignalSink>,
    ) -> Self {
        Self {
            session_config,
            reconnect,
            sink,
            slots: RwLock::new(HashMap::new()),
            streaming: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind a subscriber to a symbol and timeframe and start streaming.
    ///
    /// Any session the subscriber already has is closed, and its close is
    /// awaited, before the new one starts. Concurrent calls for one
    /// subscriber are serialized; the last one wins.
    ///
    /// Must not be called from the sink for the same subscriber; see
    /// [`SignalSink`].
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Configuration` for an empty symbol, an unknown
    /// timeframe or a missing auth token; the existing session is left
    /// untouched in that case.
    pub async fn set_symbol_and_timeframe(
        &self,
        id: SubscriberId,
        symbol: &str,
        timeframe: &str,
    ) -> Result<(), RegistryError> {
        let settings = StreamSettings::parse(symbol, timeframe)?;
        self.session_config.require_token()?;

        loop {
            self.ensure_open()?;
            let slot = self.slot_or_insert(id);
            let changes = slot.changes.lock().await;
            let removed = slot.state.lock().removed;
            if removed {
                drop(changes);
                tokio::task::yield_now().await;
                continue;
            }

            let old = slot.state.lock().supervisor.take();
            if let Some(old) = old {
                tracing::info!(subscriber = id, "Replacing chart session");
                old.stop().await;
            }

            tracing::info!(
                subscriber = id,
                symbol = %settings.symbol,
                timeframe = %settings.timeframe,
                "Starting chart session"
            );
            let supervisor = self.spawn_supervisor(id, settings.clone());
            {
                let mut state = slot.state.lock();
                state.supervisor = Some(supervisor);
                state.settings = Some(settings);
            }
            drop(changes);
            return Ok(());
        }
    }

    /// Close the subscriber's session, if any, and forget the subscriber.
    ///
    /// Returns whether the subscriber was known.
    pub async fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let Some(slot) = self.slots.read().get(&id).cloned() else {
            return false;
        };

        let changes = slot.changes.lock().await;
        let supervisor = {
            let mut state = slot.state.lock();
            if state.removed {
                return false;
            }
            state.removed = true;
            state.supervisor.take()
        };
        if let Some(supervisor) = supervisor {
            supervisor.stop().await;
        }
        drop(changes);

        self.slots.write().remove(&id);
        tracing::info!(subscriber = id, "Subscriber removed");
        true
    }

    /// Load persisted subscribers without starting any session.
    ///
    /// Settings of subscribers that are currently streaming are kept.
    pub async fn restore(&self, records: impl IntoIterator<Item = SubscriberRecord>) {
        for record in records {
            let slot = self.slot_or_insert(record.id);
            let _changes = slot.changes.lock().await;
            let mut state = slot.state.lock();
            if state.removed || state.is_running() {
                continue;
            }
            state.settings = record.settings;
        }
    }

    /// Start streaming for every fully configured subscriber that has no
    /// running session.
    ///
    /// Returns the number of sessions started.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Configuration` if no auth token is available,
    /// or `RegistryError::ShutDown` after [`Self::shutdown`].
    pub async fn start(&self) -> Result<usize, RegistryError> {
        self.ensure_open()?;
        self.session_config.require_token()?;

        let mut started = 0;
        for (id, slot) in self.snapshot() {
            let _changes = slot.changes.lock().await;
            let mut state = slot.state.lock();
            if state.removed || state.is_running() {
                continue;
            }
            if let Some(settings) = state.settings.clone() {
                state.supervisor = Some(self.spawn_supervisor(id, settings));
                started += 1;
            }
        }

        tracing::info!(started, subscribers = self.len(), "Subscriber sessions started");
        Ok(started)
    }

    /// Close every session and wait for all of them to finish.
    ///
    /// The registry rejects changes afterwards.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let stops = self.snapshot().into_iter().map(|(_, slot)| async move {
            let _changes = slot.changes.lock().await;
            let supervisor = slot.state.lock().supervisor.take();
            if let Some(supervisor) = supervisor {
                supervisor.stop().await;
            }
        });
        join_all(stops).await;

        tracing::info!("Subscription registry shut down");
    }

    /// Snapshot of one subscriber.
    #[must_use]
    pub fn subscriber(&self, id: SubscriberId) -> Option<SubscriberRecord> {
        let slot = self.slots.read().get(&id).cloned()?;
        let state = slot.state.lock();
        (!state.removed).then(|| SubscriberRecord {
            id,
            settings: state.settings.clone(),
        })
    }

    /// Snapshot of every subscriber, ordered by id.
    #[must_use]
    pub fn subscribers(&self) -> Vec<SubscriberRecord> {
        let mut records: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter_map(|(id, slot)| {
                let state = slot.state.lock();
                (!state.removed).then(|| SubscriberRecord {
                    id,
                    settings: state.settings.clone(),
                })
            })
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Subscribers with a running supervisor.
    ///
    /// A subscriber whose session is being replaced is not counted.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|(_, slot)| slot.state.lock().is_running())
            .count()
    }

    /// Sessions currently past their handshake.
    #[must_use]
    pub fn streaming_sessions(&self) -> usize {
        self.streaming.load(Ordering::Relaxed)
    }

    /// Number of known subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no subscriber is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Whether [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::ShutDown);
        }
        Ok(())
    }

    fn slot_or_insert(&self, id: SubscriberId) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(&id) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(id).or_default())
    }

    fn snapshot(&self) -> Vec<(SubscriberId, Arc<Slot>)> {
        self.slots
            .read()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect()
    }

    fn spawn_supervisor(&self, id: SubscriberId, settings: StreamSettings) -> Supervisor {
        let cancel = self.shutdown.child_token();
        let run = SupervisorRun {
            id,
            settings,
            session_config: Arc::clone(&self.session_config),
            policy: ReconnectPolicy::new(self.reconnect.clone()),
            sink: Arc::clone(&self.sink),
            streaming: Arc::clone(&self.streaming),
            cancel: cancel.clone(),
        };
        let span = tracing::info_span!("subscriber", id);
        Supervisor {
            cancel,
            task: tokio::spawn(run.run().instrument(span)),
        }
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Supervisor
// =============================================================================

struct SupervisorRun {
    id: SubscriberId,
    settings: StreamSettings,
    session_config: Arc<SessionConfig>,
    policy: ReconnectPolicy,
    sink: Arc<dyn SignalSink>,
    streaming: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl SupervisorRun {
    async fn run(mut self) {
        loop {
            let connection = SessionConnection::new(
                Arc::clone(&self.session_config),
                self.settings.clone().into(),
            );

            let opened = tokio::select! {
                () = self.cancel.cancelled() => return,
                opened = connection.open() => opened,
            };

            let last_error = match opened {
                Ok(handle) => {
                    self.policy.reset();
                    self.forward(handle).await;
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    None
                }
                Err(SessionError::Configuration(e)) => {
                    tracing::error!(error = %e, "Chart session rejected");
                    self.sink
                        .notify(self.id, SessionNotice::Failed { error: e.to_string() })
                        .await;
                    return;
                }
                Err(e) => Some(e.to_string()),
            };

            let Some(delay) = self.policy.next_delay() else {
                let error = format!(
                    "giving up after {} failed attempts: {}",
                    self.policy.attempts(),
                    last_error.as_deref().unwrap_or("connection lost")
                );
                tracing::error!(error = %error, "Chart session abandoned");
                self.sink.notify(self.id, SessionNotice::Failed { error }).await;
                return;
            };

            metrics::record_reconnect();
            let attempt = self.policy.attempts();
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting chart session");
            self.sink
                .notify(self.id, SessionNotice::Reconnecting { attempt, delay })
                .await;

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Relay signals until the session ends or the supervisor is cancelled,
    /// then close the session.
    async fn forward(&self, mut handle: SessionHandle) {
        let session_key = handle.session_key().to_string();
        self.streaming.fetch_add(1, Ordering::Relaxed);
        self.sink
            .notify(
                self.id,
                SessionNotice::Streaming {
                    session_key: session_key.clone(),
                },
            )
            .await;

        if let Some(mut signals) = handle.take_signals() {
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    next = signals.next() => {
                        let Some(event) = next else { break };
                        self.sink.deliver(self.id, event).await;
                        metrics::record_signal_delivered();
                    }
                }
            }
        }

        let reason = handle.close().await;
        self.streaming.fetch_sub(1, Ordering::Relaxed);
        self.sink
            .notify(
                self.id,
                SessionNotice::Closed {
                    session_key,
                    reason: reason.to_string(),
                },
            )
            .await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::ports::{MockSignalSink, RecordingSink};
    use crate::domain::signal::Timeframe;
    use crate::infrastructure::config::TradingViewSettings;
    use crate::infrastructure::tradingview::AuthToken;

    fn session_config(token: Option<&str>, url: &str) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            auth_token: token.map(|t| AuthToken::new(t).unwrap()),
            endpoint: TradingViewSettings {
                url: url.to_string(),
                ..TradingViewSettings::default()
            },
            handshake_timeout: Duration::from_millis(200),
            idle_timeout: Duration::from_secs(1),
            channel_capacity: 4,
        })
    }

    fn quick_reconnect(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    async fn unused_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}/socket")
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_synchronously() {
        let registry = SubscriptionRegistry::new(
            session_config(Some("token"), "ws://127.0.0.1:9/socket"),
            quick_reconnect(1),
            Arc::new(MockSignalSink::new()),
        );

        assert_eq!(
            registry.set_symbol_and_timeframe(1, "  ", "15").await,
            Err(RegistryError::Configuration(ConfigurationError::EmptySymbol))
        );
        assert_eq!(
            registry.set_symbol_and_timeframe(1, "BTCUSDT", "XX").await,
            Err(RegistryError::Configuration(
                ConfigurationError::UnknownTimeframe("XX".to_string())
            ))
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_a_configuration_error() {
        let registry = SubscriptionRegistry::new(
            session_config(None, "ws://127.0.0.1:9/socket"),
            quick_reconnect(1),
            Arc::new(MockSignalSink::new()),
        );

        assert!(matches!(
            registry.set_symbol_and_timeframe(1, "BTCUSDT", "15").await,
            Err(RegistryError::Configuration(
                ConfigurationError::MissingAuthToken(_)
            ))
        ));
        assert!(matches!(
            registry.start().await,
            Err(RegistryError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn restore_does_not_start_sessions() {
        let registry = SubscriptionRegistry::new(
            session_config(Some("token"), "ws://127.0.0.1:9/socket"),
            quick_reconnect(1),
            Arc::new(RecordingSink::new()),
        );

        registry
            .restore([
                SubscriberRecord {
                    id: 2,
                    settings: Some(StreamSettings::parse("ETHUSDT", "1D").unwrap()),
                },
                SubscriberRecord { id: 1, settings: None },
            ])
            .await;

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_sessions(), 0);
        let records = registry.subscribers();
        assert_eq!(records[0].id, 1);
        assert_eq!(
            records[1].settings.as_ref().unwrap().timeframe,
            Timeframe::Day1
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_gives_up_after_max_attempts() {
        let sink = Arc::new(RecordingSink::new());
        let registry = SubscriptionRegistry::new(
            session_config(Some("token"), &unused_url().await),
            quick_reconnect(2),
            sink.clone(),
        );

        registry
            .set_symbol_and_timeframe(5, "BTCUSDT", "1")
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.active_sessions() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let notices = sink.notices_for(5);
        assert_eq!(notices.len(), 3);
        assert!(matches!(notices[0], SessionNotice::Reconnecting { attempt: 1, .. }));
        assert!(matches!(notices[1], SessionNotice::Reconnecting { attempt: 2, .. }));
        assert!(matches!(notices[2], SessionNotice::Failed { .. }));
        assert_eq!(registry.streaming_sessions(), 0);
    }

    #[tokio::test]
    async fn remove_and_shutdown() {
        let registry = SubscriptionRegistry::new(
            session_config(Some("token"), &unused_url().await),
            quick_reconnect(0),
            Arc::new(RecordingSink::new()),
        );

        registry.set_symbol_and_timeframe(1, "A", "5").await.unwrap();
        registry.set_symbol_and_timeframe(2, "B", "5").await.unwrap();
        assert_eq!(registry.active_sessions(), 2);

        assert!(registry.remove_subscriber(1).await);
        assert!(!registry.remove_subscriber(1).await);
        assert_eq!(registry.len(), 1);
        assert!(registry.subscriber(1).is_none());

        registry.shutdown().await;
        assert!(registry.is_shut_down());
        assert_eq!(registry.active_sessions(), 0);
        assert_eq!(
            registry.set_symbol_and_timeframe(3, "C", "5").await,
            Err(RegistryError::ShutDown)
        );
    }
}
