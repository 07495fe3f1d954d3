//! Connection manager: drives the state machine in `core::connection` over a
//! [`Transport`], with cancellable reconnect timers.
//!
//! Every `connect()`/`disconnect()` starts a new generation. A retry loop only
//! applies transitions for the generation it was started in, so a superseded
//! loop can neither move the state nor outlive its timer.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::core::connection::ConnectionState;
use crate::error::AssistantError;
use crate::io::context::ConfigContext;
use crate::io::session_store::SessionStore;
use crate::io::transport::Transport;

type Listener = Box<dyn Fn(&ConnectionState) + Send + Sync>;

/// Handle returned by [`ConnectionManager::on_state_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Inner {
    state: ConnectionState,
    generation: u64,
}

struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

pub struct ConnectionManager<T> {
    transport: T,
    ctx: Arc<ConfigContext>,
    sessions: Arc<SessionStore>,
    inner: Mutex<Inner>,
    // Held for the whole of a transition plus its notifications, which keeps
    // delivery in transition order.
    listeners: Mutex<Listeners>,
    generation: watch::Sender<u64>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, ctx: Arc<ConfigContext>, sessions: Arc<SessionStore>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            transport,
            ctx,
            sessions,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                generation: 0,
            }),
            listeners: Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            }),
            generation,
        }
    }

    pub fn get_state(&self) -> ConnectionState {
        self.lock_inner().state.clone()
    }

    /// Reconnect attempt in progress, zero unless `Reconnecting`.
    pub fn attempt(&self) -> u32 {
        self.lock_inner().state.attempt()
    }

    /// Register a listener called synchronously after every transition.
    ///
    /// Listeners run under the notification lock: they may read the state but
    /// must not subscribe or start transitions from inside the callback.
    pub fn on_state_change(
        &self,
        listener: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut listeners = self.lock_listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Box::new(listener)));
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.lock_listeners()
            .entries
            .retain(|(entry_id, _)| *entry_id != id.0);
    }

    /// Connect, retrying with backoff until connected or out of attempts.
    ///
    /// Valid from any state; this is the only way out of `Failed`. Returns
    /// `Cancelled` when a later `connect()` or `disconnect()` supersedes it.
    #[instrument(skip_all)]
    pub async fn connect(&self) -> Result<(), AssistantError> {
        let generation = self.begin(ConnectionState::Connecting);
        let mut cancel = self.generation.subscribe();
        let opened = tokio::select! {
            opened = self.open() => opened,
            () = cancelled(&mut cancel, generation) => return Err(AssistantError::Cancelled),
        };
        match opened {
            Ok(()) => self.finish_connected(generation),
            Err(err) => self.recover(generation, err, &mut cancel).await,
        }
    }

    /// Drop the connection from any state and cancel pending retries.
    #[instrument(skip_all)]
    pub fn disconnect(&self) {
        self.begin(ConnectionState::Disconnected);
    }

    /// Report a failure of an established connection (for example a dropped
    /// event stream) and run the reconnect loop. Ignored unless `Connected`.
    pub async fn handle_transport_failure(
        &self,
        failure: AssistantError,
    ) -> Result<(), AssistantError> {
        let Some(generation) = self.connected_generation() else {
            debug!(error = %failure, "transport failure ignored, not connected");
            return Ok(());
        };
        let mut cancel = self.generation.subscribe();
        self.recover(generation, failure, &mut cancel).await
    }

    /// Send a JSON request with the current session credentials.
    ///
    /// Requires `Connected`. A transport failure runs the reconnect loop
    /// before returning: the original error comes back if the connection was
    /// restored (the request may be retried), otherwise the recovery error.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn send(&self, path: &str, body: &Value) -> Result<Value, AssistantError> {
        let Some(generation) = self.connected_generation() else {
            return Err(AssistantError::NotConnected);
        };
        let session = self.sessions.get_session();
        match self.transport.send(&session, path, body).await {
            Ok(reply) => Ok(reply),
            Err(err) => Err(self.fail_connected(generation, err).await),
        }
    }

    /// Re-check an established connection; a failure runs the reconnect loop.
    pub async fn probe(&self) -> Result<(), AssistantError> {
        let Some(generation) = self.connected_generation() else {
            return Err(AssistantError::NotConnected);
        };
        match self.open().await {
            Ok(()) => Ok(()),
            Err(err) => match self.fail_connected(generation, err).await {
                AssistantError::TransportFailure(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    /// Handle `err` from a request made while `Connected` and return the
    /// error the caller should see.
    async fn fail_connected(&self, generation: u64, err: AssistantError) -> AssistantError {
        match err {
            AssistantError::AuthenticationExpired(_) => {
                self.transition(
                    generation,
                    ConnectionState::Failed {
                        reason: err.to_string(),
                    },
                );
                err
            }
            AssistantError::TransportFailure(reason) => {
                let mut cancel = self.generation.subscribe();
                match self
                    .recover(
                        generation,
                        AssistantError::TransportFailure(reason.clone()),
                        &mut cancel,
                    )
                    .await
                {
                    Ok(()) => AssistantError::TransportFailure(reason),
                    Err(recovery) => recovery,
                }
            }
            other => other,
        }
    }

    async fn open(&self) -> Result<(), AssistantError> {
        let session = self.sessions.get_session();
        self.transport.open(&session).await
    }

    async fn recover(
        &self,
        generation: u64,
        failure: AssistantError,
        cancel: &mut watch::Receiver<u64>,
    ) -> Result<(), AssistantError> {
        if matches!(failure, AssistantError::AuthenticationExpired(_)) {
            warn!(error = %failure, "authentication expired, not reconnecting");
            self.transition(
                generation,
                ConnectionState::Failed {
                    reason: failure.to_string(),
                },
            );
            return Err(failure);
        }
        let policy = match self.ctx.snapshot().reconnect_policy() {
            Ok(policy) => policy,
            Err(err) => {
                self.transition(
                    generation,
                    ConnectionState::Failed {
                        reason: err.to_string(),
                    },
                );
                return Err(err);
            }
        };

        let mut next = policy.on_transport_failure(&failure.to_string());
        loop {
            if !self.transition(generation, next.clone()) {
                return Err(AssistantError::Cancelled);
            }
            let (attempt, delay) = match next {
                ConnectionState::Reconnecting {
                    attempt,
                    next_delay,
                } => (attempt, next_delay),
                ConnectionState::Failed { reason } => {
                    return Err(AssistantError::ReconnectExhausted { reason });
                }
                other => {
                    return Err(AssistantError::Internal(anyhow::anyhow!(
                        "unexpected reconnect state {other}"
                    )));
                }
            };

            debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting to reconnect");
            let opened = tokio::select! {
                () = cancelled(cancel, generation) => return Err(AssistantError::Cancelled),
                opened = async {
                    tokio::time::sleep(delay).await;
                    self.open().await
                } => opened,
            };

            match opened {
                Ok(()) => return self.finish_connected(generation),
                Err(err @ AssistantError::AuthenticationExpired(_)) => {
                    self.transition(
                        generation,
                        ConnectionState::Failed {
                            reason: err.to_string(),
                        },
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "reconnect attempt failed");
                    next = policy.on_retry_failed(attempt, &err.to_string());
                }
            }
        }
    }

    fn finish_connected(&self, generation: u64) -> Result<(), AssistantError> {
        if self.transition(generation, ConnectionState::Connected) {
            Ok(())
        } else {
            Err(AssistantError::Cancelled)
        }
    }

    fn connected_generation(&self) -> Option<u64> {
        let inner = self.lock_inner();
        inner.state.is_connected().then_some(inner.generation)
    }

    /// Start a new generation in `state`, cancelling any running loop.
    fn begin(&self, state: ConnectionState) -> u64 {
        let listeners = self.lock_listeners();
        let (generation, changed) = {
            let mut inner = self.lock_inner();
            inner.generation += 1;
            self.generation.send_replace(inner.generation);
            let changed = inner.state != state;
            if changed {
                info!(from = %inner.state, to = %state, "connection state changed");
                inner.state = state.clone();
            }
            (inner.generation, changed)
        };
        if changed {
            notify(&listeners, &state);
        }
        generation
    }

    /// Apply `state` if `generation` is still current. Returns false when superseded.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let listeners = self.lock_listeners();
        {
            let mut inner = self.lock_inner();
            if inner.generation != generation {
                debug!(to = %state, "stale transition dropped");
                return false;
            }
            if inner.state == state {
                return true;
            }
            info!(from = %inner.state, to = %state, "connection state changed");
            inner.state = state.clone();
        }
        notify(&listeners, &state);
        true
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn notify(listeners: &Listeners, state: &ConnectionState) {
    for (_, listener) in &listeners.entries {
        listener(state);
    }
}

async fn cancelled(cancel: &mut watch::Receiver<u64>, generation: u64) {
    // A closed channel means the manager is gone; treat it as cancelled too.
    let _ = cancel.wait_for(|current| *current != generation).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::io::settings::Settings;
    use crate::test_support::{OpenStep, ScriptedTransport, SendStep};

    fn manager(
        steps: Vec<OpenStep>,
        max_attempts: u32,
    ) -> (ConnectionManager<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::new(steps);
        let ctx = Arc::new(ConfigContext::from_settings(Settings {
            reconnect_interval: 1_000,
            max_reconnect_attempts: max_attempts,
            ..Settings::default()
        }));
        let manager = ConnectionManager::new(
            transport.clone(),
            ctx,
            Arc::new(SessionStore::in_memory()),
        );
        (manager, transport)
    }

    fn record(manager: &ConnectionManager<ScriptedTransport>) -> Arc<Mutex<Vec<ConnectionState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on_state_change(move |state| sink.lock().expect("lock").push(state.clone()));
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn connects_on_first_try() {
        let (manager, transport) = manager(vec![OpenStep::Ok], 3);
        let seen = record(&manager);
        manager.connect().await.expect("connect");
        assert_eq!(manager.get_state(), ConnectionState::Connected);
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert_eq!(transport.open_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_fewer_failures_than_allowed() {
        let (manager, _) = manager(
            vec![OpenStep::fail("refused"), OpenStep::fail("refused"), OpenStep::Ok],
            3,
        );
        let start = tokio::time::Instant::now();
        manager.connect().await.expect("connect");
        assert_eq!(manager.get_state(), ConnectionState::Connected);
        assert_eq!(manager.attempt(), 0);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3_000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3_100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejection_fails_without_retry() {
        let (manager, transport) = manager(vec![OpenStep::expired("401 Unauthorized")], 3);
        let err = manager.connect().await.expect_err("expired");
        assert!(matches!(err, AssistantError::AuthenticationExpired(_)));
        assert!(matches!(manager.get_state(), ConnectionState::Failed { .. }));
        assert_eq!(transport.open_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let (manager, transport) = manager(vec![OpenStep::fail("refused")], 3);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            manager.disconnect();
        };
        let (result, ()) = tokio::join!(manager.connect(), cancel);
        assert!(matches!(result, Err(AssistantError::Cancelled)));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.get_state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_connection() {
        let (manager, _) = manager(Vec::new(), 3);
        let err = manager
            .send("/api/events", &serde_json::json!({}))
            .await
            .expect_err("not connected");
        assert!(matches!(err, AssistantError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_while_connected_reconnects() {
        let (manager, _) = manager(vec![OpenStep::Ok, OpenStep::fail("reset"), OpenStep::Ok], 3);
        manager.connect().await.expect("connect");
        let seen = record(&manager);

        manager
            .handle_transport_failure(AssistantError::TransportFailure("stream closed".to_string()))
            .await
            .expect("recovered");
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![
                ConnectionState::Reconnecting {
                    attempt: 1,
                    next_delay: Duration::from_millis(1_000)
                },
                ConnectionState::Reconnecting {
                    attempt: 2,
                    next_delay: Duration::from_millis(2_000)
                },
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_reconnects_and_returns_the_original_error() {
        let (manager, transport) = manager(vec![OpenStep::Ok, OpenStep::Ok], 3);
        let transport = transport.with_send_steps(vec![SendStep::Fail("reset".to_string())]);
        manager.connect().await.expect("connect");

        let err = manager
            .send("/api/events", &serde_json::json!({"kind": "ping"}))
            .await
            .expect_err("send fails");
        assert!(matches!(err, AssistantError::TransportFailure(ref reason) if reason == "reset"));
        assert_eq!(manager.get_state(), ConnectionState::Connected);
        assert_eq!(transport.open_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_credentials_on_send_fail_the_connection() {
        let (manager, transport) = manager(vec![OpenStep::Ok], 3);
        transport.with_send_steps(vec![SendStep::Expired("403 Forbidden".to_string())]);
        manager.connect().await.expect("connect");

        let err = manager
            .send("/api/events", &serde_json::json!({}))
            .await
            .expect_err("expired");
        assert!(matches!(err, AssistantError::AuthenticationExpired(_)));
        assert!(matches!(manager.get_state(), ConnectionState::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn removed_listener_is_not_called() {
        let (manager, _) = manager(vec![OpenStep::Ok], 3);
        let seen = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&seen);
        let id = manager.on_state_change(move |_| *sink.lock().expect("lock") += 1);
        manager.remove_listener(id);
        manager.connect().await.expect("connect");
        assert_eq!(*seen.lock().expect("lock"), 0);
    }
}
