//! Connection manager lifecycle against a scripted transport.
//!
//! Time is paused, so backoff delays are checked exactly without sleeping.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assistant::core::connection::ConnectionState;
use assistant::core::session::SessionUpdate;
use assistant::error::AssistantError;
use assistant::io::connection::ConnectionManager;
use assistant::io::context::ConfigContext;
use assistant::io::session_store::SessionStore;
use assistant::io::settings::Settings;
use assistant::test_support::{OpenStep, ScriptedTransport, TestWorkspace};

fn settings(interval_ms: u64, max_attempts: u32) -> Settings {
    Settings {
        reconnect_interval: interval_ms,
        max_reconnect_attempts: max_attempts,
        max_reconnect_delay: 30_000,
        ..Settings::default()
    }
}

fn reconnecting(attempt: u32, delay_ms: u64) -> ConnectionState {
    ConnectionState::Reconnecting {
        attempt,
        next_delay: Duration::from_millis(delay_ms),
    }
}

#[tokio::test(start_paused = true)]
async fn three_failed_retries_fail_until_manual_connect() {
    let transport = ScriptedTransport::new(vec![
        OpenStep::fail("connection refused"),
        OpenStep::fail("connection refused"),
        OpenStep::fail("connection refused"),
        OpenStep::fail("connection refused"),
    ]);
    let manager = ConnectionManager::new(
        transport.clone(),
        Arc::new(ConfigContext::from_settings(settings(1_000, 3))),
        Arc::new(SessionStore::in_memory()),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.on_state_change(move |state| sink.lock().expect("lock").push(state.clone()));

    let start = tokio::time::Instant::now();
    let err = manager.connect().await.expect_err("exhausted");
    let elapsed = start.elapsed();

    assert!(matches!(err, AssistantError::ReconnectExhausted { ref reason } if reason.contains("connection refused")));
    assert!(elapsed >= Duration::from_millis(7_000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(7_100), "{elapsed:?}");
    assert_eq!(transport.open_calls(), 4);

    let states = seen.lock().expect("lock").clone();
    assert_eq!(
        states[..4],
        [
            ConnectionState::Connecting,
            reconnecting(1, 1_000),
            reconnecting(2, 2_000),
            reconnecting(3, 4_000),
        ]
    );
    assert!(matches!(states[4], ConnectionState::Failed { .. }));
    assert_eq!(states.len(), 5);

    // Failed is terminal: nothing happens without a caller.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(matches!(manager.get_state(), ConnectionState::Failed { .. }));
    assert_eq!(transport.open_calls(), 4);

    manager.connect().await.expect("manual connect");
    assert_eq!(manager.get_state(), ConnectionState::Connected);
    assert_eq!(manager.attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped_by_max_delay() {
    let transport = ScriptedTransport::new(vec![OpenStep::fail("down"); 6]);
    let ctx = Arc::new(ConfigContext::from_settings(Settings {
        reconnect_interval: 1_000,
        max_reconnect_attempts: 10,
        max_reconnect_delay: 5_000,
        ..Settings::default()
    }));
    let manager = ConnectionManager::new(transport, ctx, Arc::new(SessionStore::in_memory()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.on_state_change(move |state| sink.lock().expect("lock").push(state.clone()));

    manager.connect().await.expect("connects on the seventh try");
    let delays: Vec<u64> = seen
        .lock()
        .expect("lock")
        .iter()
        .filter_map(|state| match state {
            ConnectionState::Reconnecting { next_delay, .. } => Some(next_delay.as_millis() as u64),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 5_000, 5_000, 5_000]);
}

#[tokio::test(start_paused = true)]
async fn new_connect_supersedes_a_pending_one() {
    let transport = ScriptedTransport::new(vec![OpenStep::Hang, OpenStep::Ok]);
    let manager = ConnectionManager::new(
        transport,
        Arc::new(ConfigContext::from_settings(settings(1_000, 3))),
        Arc::new(SessionStore::in_memory()),
    );

    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.connect().await
    };
    let (first, second) = tokio::join!(manager.connect(), second);
    assert!(matches!(first, Err(AssistantError::Cancelled)));
    second.expect("second connect");
    assert_eq!(manager.get_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn stored_session_is_presented_on_every_attempt() {
    let workspace = TestWorkspace::new().expect("workspace");
    let sessions = workspace.session_store().expect("store");
    sessions
        .set_session(&SessionUpdate {
            cookies: Some(BTreeMap::from([("sid".to_string(), "abc".to_string())])),
            csrf_token: Some("tok".to_string()),
            email: None,
        })
        .expect("set");

    let transport = ScriptedTransport::new(vec![OpenStep::fail("reset"), OpenStep::Ok]);
    let manager = ConnectionManager::new(transport.clone(), workspace.context(), sessions);
    manager.connect().await.expect("connect");

    let presented = transport.sessions();
    assert_eq!(presented.len(), 2);
    for session in presented {
        assert_eq!(session.csrf_token.as_deref(), Some("tok"));
        assert_eq!(session.cookie_header().as_deref(), Some("sid=abc"));
    }
}
