//! Session store persistence and atomicity tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use assistant::core::session::{Session, SessionUpdate};
use assistant::io::session_store::SessionStore;
use assistant::io::settings::{Settings, load_settings};
use assistant::test_support::TestWorkspace;

fn login(n: usize) -> SessionUpdate {
    SessionUpdate {
        cookies: Some(BTreeMap::from([("sid".to_string(), format!("sid-{n}"))])),
        csrf_token: Some(format!("csrf-{n}")),
        email: Some(format!("user{n}@example.com")),
    }
}

#[test]
fn session_at_startup_reflects_persisted_value() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace
        .session_store()
        .expect("store")
        .set_session(&login(1))
        .expect("set");

    let restarted = workspace.session_store().expect("store");
    assert_eq!(
        restarted.get_session(),
        Session::default().merged(&login(1))
    );
}

#[test]
fn clear_twice_equals_clear_once_and_survives_restart() {
    let workspace = TestWorkspace::new().expect("workspace");
    let store = workspace.session_store().expect("store");
    store.set_session(&login(1)).expect("set");

    store.clear_session().expect("clear");
    let after_once = store.get_session();
    store.clear_session().expect("clear again");
    assert_eq!(store.get_session(), after_once);
    assert!(after_once.is_empty());

    let restarted = workspace.session_store().expect("store");
    let session = restarted.get_session();
    assert!(session.cookies.is_empty());
    assert_eq!(session.csrf_token, None);
    assert_eq!(session.email, None);
}

#[test]
fn session_writes_leave_settings_untouched() {
    let workspace = TestWorkspace::new().expect("workspace");
    let settings = Settings {
        allowed_commands: vec!["git log".to_string(), "git diff".to_string()],
        ..Settings::default()
    };
    workspace.write_settings(&settings).expect("settings");

    let store = workspace.session_store().expect("store");
    store.set_session(&login(2)).expect("set");
    store.clear_session().expect("clear");

    assert_eq!(
        load_settings(&workspace.paths().settings_path).expect("load"),
        settings
    );
}

#[test]
fn readers_never_observe_a_mixed_session() {
    let store = Arc::new(SessionStore::in_memory());
    store.set_session(&login(0)).expect("set");

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for n in 1..200 {
                store.set_session(&login(n)).expect("set");
            }
        })
    };
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..500 {
                let session = store.get_session();
                let n = session
                    .csrf_token
                    .as_deref()
                    .and_then(|token| token.strip_prefix("csrf-"))
                    .expect("token")
                    .to_string();
                assert_eq!(session.email, Some(format!("user{n}@example.com")));
                assert_eq!(session.cookies.get("sid"), Some(&format!("sid-{n}")));
            }
        })
    };

    writer.join().expect("writer");
    reader.join().expect("reader");
}
