//! Backend connection for `assistant connect`.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::connection::ConnectionState;
use crate::error::AssistantError;
use crate::io::connection::ConnectionManager;
use crate::io::context::ConfigContext;
use crate::io::init::AssistantPaths;
use crate::io::session_store::SessionStore;
use crate::io::transport::{ReloadingTransport, Transport};
use crate::io::watch::watch_settings;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const SETTINGS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Options for `connect_from_root`.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Keep the connection (with heartbeats and settings reload) until `shutdown`.
    pub stay: bool,
}

/// Connect to the configured backend and return the final state.
///
/// Every transition is printed to stdout as it happens.
pub async fn connect_from_root(
    root: &Path,
    options: &ConnectOptions,
    shutdown: impl Future<Output = ()>,
) -> Result<ConnectionState> {
    let paths = AssistantPaths::new(root);
    let ctx = Arc::new(ConfigContext::load(&paths.settings_path));
    let transport = ReloadingTransport::new(Arc::clone(&ctx))?;
    let sessions = Arc::new(
        SessionStore::open(&paths.settings_path).context("open session store")?,
    );
    let manager = ConnectionManager::new(transport, Arc::clone(&ctx), sessions);
    manager.on_state_change(|state| println!("connection: {state}"));

    let _watcher = if options.stay {
        Some(watch_settings(Arc::clone(&ctx), SETTINGS_POLL_INTERVAL)?)
    } else {
        None
    };
    hold(&manager, options, shutdown).await;
    Ok(manager.get_state())
}

/// Connect, then (with `stay`) heartbeat until `shutdown` or a terminal failure.
pub async fn hold<T: Transport>(
    manager: &ConnectionManager<T>,
    options: &ConnectOptions,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    tokio::select! {
        result = manager.connect() => {
            if let Err(err) = result {
                warn!(error = %err, "connect failed");
                return;
            }
        }
        () = &mut shutdown => {
            manager.disconnect();
            return;
        }
    }
    if !options.stay {
        return;
    }

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested");
                manager.disconnect();
                return;
            }
            () = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                match manager.probe().await {
                    Ok(()) => {}
                    Err(AssistantError::NotConnected) => return,
                    Err(err) => {
                        warn!(error = %err, "connection lost");
                        return;
                    }
                }
            }
        }
    }
}
