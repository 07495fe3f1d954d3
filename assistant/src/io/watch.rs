//! Reload settings when the settings file changes on disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::io::context::ConfigContext;

/// Keeps the poll watcher alive; dropping it stops reloading.
pub struct SettingsWatcher {
    _watcher: PollWatcher,
}

/// Watch the context's settings file and call [`ConfigContext::reload`] on change.
///
/// The parent directory is watched rather than the file itself, because
/// settings are replaced by rename and the file may not exist yet.
pub fn watch_settings(ctx: Arc<ConfigContext>, poll_interval: Duration) -> Result<SettingsWatcher> {
    let path = ctx
        .path()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("settings context has no backing file"))?;
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("settings path missing parent {}", path.display()))?;
    std::fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;

    let target = path.clone();
    let mut watcher = PollWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) if touches(&event, &target) => {
                debug!(kind = ?event.kind, "settings file changed");
                if let Err(err) = ctx.reload() {
                    warn!(error = %err, "settings reload left commands denied");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "settings watcher error"),
        },
        notify::Config::default()
            .with_poll_interval(poll_interval)
            .with_compare_contents(true),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching settings file");
    Ok(SettingsWatcher { _watcher: watcher })
}

fn touches(event: &Event, target: &Path) -> bool {
    !matches!(event.kind, EventKind::Access(_)) && event.paths.iter().any(|p| p == target)
}
