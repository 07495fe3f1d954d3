//! Configuration context shared by the gate, the connection manager and the CLI.
//!
//! Readers take an `Arc` snapshot and never observe a partially applied
//! reload. [`ConfigContext::reload`] is the only way settings change at runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::core::connection::ReconnectPolicy;
use crate::core::guard::CommandPolicy;
use crate::error::AssistantError;
use crate::io::settings::{Settings, load_settings};

/// One immutable view of the settings.
///
/// An invalid settings file still produces a snapshot; every accessor then
/// returns `ConfigurationInvalid`, which the gate turns into a deny.
#[derive(Debug)]
pub struct ConfigSnapshot {
    /// Advances whenever the command rules change or the settings turn invalid.
    revision: u64,
    settings: Result<Settings, String>,
    policy: Result<CommandPolicy, String>,
}

impl ConfigSnapshot {
    fn build(previous: Option<&ConfigSnapshot>, loaded: anyhow::Result<Settings>) -> Self {
        let settings = loaded.map_err(|err| format!("{err:#}"));
        let policy = match &settings {
            Ok(settings) => settings
                .command_policy()
                .map_err(|err| format!("{err:#}")),
            Err(err) => Err(err.clone()),
        };
        let unchanged = matches!(
            (previous.map(|prev| &prev.policy), &policy),
            (Some(Ok(prev)), Ok(next)) if prev.same_rules(next)
        );
        let previous_revision = previous.map_or(0, |prev| prev.revision);
        let revision = if unchanged {
            previous_revision
        } else {
            previous_revision + 1
        };
        Self {
            revision,
            settings,
            policy: policy.map(|policy| policy.with_revision(revision)),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn settings(&self) -> Result<&Settings, AssistantError> {
        self.settings
            .as_ref()
            .map_err(|err| AssistantError::ConfigurationInvalid(err.clone()))
    }

    pub fn command_policy(&self) -> Result<&CommandPolicy, AssistantError> {
        self.policy
            .as_ref()
            .map_err(|err| AssistantError::ConfigurationInvalid(err.clone()))
    }

    pub fn reconnect_policy(&self) -> Result<ReconnectPolicy, AssistantError> {
        self.settings().map(Settings::reconnect_policy)
    }

    pub fn is_valid(&self) -> bool {
        self.settings.is_ok() && self.policy.is_ok()
    }
}

/// Holder of the current [`ConfigSnapshot`].
#[derive(Debug)]
pub struct ConfigContext {
    path: Option<PathBuf>,
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigContext {
    /// Load settings from `path`. A missing file yields defaults; an invalid
    /// file yields a fail-closed snapshot rather than an error.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = ConfigSnapshot::build(None, load_settings(&path));
        if let Err(err) = &snapshot.settings {
            warn!(path = %path.display(), error = %err, "settings invalid, denying all commands");
        }
        Self {
            path: Some(path),
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Context backed by in-memory settings only; [`reload`](Self::reload) is a no-op.
    pub fn from_settings(settings: Settings) -> Self {
        let loaded = settings.validate().map(|()| settings);
        Self {
            path: None,
            current: RwLock::new(Arc::new(ConfigSnapshot::build(None, loaded))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the settings file and swap the snapshot.
    ///
    /// The swap happens even when the new file is invalid, so a broken edit
    /// denies commands instead of silently keeping the old policy.
    pub fn reload(&self) -> Result<(), AssistantError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        self.swap(load_settings(path))
    }

    /// Swap in `settings` directly, validating them first.
    pub fn replace(&self, settings: Settings) -> Result<(), AssistantError> {
        let loaded = settings.validate().map(|()| settings);
        self.swap(loaded)
    }

    fn swap(&self, loaded: anyhow::Result<Settings>) -> Result<(), AssistantError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = ConfigSnapshot::build(Some(&**current), loaded);
        let result = match (&next.settings, &next.policy) {
            (Ok(_), Ok(policy)) => {
                info!(policy_revision = policy.revision, "settings reloaded");
                Ok(())
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "settings invalid, denying all commands");
                Err(AssistantError::ConfigurationInvalid(err.clone()))
            }
        };
        *current = Arc::new(next);
        result
    }
}
