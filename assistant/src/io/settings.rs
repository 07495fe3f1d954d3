//! Assistant settings stored in `.assistant/settings.toml`.
//!
//! Keys use the editor's camelCase names so the same file can be shared with
//! the extension host. The `[session]` table in the same file belongs to
//! [`SessionStore`](crate::io::session_store::SessionStore) and is ignored here.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::core::connection::ReconnectPolicy;
use crate::core::guard::CommandPolicy;

/// Settings file contents (TOML).
///
/// Missing fields default to conservative values: confirmation required and a
/// short list of destructive commands denied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Commands (or `/regex/` entries) that may run. Empty allows anything not denied.
    pub allowed_commands: Vec<String>,

    /// Commands (or `/regex/` entries) that never run.
    pub denied_commands: Vec<String>,

    /// Wall-clock limit for one command, in seconds.
    pub command_execution_timeout: u64,

    pub command_require_confirmation: bool,

    /// Time between SIGTERM and SIGKILL for a timed-out command, in milliseconds.
    pub command_kill_grace_period: u64,

    /// Keep at most this many bytes of stdout and of stderr per command.
    pub command_output_limit: usize,

    pub max_reconnect_attempts: u32,

    /// First reconnect delay in milliseconds; doubles per attempt.
    pub reconnect_interval: u64,

    /// Upper bound for a single reconnect delay, in milliseconds.
    pub max_reconnect_delay: u64,

    pub server_url: String,

    /// Path probed by `connect` to establish the session.
    pub health_path: String,

    /// Per-request HTTP timeout in seconds.
    pub request_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            denied_commands: ["rm -rf /", "sudo", "mkfs", "shutdown", "reboot", ":(){"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            command_execution_timeout: 60,
            command_require_confirmation: true,
            command_kill_grace_period: 2_000,
            command_output_limit: 100_000,
            max_reconnect_attempts: 5,
            reconnect_interval: 1_000,
            max_reconnect_delay: 30_000,
            server_url: "http://127.0.0.1:8000".to_string(),
            health_path: "/api/health".to_string(),
            request_timeout: 30,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.command_execution_timeout == 0 {
            return Err(anyhow!("commandExecutionTimeout must be > 0"));
        }
        if self.command_output_limit == 0 {
            return Err(anyhow!("commandOutputLimit must be > 0"));
        }
        if self.reconnect_interval == 0 {
            return Err(anyhow!("reconnectInterval must be > 0"));
        }
        if self.max_reconnect_delay < self.reconnect_interval {
            return Err(anyhow!("maxReconnectDelay must be >= reconnectInterval"));
        }
        if self.request_timeout == 0 {
            return Err(anyhow!("requestTimeout must be > 0"));
        }
        Url::parse(&self.server_url)
            .with_context(|| format!("serverUrl is not a valid URL: {}", self.server_url))?;
        if !self.health_path.starts_with('/') {
            return Err(anyhow!("healthPath must start with '/'"));
        }
        self.command_policy()?;
        Ok(())
    }

    /// Compile the command policy (revision 0).
    pub fn command_policy(&self) -> Result<CommandPolicy> {
        CommandPolicy::new(
            &self.allowed_commands,
            &self.denied_commands,
            self.command_require_confirmation,
            self.command_execution_timeout,
        )
        .map_err(|err| anyhow!("command policy: {err}"))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: Duration::from_millis(self.reconnect_interval),
            max_attempts: self.max_reconnect_attempts,
            max_delay: Duration::from_millis(self.max_reconnect_delay),
        }
    }

    pub fn kill_grace_period(&self) -> Duration {
        Duration::from_millis(self.command_kill_grace_period)
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("settings path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp settings {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace settings {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        let settings = Settings {
            allowed_commands: vec!["git log".to_string(), "/^cargo test/".to_string()],
            command_require_confirmation: false,
            ..Settings::default()
        };
        write_settings(&path, &settings).expect("write");
        assert_eq!(load_settings(&path).expect("load"), settings);
    }

    #[test]
    fn reads_camel_case_keys_and_defaults_the_rest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        fs::write(
            &path,
            "allowedCommands = [\"git log\"]\nmaxReconnectAttempts = 3\nreconnectInterval = 1000\n",
        )
        .expect("write");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.allowed_commands, vec!["git log"]);
        assert_eq!(settings.max_reconnect_attempts, 3);
        assert_eq!(
            settings.command_execution_timeout,
            Settings::default().command_execution_timeout
        );
    }

    #[test]
    fn session_table_is_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        fs::write(&path, "serverUrl = \"https://example.com\"\n\n[session]\nemail = \"a@b.c\"\n")
            .expect("write");
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.server_url, "https://example.com");
    }

    #[test]
    fn malformed_pattern_fails_validation() {
        let settings = Settings {
            denied_commands: vec!["/([/".to_string()],
            ..Settings::default()
        };
        let err = settings.validate().expect_err("invalid");
        assert!(err.to_string().contains("command policy"));
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let settings = Settings {
            command_execution_timeout: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
