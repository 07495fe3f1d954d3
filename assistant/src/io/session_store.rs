//! Session persistence in the `[session]` table of the settings file.
//!
//! The rest of the file is preserved on every write; only the session table is
//! replaced (or removed when the session is cleared).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::session::{Session, SessionUpdate};
use crate::io::settings::write_atomic;

const SESSION_KEY: &str = "session";

/// Process-wide owner of the [`Session`].
///
/// Writes go to disk first and are then published in one swap, so readers
/// see either the old or the new session, never a mix.
#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<Session>>,
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Open the store backed by `path`, reading any persisted session.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let session = load_session(&path)?;
        debug!(path = %path.display(), empty = session.is_empty(), "session loaded");
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(session)),
            write_lock: Mutex::new(()),
        })
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(Session::default())),
            write_lock: Mutex::new(()),
        }
    }

    pub fn get_session(&self) -> Session {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .clone()
    }

    /// Merge `update` into the current session and persist the result.
    pub fn set_session(&self, update: &SessionUpdate) -> Result<Session> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let next = self.get_session().merged(update);
        self.publish(next.clone())?;
        info!(
            email = next.email.as_deref().unwrap_or("-"),
            cookies = next.cookies.len(),
            "session updated"
        );
        Ok(next)
    }

    /// Reset every field to absent. Clearing an empty session succeeds.
    pub fn clear_session(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.publish(Session::default())?;
        info!("session cleared");
        Ok(())
    }

    fn publish(&self, session: Session) -> Result<()> {
        if let Some(path) = &self.path {
            write_session(path, &session)?;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(session);
        Ok(())
    }
}

/// Read the `[session]` table from `path`; a missing file or table is an empty session.
pub fn load_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        return Ok(Session::default());
    }
    let table = read_table(path)?;
    match table.get(SESSION_KEY) {
        Some(value) => value
            .clone()
            .try_into::<Session>()
            .with_context(|| format!("parse [session] in {}", path.display())),
        None => Ok(Session::default()),
    }
}

/// Replace the `[session]` table in `path`, keeping every other key.
pub fn write_session(path: &Path, session: &Session) -> Result<()> {
    let mut table = if path.exists() {
        read_table(path)?
    } else {
        toml::Table::new()
    };
    if session.is_empty() {
        table.remove(SESSION_KEY);
    } else {
        let value = toml::Value::try_from(session).context("serialize session")?;
        table.insert(SESSION_KEY.to_string(), value);
    }
    let mut buf = toml::to_string_pretty(&table).context("serialize settings toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    write_atomic(path, &buf)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
