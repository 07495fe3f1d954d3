//! Session credential model and merge rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Authenticated identity and credential material for the remote backend.
///
/// Absent fields are omitted when persisted, so a cleared session leaves no
/// trace in the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Session {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Fields to change on the current session. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    /// Replaces the whole cookie jar when present.
    pub cookies: Option<BTreeMap<String, String>>,
    pub csrf_token: Option<String>,
    pub email: Option<String>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.csrf_token.is_none() && self.email.is_none()
    }

    pub fn merged(&self, update: &SessionUpdate) -> Session {
        Session {
            cookies: update
                .cookies
                .clone()
                .unwrap_or_else(|| self.cookies.clone()),
            csrf_token: update
                .csrf_token
                .clone()
                .or_else(|| self.csrf_token.clone()),
            email: update.email.clone().or_else(|| self.email.clone()),
        }
    }

    /// `Cookie` header value in name order, or `None` without cookies.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
