//! Command guard: a pure allow/deny/confirm decision for a proposed command.
//!
//! Evaluation order is fixed: empty check, deny-list, allow-list, confirmation,
//! shell-control check. Deny rules always win.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::command::{CommandPattern, has_shell_control, normalize, segments};

pub const EMPTY_COMMAND: &str = "empty command";
pub const DENIED_BY_POLICY: &str = "denied by policy";
pub const NOT_ALLOW_LISTED: &str = "not in allow-list";
pub const NEEDS_CONFIRMATION: &str = "requires user confirmation";
pub const SHELL_CONTROL: &str = "shell control characters require confirmation";
pub const ALLOWED: &str = "allowed by policy";
pub const CONFIRMED: &str = "confirmed by user";
pub const DECLINED: &str = "declined by user";

/// A proposed execution. Created per request and dropped once decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: PathBuf,
    pub requested_at: DateTime<Utc>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            requested_at: Utc::now(),
        }
    }
}

/// Immutable policy snapshot used for a single evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    /// Advances only when the rules change; confirmation tickets are bound to it.
    pub revision: u64,
    pub allowed: Vec<CommandPattern>,
    pub denied: Vec<CommandPattern>,
    pub require_confirmation: bool,
    pub execution_timeout_secs: u64,
}

impl CommandPolicy {
    /// Compile raw configuration entries into a policy at revision 0.
    pub fn new(
        allowed: &[String],
        denied: &[String],
        require_confirmation: bool,
        execution_timeout_secs: u64,
    ) -> Result<Self, String> {
        Ok(Self {
            revision: 0,
            allowed: compile(allowed)?,
            denied: compile(denied)?,
            require_confirmation,
            execution_timeout_secs,
        })
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// True if both policies would decide every request identically.
    pub fn same_rules(&self, other: &CommandPolicy) -> bool {
        self.allowed == other.allowed
            && self.denied == other.denied
            && self.require_confirmation == other.require_confirmation
            && self.execution_timeout_secs == other.execution_timeout_secs
    }
}

fn compile(entries: &[String]) -> Result<Vec<CommandPattern>, String> {
    entries
        .iter()
        .map(|entry| CommandPattern::parse(entry))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Deny,
    RequireConfirmation,
}

/// Proof that a `RequireConfirmation` was issued for a given command and
/// working directory under a given policy revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationTicket {
    command: String,
    cwd: PathBuf,
    policy_revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDecision {
    pub outcome: Outcome,
    pub reason: String,
    /// The policy entry responsible for a deny, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip)]
    pub ticket: Option<ConfirmationTicket>,
}

impl CommandDecision {
    pub fn allow(reason: &str) -> Self {
        Self {
            outcome: Outcome::Allow,
            reason: reason.to_string(),
            rule: None,
            ticket: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Deny,
            reason: reason.into(),
            rule: None,
            ticket: None,
        }
    }

    fn deny_by(reason: &str, rule: &CommandPattern) -> Self {
        Self {
            rule: Some(rule.to_string()),
            ..Self::deny(reason)
        }
    }

    fn confirm(command: String, cwd: PathBuf, policy: &CommandPolicy) -> Self {
        Self {
            outcome: Outcome::RequireConfirmation,
            reason: NEEDS_CONFIRMATION.to_string(),
            rule: None,
            ticket: Some(ConfirmationTicket {
                command,
                cwd,
                policy_revision: policy.revision,
            }),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }
}

/// Decide whether `request` may run under `policy`.
pub fn evaluate(request: &CommandRequest, policy: &CommandPolicy) -> CommandDecision {
    let normalized = normalize(&request.command);
    if normalized.is_empty() {
        return CommandDecision::deny(EMPTY_COMMAND);
    }

    if let Some(rule) = policy.denied.iter().find(|rule| rule.denies(&normalized)) {
        return CommandDecision::deny_by(DENIED_BY_POLICY, rule);
    }

    if !policy.allowed.is_empty() {
        let all_allowed = segments(&normalized)
            .iter()
            .all(|segment| policy.allowed.iter().any(|rule| rule.allows(segment)));
        if !all_allowed {
            return CommandDecision::deny(NOT_ALLOW_LISTED);
        }
    }

    if policy.require_confirmation {
        return CommandDecision::confirm(normalized, request.cwd.clone(), policy);
    }

    if has_shell_control(&normalized) {
        return CommandDecision::deny(SHELL_CONTROL);
    }

    CommandDecision::allow(ALLOWED)
}

/// Resolve a request the user affirmed after a `RequireConfirmation`.
///
/// While the ticket still matches the command, its working directory and the
/// policy revision, the deny/allow rules are not consulted again. Otherwise the request goes back
/// through [`evaluate`], which may ask for confirmation anew.
pub fn evaluate_affirmed(
    request: &CommandRequest,
    policy: &CommandPolicy,
    ticket: &ConfirmationTicket,
) -> CommandDecision {
    let normalized = normalize(&request.command);
    if !normalized.is_empty()
        && ticket.command == normalized
        && ticket.cwd == request.cwd
        && ticket.policy_revision == policy.revision
    {
        return CommandDecision::allow(CONFIRMED);
    }
    evaluate(request, policy)
}
