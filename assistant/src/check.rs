//! Policy check for `assistant check`: decide without executing.

use std::path::Path;

use serde::Serialize;

use crate::core::command::normalize;
use crate::core::guard::{CommandDecision, CommandRequest, Outcome, evaluate};
use crate::exit_codes;
use crate::io::context::ConfigContext;
use crate::io::init::AssistantPaths;

/// Decision for one command plus the policy revision it was made under.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub command: String,
    pub normalized: String,
    #[serde(flatten)]
    pub decision: CommandDecision,
    /// `None` when the configuration is invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_revision: Option<u64>,
}

impl CheckReport {
    pub fn exit_code(&self) -> i32 {
        match self.decision.outcome {
            Outcome::Allow => exit_codes::OK,
            Outcome::Deny => exit_codes::DENIED,
            Outcome::RequireConfirmation => exit_codes::NEEDS_CONFIRMATION,
        }
    }
}

/// Evaluate `request` against the current snapshot of `ctx`.
pub fn check_command(ctx: &ConfigContext, request: &CommandRequest) -> CheckReport {
    let snapshot = ctx.snapshot();
    let (decision, policy_revision) = match snapshot.command_policy() {
        Ok(policy) => (evaluate(request, policy), Some(policy.revision)),
        Err(err) => (CommandDecision::deny(err.to_string()), None),
    };
    CheckReport {
        command: request.command.clone(),
        normalized: normalize(&request.command),
        decision,
        policy_revision,
    }
}

/// Load settings under `root` and check `command` as if proposed in `cwd`.
pub fn check_from_root(root: &Path, command: &str, cwd: &Path) -> CheckReport {
    let paths = AssistantPaths::new(root);
    let ctx = ConfigContext::load(&paths.settings_path);
    check_command(&ctx, &CommandRequest::new(command, cwd))
}
