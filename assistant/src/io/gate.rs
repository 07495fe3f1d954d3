//! Command gate: policy decision, user confirmation and execution.
//!
//! The gate is the only path from a proposed command to the executor. It takes
//! one execution slot per request, so at most one command runs at a time.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, instrument, warn};

use crate::core::guard::{
    CommandDecision, CommandRequest, DECLINED, Outcome, evaluate, evaluate_affirmed,
};
use crate::error::AssistantError;
use crate::io::context::{ConfigContext, ConfigSnapshot};
use crate::io::executor::{CommandExecutor, Invocation};
use crate::io::process::ExecutionOutput;

/// The UI side of a `RequireConfirmation` decision.
pub trait Confirmer {
    /// Ask the user whether `request` may run. `false` declines it.
    fn confirm(&self, request: &CommandRequest, decision: &CommandDecision) -> bool;
}

/// Confirms everything; used for `run --yes`.
pub struct AutoConfirm;

impl Confirmer for AutoConfirm {
    fn confirm(&self, _request: &CommandRequest, _decision: &CommandDecision) -> bool {
        true
    }
}

/// Asks on a text stream and accepts `y` / `yes`.
pub struct PromptConfirmer<R, W> {
    io: Mutex<(R, W)>,
}

impl<R: BufRead, W: Write> PromptConfirmer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }
}

impl<R: BufRead, W: Write> Confirmer for PromptConfirmer<R, W> {
    fn confirm(&self, request: &CommandRequest, decision: &CommandDecision) -> bool {
        let mut io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let (input, output) = &mut *io;
        let asked = write!(
            output,
            "{}: `{}` in {}\nRun it? [y/N] ",
            decision.reason,
            printable(&request.command),
            printable(&request.cwd.display().to_string())
        )
        .and_then(|()| output.flush());
        if asked.is_err() {
            return false;
        }
        let mut line = String::new();
        if input.read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// Escape control characters so the terminal shows exactly what will run.
/// Newlines separate commands and stay as they are.
fn printable(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\n' => c.to_string(),
            c if c.is_control() => c.escape_default().to_string(),
            c => c.to_string(),
        })
        .collect()
}

/// Guard + confirmation + executor for a shared configuration context.
pub struct CommandGate<E> {
    ctx: Arc<ConfigContext>,
    executor: E,
    slot: Mutex<()>,
}

impl<E: CommandExecutor> CommandGate<E> {
    pub fn new(ctx: Arc<ConfigContext>, executor: E) -> Self {
        Self {
            ctx,
            executor,
            slot: Mutex::new(()),
        }
    }

    /// Produce the terminal decision (`Allow` or `Deny`) for `request`.
    pub fn decide<C: Confirmer + ?Sized>(
        &self,
        request: &CommandRequest,
        confirmer: &C,
    ) -> CommandDecision {
        self.resolve(request, confirmer).0
    }

    /// Decide, and on `Allow` execute with the snapshot the decision was made under.
    #[instrument(skip_all, fields(cwd = %request.cwd.display()))]
    pub fn run<C: Confirmer + ?Sized>(
        &self,
        request: &CommandRequest,
        confirmer: &C,
    ) -> Result<ExecutionOutput, AssistantError> {
        let _slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (decision, snapshot) = self.resolve(request, confirmer);
        if !decision.is_allowed() {
            return Err(AssistantError::PolicyViolation {
                reason: decision.reason,
            });
        }
        let invocation = invocation_for(request, &snapshot)?;
        self.executor.execute(&invocation)
    }

    fn resolve<C: Confirmer + ?Sized>(
        &self,
        request: &CommandRequest,
        confirmer: &C,
    ) -> (CommandDecision, Arc<ConfigSnapshot>) {
        let mut snapshot = self.ctx.snapshot();
        let mut decision = match snapshot.command_policy() {
            Ok(policy) => evaluate(request, policy),
            Err(err) => CommandDecision::deny(err.to_string()),
        };

        // A policy reload while the user was deciding can void the ticket and
        // ask again; every round either declines or re-checks the rules.
        while decision.outcome == Outcome::RequireConfirmation {
            let Some(ticket) = decision.ticket.clone() else {
                break;
            };
            if !confirmer.confirm(request, &decision) {
                decision = CommandDecision::deny(DECLINED);
                break;
            }
            snapshot = self.ctx.snapshot();
            decision = match snapshot.command_policy() {
                Ok(policy) => evaluate_affirmed(request, policy, &ticket),
                Err(err) => CommandDecision::deny(err.to_string()),
            };
        }

        if decision.outcome == Outcome::RequireConfirmation {
            decision = CommandDecision::deny(DECLINED);
        }
        match decision.outcome {
            Outcome::Allow => info!(command = %request.command, reason = %decision.reason, "command allowed"),
            _ => warn!(
                command = %request.command,
                reason = %decision.reason,
                rule = decision.rule.as_deref().unwrap_or("-"),
                "command denied"
            ),
        }
        (decision, snapshot)
    }
}

fn invocation_for(
    request: &CommandRequest,
    snapshot: &ConfigSnapshot,
) -> Result<Invocation, AssistantError> {
    let settings = snapshot.settings()?;
    let policy = snapshot.command_policy()?;
    Ok(Invocation {
        command: request.command.clone(),
        cwd: request.cwd.clone(),
        timeout: std::time::Duration::from_secs(policy.execution_timeout_secs),
        kill_grace: settings.kill_grace_period(),
        output_limit_bytes: settings.command_output_limit,
    })
}
