//! Executor abstraction for approved shell commands.
//!
//! The [`CommandExecutor`] trait decouples the gate from process spawning.
//! Tests use scripted executors that return predetermined outputs.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::error::AssistantError;
use crate::io::process::{ExecutionOutput, ProcessLimits, run_command_with_timeout};

/// Parameters for one approved execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The command exactly as proposed (not the normalized form).
    pub command: String,
    pub cwd: PathBuf,
    /// Hard wall-clock limit.
    pub timeout: Duration,
    pub kill_grace: Duration,
    pub output_limit_bytes: usize,
}

/// Abstraction over process-spawning backends.
pub trait CommandExecutor {
    /// Run the invocation. A timeout yields `ExecutionTimeout` carrying partial output.
    fn execute(&self, invocation: &Invocation) -> Result<ExecutionOutput, AssistantError>;
}

/// Executor that runs commands through `sh -c`.
pub struct ShellExecutor;

impl CommandExecutor for ShellExecutor {
    #[instrument(skip_all, fields(cwd = %invocation.cwd.display(), timeout_secs = invocation.timeout.as_secs()))]
    fn execute(&self, invocation: &Invocation) -> Result<ExecutionOutput, AssistantError> {
        info!(command = %invocation.command, "executing command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&invocation.command)
            .current_dir(&invocation.cwd);

        let output = run_command_with_timeout(
            cmd,
            ProcessLimits {
                timeout: invocation.timeout,
                kill_grace: invocation.kill_grace,
                output_limit_bytes: invocation.output_limit_bytes,
            },
        )?;

        let timed_out = output.timed_out;
        let output = output.into_execution_output();
        if timed_out {
            warn!(
                timeout_secs = invocation.timeout.as_secs(),
                "command exceeded its time limit"
            );
            return Err(AssistantError::ExecutionTimeout {
                timeout_secs: invocation.timeout.as_secs(),
                output,
            });
        }
        info!(exit_code = ?output.exit_code, "command finished");
        Ok(output)
    }
}
