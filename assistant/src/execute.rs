//! Guarded execution for `assistant run`.

use std::path::Path;
use std::sync::Arc;

use crate::core::guard::CommandRequest;
use crate::error::AssistantError;
use crate::exit_codes;
use crate::io::context::ConfigContext;
use crate::io::executor::{CommandExecutor, ShellExecutor};
use crate::io::gate::{CommandGate, Confirmer};
use crate::io::init::AssistantPaths;
use crate::io::process::ExecutionOutput;

/// Run `command` in `cwd` through the gate configured under `root`.
pub fn run_from_root<C: Confirmer + ?Sized>(
    root: &Path,
    command: &str,
    cwd: &Path,
    confirmer: &C,
) -> Result<ExecutionOutput, AssistantError> {
    let paths = AssistantPaths::new(root);
    let ctx = Arc::new(ConfigContext::load(&paths.settings_path));
    run_with(ctx, ShellExecutor, command, cwd, confirmer)
}

pub fn run_with<E: CommandExecutor, C: Confirmer + ?Sized>(
    ctx: Arc<ConfigContext>,
    executor: E,
    command: &str,
    cwd: &Path,
    confirmer: &C,
) -> Result<ExecutionOutput, AssistantError> {
    CommandGate::new(ctx, executor).run(&CommandRequest::new(command, cwd), confirmer)
}

/// Process exit code for the outcome of a guarded run.
pub fn exit_code(result: &Result<ExecutionOutput, AssistantError>) -> i32 {
    match result {
        Ok(output) => output.exit_code.unwrap_or(exit_codes::SIGNALED),
        Err(AssistantError::PolicyViolation { .. }) => exit_codes::DENIED,
        Err(AssistantError::ExecutionTimeout { .. }) => exit_codes::TIMEOUT,
        Err(_) => exit_codes::INVALID,
    }
}
