//! Test-only helpers: a scratch workspace and scripted collaborators.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::Value;

use crate::core::guard::{CommandDecision, CommandRequest};
use crate::core::session::Session;
use crate::error::AssistantError;
use crate::io::context::ConfigContext;
use crate::io::executor::{CommandExecutor, Invocation};
use crate::io::gate::Confirmer;
use crate::io::init::{AssistantPaths, InitOptions, init_assistant};
use crate::io::process::ExecutionOutput;
use crate::io::session_store::SessionStore;
use crate::io::settings::{Settings, write_settings};
use crate::io::transport::Transport;

/// Temporary project root with an initialized `.assistant/` directory.
pub struct TestWorkspace {
    temp: tempfile::TempDir,
    paths: AssistantPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_assistant(temp.path(), &InitOptions { force: false })?;
        Ok(Self { temp, paths })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &AssistantPaths {
        &self.paths
    }

    pub fn write_settings(&self, settings: &Settings) -> Result<()> {
        write_settings(&self.paths.settings_path, settings)
    }

    pub fn context(&self) -> Arc<ConfigContext> {
        Arc::new(ConfigContext::load(&self.paths.settings_path))
    }

    pub fn session_store(&self) -> Result<Arc<SessionStore>> {
        Ok(Arc::new(SessionStore::open(&self.paths.settings_path)?))
    }
}

/// What a [`ScriptedExecutor`] returns for every invocation.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Exit { code: i32, stdout: String },
    Timeout { partial_stdout: String },
}

/// Executor that records invocations instead of spawning processes.
#[derive(Debug, Clone)]
pub struct ScriptedExecutor {
    run: ScriptedRun,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedExecutor {
    pub fn new(run: ScriptedRun) -> Self {
        Self {
            run,
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding(stdout: &str) -> Self {
        Self::new(ScriptedRun::Exit {
            code: 0,
            stdout: stdout.to_string(),
        })
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().expect("invocations lock").clone()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, invocation: &Invocation) -> Result<ExecutionOutput, AssistantError> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(invocation.clone());
        let output = |exit_code, stdout: &str| ExecutionOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
        };
        match &self.run {
            ScriptedRun::Exit { code, stdout } => Ok(output(Some(*code), stdout)),
            ScriptedRun::Timeout { partial_stdout } => Err(AssistantError::ExecutionTimeout {
                timeout_secs: invocation.timeout.as_secs(),
                output: output(None, partial_stdout),
            }),
        }
    }
}

/// Confirmer answering from a list; declines once the list runs out.
#[derive(Debug)]
pub struct ScriptedConfirmer {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedConfirmer {
    pub fn new(answers: Vec<bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.lock().expect("asked lock").len()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, request: &CommandRequest, _decision: &CommandDecision) -> bool {
        self.asked
            .lock()
            .expect("asked lock")
            .push(request.command.clone());
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or(false)
    }
}

/// Result of one scripted `Transport::open`.
#[derive(Debug, Clone)]
pub enum OpenStep {
    Ok,
    Fail(String),
    Expired(String),
    /// Never completes; used to test cancellation of an in-flight attempt.
    Hang,
}

impl OpenStep {
    pub fn fail(reason: &str) -> Self {
        Self::Fail(reason.to_string())
    }

    pub fn expired(reason: &str) -> Self {
        Self::Expired(reason.to_string())
    }
}

/// Result of one scripted `Transport::send`.
#[derive(Debug, Clone)]
pub enum SendStep {
    Reply(Value),
    Fail(String),
    Expired(String),
}

#[derive(Debug, Default)]
struct TransportScript {
    open: VecDeque<OpenStep>,
    send: VecDeque<SendStep>,
    open_calls: usize,
    sessions: Vec<Session>,
}

/// Transport playing back scripted results. Once a script runs out, `open`
/// succeeds and `send` replies `null`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<TransportScript>>,
}

impl ScriptedTransport {
    pub fn new(open: Vec<OpenStep>) -> Self {
        Self {
            script: Arc::new(Mutex::new(TransportScript {
                open: open.into(),
                ..TransportScript::default()
            })),
        }
    }

    pub fn with_send_steps(self, steps: Vec<SendStep>) -> Self {
        self.script.lock().expect("script lock").send = steps.into();
        self
    }

    pub fn open_calls(&self) -> usize {
        self.script.lock().expect("script lock").open_calls
    }

    /// Sessions passed to `open` and `send`, in call order.
    pub fn sessions(&self) -> Vec<Session> {
        self.script.lock().expect("script lock").sessions.clone()
    }
}

impl Transport for ScriptedTransport {
    async fn open(&self, session: &Session) -> Result<(), AssistantError> {
        let step = {
            let mut script = self.script.lock().expect("script lock");
            script.open_calls += 1;
            script.sessions.push(session.clone());
            script.open.pop_front().unwrap_or(OpenStep::Ok)
        };
        match step {
            OpenStep::Ok => Ok(()),
            OpenStep::Fail(reason) => Err(AssistantError::TransportFailure(reason)),
            OpenStep::Expired(reason) => Err(AssistantError::AuthenticationExpired(reason)),
            OpenStep::Hang => std::future::pending().await,
        }
    }

    async fn send(&self, session: &Session, _path: &str, _body: &Value) -> Result<Value, AssistantError> {
        let step = {
            let mut script = self.script.lock().expect("script lock");
            script.sessions.push(session.clone());
            script.send.pop_front().unwrap_or(SendStep::Reply(Value::Null))
        };
        match step {
            SendStep::Reply(value) => Ok(value),
            SendStep::Fail(reason) => Err(AssistantError::TransportFailure(reason)),
            SendStep::Expired(reason) => Err(AssistantError::AuthenticationExpired(reason)),
        }
    }
}
