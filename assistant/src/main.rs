//! Editor assistant CLI.
//!
//! Settings and the stored session live in `<root>/.assistant/settings.toml`.
//! Every command that executes something goes through the command gate.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use assistant::check::check_from_root;
use assistant::connect::{ConnectOptions, connect_from_root};
use assistant::core::connection::ConnectionState;
use assistant::core::guard::Outcome;
use assistant::core::session::SessionUpdate;
use assistant::error::AssistantError;
use assistant::execute::{exit_code, run_from_root};
use assistant::exit_codes;
use assistant::io::gate::{AutoConfirm, PromptConfirmer};
use assistant::io::init::{AssistantPaths, InitOptions, init_assistant};
use assistant::io::process::ExecutionOutput;
use assistant::io::prompt::render_for_root;
use assistant::io::session_store::SessionStore;
use assistant::logging;

#[derive(Parser)]
#[command(
    name = "assistant",
    version,
    about = "Command guard, backend session and prompt composition for an editor assistant"
)]
struct Cli {
    /// Project root containing `.assistant/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.assistant/settings.toml` and `.assistant/prompts/`.
    Init {
        /// Reset existing settings (a stored session is kept).
        #[arg(short, long)]
        force: bool,
    },
    /// Print the guard decision for a command without running it.
    Check {
        /// Print the decision as JSON.
        #[arg(long)]
        json: bool,
        /// Directory the command would run in (defaults to the root).
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Run a command through the guard, asking for confirmation on stdin.
    Run {
        /// Answer yes to the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
        /// Directory to run in (defaults to the root).
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the composed system prompt.
    Prompt {
        /// Working directory reported in the environment section.
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Inspect or change the stored backend session.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Connect to `serverUrl` and report connection state changes.
    Connect {
        /// Keep the connection until Ctrl-C, reloading settings on change.
        #[arg(long)]
        stay: bool,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print the stored session with cookie values and token redacted.
    Show,
    /// Merge the given fields into the stored session.
    Set {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        csrf_token: Option<String>,
        /// `name=value`; repeat for several cookies. Replaces the whole jar.
        #[arg(long = "cookie", value_parser = parse_cookie)]
        cookies: Vec<(String, String)>,
    },
    /// Remove every session field.
    Clear,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Check { json, cwd, command } => {
            cmd_check(&root, &command.join(" "), &resolve_cwd(&root, cwd), json)
        }
        Command::Run { yes, cwd, command } => {
            Ok(cmd_run(&root, &command.join(" "), &resolve_cwd(&root, cwd), yes))
        }
        Command::Prompt { cwd } => {
            print!("{}", render_for_root(&root, &resolve_cwd(&root, cwd))?);
            Ok(exit_codes::OK)
        }
        Command::Session { action } => cmd_session(&root, action),
        Command::Connect { stay } => cmd_connect(&root, stay),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_assistant(root, &InitOptions { force })?;
    println!("initialized {}", paths.assistant_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_check(root: &Path, command: &str, cwd: &Path, json: bool) -> Result<i32> {
    let report = check_from_root(root, command, cwd);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize check report")?
        );
    } else {
        let outcome = match report.decision.outcome {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
            Outcome::RequireConfirmation => "confirm",
        };
        match &report.decision.rule {
            Some(rule) => println!("{outcome}: {} (rule: {rule})", report.decision.reason),
            None => println!("{outcome}: {}", report.decision.reason),
        }
    }
    Ok(report.exit_code())
}

fn cmd_run(root: &Path, command: &str, cwd: &Path, yes: bool) -> i32 {
    let result = if yes {
        run_from_root(root, command, cwd, &AutoConfirm)
    } else {
        let confirmer = PromptConfirmer::new(std::io::stdin().lock(), std::io::stderr());
        run_from_root(root, command, cwd, &confirmer)
    };
    match &result {
        Ok(output) => print_output(output),
        Err(err @ AssistantError::ExecutionTimeout { output, .. }) => {
            print_output(output);
            eprintln!("{err}");
        }
        Err(err) => eprintln!("{err}"),
    }
    exit_code(&result)
}

fn print_output(output: &ExecutionOutput) {
    print!("{}", output.stdout);
    let _ = std::io::stdout().flush();
    eprint!("{}", output.stderr);
    eprint!("{}", output.truncated_notice());
}

fn cmd_session(root: &Path, action: SessionAction) -> Result<i32> {
    let paths = AssistantPaths::new(root);
    let store = SessionStore::open(&paths.settings_path)?;
    match action {
        SessionAction::Show => {
            let session = store.get_session();
            println!("email: {}", session.email.as_deref().unwrap_or("-"));
            println!(
                "csrf token: {}",
                if session.csrf_token.is_some() { "set" } else { "-" }
            );
            let names: Vec<&str> = session.cookies.keys().map(String::as_str).collect();
            println!(
                "cookies: {}",
                if names.is_empty() { "-".to_string() } else { names.join(", ") }
            );
        }
        SessionAction::Set {
            email,
            csrf_token,
            cookies,
        } => {
            let update = SessionUpdate {
                cookies: (!cookies.is_empty())
                    .then(|| cookies.into_iter().collect::<BTreeMap<_, _>>()),
                csrf_token,
                email,
            };
            store.set_session(&update)?;
            println!("session updated");
        }
        SessionAction::Clear => {
            store.clear_session()?;
            println!("session cleared");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_connect(root: &Path, stay: bool) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let state = runtime.block_on(connect_from_root(root, &ConnectOptions { stay }, shutdown))?;
    Ok(match state {
        ConnectionState::Failed { .. } => exit_codes::CONNECTION_FAILED,
        _ => exit_codes::OK,
    })
}

fn resolve_cwd(root: &Path, cwd: Option<PathBuf>) -> PathBuf {
    match cwd {
        Some(cwd) if cwd.is_absolute() => cwd,
        Some(cwd) => root.join(cwd),
        None => root.to_path_buf(),
    }
}

fn parse_cookie(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got `{raw}`")),
    }
}
