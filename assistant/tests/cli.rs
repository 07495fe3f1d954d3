//! CLI tests that spawn the assistant binary and check exit codes and output.

use std::process::{Command, Output};

use assistant::exit_codes;
use assistant::io::settings::Settings;
use assistant::test_support::TestWorkspace;

fn assistant(workspace: &TestWorkspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_assistant"))
        .arg("--root")
        .arg(workspace.path())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn assistant")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn scenario_workspace() -> TestWorkspace {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace
        .write_settings(&Settings {
            allowed_commands: vec!["git log".to_string(), "git diff".to_string()],
            denied_commands: vec!["rm -rf".to_string()],
            command_require_confirmation: false,
            ..Settings::default()
        })
        .expect("settings");
    workspace
}

#[test]
fn check_exit_codes_follow_the_decision() {
    let workspace = scenario_workspace();

    let denied = assistant(&workspace, &["check", "rm", "-rf", "/"]);
    assert_eq!(denied.status.code(), Some(exit_codes::DENIED));
    assert!(stdout(&denied).contains("denied by policy"));

    let allowed = assistant(&workspace, &["check", "git", "log"]);
    assert_eq!(allowed.status.code(), Some(exit_codes::OK));

    let unlisted = assistant(&workspace, &["check", "ls", "-la"]);
    assert_eq!(unlisted.status.code(), Some(exit_codes::DENIED));
    assert!(stdout(&unlisted).contains("not in allow-list"));
}

#[test]
fn check_json_reports_confirmation() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = assistant(&workspace, &["check", "--json", "make", "build"]);
    assert_eq!(output.status.code(), Some(exit_codes::NEEDS_CONFIRMATION));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["outcome"], "require_confirmation");
    assert_eq!(report["normalized"], "make build");
}

#[cfg(unix)]
#[test]
fn run_passes_through_the_child_exit_code() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = assistant(&workspace, &["run", "--yes", "echo", "hello;", "exit", "7"]);
    assert_eq!(output.status.code(), Some(7));
    assert_eq!(stdout(&output), "hello\n");
}

#[cfg(unix)]
#[test]
fn run_declined_on_empty_stdin() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = assistant(&workspace, &["run", "echo", "never"]);
    assert_eq!(output.status.code(), Some(exit_codes::DENIED));
    assert!(!stdout(&output).contains("never"));
}

#[test]
fn session_set_show_clear() {
    let workspace = TestWorkspace::new().expect("workspace");

    let set = assistant(
        &workspace,
        &[
            "session",
            "set",
            "--email",
            "dev@example.com",
            "--csrf-token",
            "tok",
            "--cookie",
            "sid=abc",
        ],
    );
    assert_eq!(set.status.code(), Some(exit_codes::OK));

    let shown = stdout(&assistant(&workspace, &["session", "show"]));
    assert!(shown.contains("email: dev@example.com"));
    assert!(shown.contains("cookies: sid"));
    assert!(!shown.contains("abc"), "cookie values are redacted");

    assert_eq!(
        assistant(&workspace, &["session", "clear"]).status.code(),
        Some(exit_codes::OK)
    );
    let shown = stdout(&assistant(&workspace, &["session", "show"]));
    assert!(shown.contains("email: -"));
    assert!(shown.contains("cookies: -"));
}

#[test]
fn prompt_prints_tagged_sections() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = assistant(&workspace, &["prompt"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    assert!(text.starts_with("<system>"));
    assert!(text.contains("Project conventions"));
    assert!(text.contains("<environment>"));
}

#[test]
fn invalid_settings_fail_closed() {
    let workspace = TestWorkspace::new().expect("workspace");
    std::fs::write(&workspace.paths().settings_path, "allowedCommands = 3\n").expect("write");
    let output = assistant(&workspace, &["check", "ls"]);
    assert_eq!(output.status.code(), Some(exit_codes::DENIED));
    assert!(stdout(&output).contains("configuration invalid"));
}
