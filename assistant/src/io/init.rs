//! Initialization helpers for `.assistant/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::session_store::{load_session, write_session};
use super::settings::{Settings, write_settings};

/// All canonical paths within `.assistant/` for a project root.
#[derive(Debug, Clone)]
pub struct AssistantPaths {
    pub root: PathBuf,
    pub assistant_dir: PathBuf,
    pub settings_path: PathBuf,
    pub prompts_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl AssistantPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let assistant_dir = root.join(".assistant");
        Self {
            root,
            settings_path: assistant_dir.join("settings.toml"),
            prompts_dir: assistant_dir.join("prompts"),
            gitignore_path: assistant_dir.join(".gitignore"),
            assistant_dir,
        }
    }
}

/// Options for `init_assistant`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, reset settings and placeholders. A stored session is kept.
    pub force: bool,
}

/// Create `.assistant/` scaffolding in `root`.
///
/// Fails if `.assistant/` already exists unless `options.force` is set.
pub fn init_assistant(root: &Path, options: &InitOptions) -> Result<AssistantPaths> {
    let paths = AssistantPaths::new(root);
    if paths.assistant_dir.exists() && !paths.assistant_dir.is_dir() {
        return Err(anyhow!("init: .assistant exists but is not a directory"));
    }
    if paths.assistant_dir.exists() && !options.force {
        return Err(anyhow!(
            "init: .assistant already exists (use --force to overwrite)"
        ));
    }

    let session = load_session(&paths.settings_path)?;
    create_dir(&paths.prompts_dir)?;
    write_settings(&paths.settings_path, &Settings::default())?;
    if !session.is_empty() {
        write_session(&paths.settings_path, &session)?;
    }
    write_file(&paths.gitignore_path, ASSISTANT_GITIGNORE)?;
    write_file(&paths.prompts_dir.join(PROJECT_MODULE_NAME), PROJECT_MODULE)?;

    info!(root = %paths.root.display(), force = options.force, "assistant initialized");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

// The settings file holds session cookies once logged in.
const ASSISTANT_GITIGNORE: &str = "settings.toml\n*.tmp\n";
const PROJECT_MODULE_NAME: &str = "project.md";
const PROJECT_MODULE: &str = "+++\nsection = \"rules\"\npriority = 100\n+++\nProject conventions: none recorded yet.\n";
