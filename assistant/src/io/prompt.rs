//! Prompt module registry and rendering of the composed prompt.
//!
//! Modules are markdown files with a TOML front matter block between `+++`
//! lines. Built-in modules are embedded; user modules come from
//! `.assistant/prompts/*.md` and are registered after them in file-name order.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::composer::{ComposedPrompt, PromptModule, Section, compose};
use crate::io::init::AssistantPaths;

const BUILTIN_MODULES: [(&str, &str); 5] = [
    ("system", include_str!("prompts/system.md")),
    ("reasoning", include_str!("prompts/reasoning.md")),
    ("rules", include_str!("prompts/rules.md")),
    ("workflow", include_str!("prompts/workflow.md")),
    ("tools", include_str!("prompts/tools.md")),
];
const DOCUMENT_TEMPLATE: &str = include_str!("prompts/document.md");

const FENCE: &str = "+++";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FrontMatter {
    section: Section,
    #[serde(default)]
    priority: i32,
}

/// Parse one module file. `name` is only used in diagnostics.
pub fn parse_module(name: &str, source: &str) -> Result<PromptModule> {
    let source = source.trim_start_matches('\u{feff}');
    let mut lines = source.split_inclusive('\n');
    if lines.next().map(str::trim_end) != Some(FENCE) {
        bail!("prompt module {name}: missing `{FENCE}` front matter");
    }

    let mut header = String::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line.trim_end() == FENCE {
            closed = true;
            break;
        }
        header.push_str(line);
    }
    if !closed {
        bail!("prompt module {name}: unterminated front matter");
    }
    let front: FrontMatter = toml::from_str(&header)
        .with_context(|| format!("prompt module {name}: parse front matter"))?;
    let content: String = lines.collect();

    Ok(PromptModule {
        name: name.to_string(),
        section: front.section,
        priority: front.priority,
        content: content.trim().to_string(),
    })
}

/// Collects modules during startup. [`build`](Self::build) freezes the set.
#[derive(Debug, Default)]
pub struct PromptRegistryBuilder {
    modules: Vec<PromptModule>,
}

impl PromptRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the embedded modules.
    pub fn with_builtins(mut self) -> Result<Self> {
        for (name, source) in BUILTIN_MODULES {
            self.register(parse_module(name, source)?);
        }
        Ok(self)
    }

    pub fn register(&mut self, module: PromptModule) {
        debug!(name = %module.name, section = %module.section, priority = module.priority, "prompt module registered");
        self.modules.push(module);
    }

    /// Register every `*.md` file in `dir`, sorted by file name. A missing
    /// directory registers nothing.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry
                .with_context(|| format!("read entry in {}", dir.display()))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in &paths {
            let source =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.register(parse_module(&name, &source)?);
        }
        Ok(paths.len())
    }

    pub fn build(self) -> PromptRegistry {
        PromptRegistry {
            modules: self.modules,
        }
    }
}

/// Frozen, append-only set of modules in registration order.
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    modules: Vec<PromptModule>,
}

impl PromptRegistry {
    pub fn modules(&self) -> &[PromptModule] {
        &self.modules
    }

    /// Compose a fresh prompt, optionally with per-task `extra` modules
    /// registered after everything else.
    pub fn compose_with(&self, extra: &[PromptModule]) -> ComposedPrompt {
        let mut modules = self.modules.clone();
        modules.extend_from_slice(extra);
        compose(&modules)
    }
}

/// Module describing where the assistant is running.
pub fn environment_module(cwd: &Path) -> PromptModule {
    PromptModule {
        name: "environment".to_string(),
        section: Section::Environment,
        priority: 0,
        content: format!(
            "Working directory: {}\nOperating system: {} ({})\nCommands run with: sh -c",
            cwd.display(),
            std::env::consts::OS,
            std::env::consts::ARCH
        ),
    }
}

/// Compose and render the prompt for a project root: built-ins, the
/// project's `.assistant/prompts/` modules, then the environment module.
pub fn render_for_root(root: &Path, cwd: &Path) -> Result<String> {
    let paths = AssistantPaths::new(root);
    let mut builder = PromptRegistryBuilder::new().with_builtins()?;
    builder.load_dir(&paths.prompts_dir)?;
    let registry = builder.build();
    render(&registry.compose_with(&[environment_module(cwd)]))
}

#[derive(Serialize)]
struct SectionContext {
    key: &'static str,
    content: String,
}

/// Render the composed prompt as text, one XML-tagged block per section.
pub fn render(prompt: &ComposedPrompt) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("document", DOCUMENT_TEMPLATE)
        .context("load prompt document template")?;
    let sections: Vec<SectionContext> = prompt
        .sections
        .iter()
        .map(|section| SectionContext {
            key: section.section.key(),
            content: section.content(),
        })
        .collect();
    let rendered = env
        .get_template("document")?
        .render(context! { sections => sections })
        .context("render prompt document")?;
    let mut out = rendered.trim().to_string();
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_front_matter_and_trims_body() {
        let module = parse_module(
            "style",
            "+++\nsection = \"rules\"\npriority = -5\n+++\n\nUse tabs.\n",
        )
        .expect("parse");
        assert_eq!(module.section, Section::Rules);
        assert_eq!(module.priority, -5);
        assert_eq!(module.content, "Use tabs.");
    }

    #[test]
    fn priority_defaults_to_zero() {
        let module =
            parse_module("x", "+++\nsection = \"tools\"\n+++\nbody\n").expect("parse");
        assert_eq!(module.priority, 0);
    }

    #[test]
    fn rejects_missing_or_unknown_front_matter() {
        assert!(parse_module("x", "no header").is_err());
        assert!(parse_module("x", "+++\nsection = \"rules\"\nbody").is_err());
        assert!(parse_module("x", "+++\nsection = \"styling\"\n+++\nbody").is_err());
    }

    #[test]
    fn builtins_cover_every_section_but_environment() {
        let registry = PromptRegistryBuilder::new()
            .with_builtins()
            .expect("builtins")
            .build();
        let prompt = registry.compose_with(&[]);
        let sections: Vec<Section> = prompt.sections.iter().map(|s| s.section).collect();
        assert_eq!(sections, Section::ORDER[..5].to_vec());
    }

    #[test]
    fn user_modules_load_in_file_name_order_after_builtins() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("b.md"),
            "+++\nsection = \"rules\"\n+++\nsecond",
        )
        .expect("write");
        fs::write(
            temp.path().join("a.md"),
            "+++\nsection = \"rules\"\n+++\nfirst",
        )
        .expect("write");
        fs::write(temp.path().join("notes.txt"), "ignored").expect("write");

        let mut builder = PromptRegistryBuilder::new().with_builtins().expect("builtins");
        assert_eq!(builder.load_dir(temp.path()).expect("load"), 2);
        let prompt = builder.build().compose_with(&[]);
        let rules = prompt.section(Section::Rules).expect("rules");
        assert_eq!(rules.parts.len(), 3);
        assert_eq!(rules.parts[1], "first");
        assert_eq!(rules.parts[2], "second");
    }

    #[test]
    fn render_wraps_sections_in_tags_in_order() {
        let registry = PromptRegistryBuilder::new()
            .with_builtins()
            .expect("builtins")
            .build();
        let prompt = registry.compose_with(&[environment_module(Path::new("/work"))]);
        let text = render(&prompt).expect("render");

        let system = text.find("<system>").expect("system");
        let tools = text.find("<tools>").expect("tools");
        let env = text.find("<environment>").expect("environment");
        assert!(system < tools && tools < env);
        assert!(text.contains("Working directory: /work"));
        assert!(text.contains("</system>\n\n<reasoning>"));
    }

    #[test]
    fn render_omits_empty_sections() {
        let prompt = compose(&[PromptModule {
            name: "only".to_string(),
            section: Section::Workflow,
            priority: 0,
            content: "step".to_string(),
        }]);
        assert_eq!(
            render(&prompt).expect("render"),
            "<workflow>\nstep\n</workflow>\n"
        );
    }
}
