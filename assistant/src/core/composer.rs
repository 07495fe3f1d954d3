//! Deterministic prompt composition from prioritized modules.
//!
//! Output order depends only on the module list: sections follow
//! [`Section::ORDER`], modules inside a section follow ascending priority with
//! registration order breaking ties.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    System,
    Reasoning,
    Rules,
    Workflow,
    Tools,
    Environment,
}

impl Section {
    /// Emission order of sections in a composed prompt.
    pub const ORDER: [Section; 6] = [
        Section::System,
        Section::Reasoning,
        Section::Rules,
        Section::Workflow,
        Section::Tools,
        Section::Environment,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Section::System => "system",
            Section::Reasoning => "reasoning",
            Section::Rules => "rules",
            Section::Workflow => "workflow",
            Section::Tools => "tools",
            Section::Environment => "environment",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// An instruction fragment targeted at one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptModule {
    /// Where the module came from (file stem or builtin name), for diagnostics.
    pub name: String,
    pub section: Section,
    pub priority: i32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedSection {
    pub section: Section,
    /// Module contents in emission order.
    pub parts: Vec<String>,
}

impl ComposedSection {
    pub fn content(&self) -> String {
        self.parts.join("\n\n")
    }
}

/// Ordered, non-empty sections ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedPrompt {
    pub sections: Vec<ComposedSection>,
}

impl ComposedPrompt {
    pub fn section(&self, section: Section) -> Option<&ComposedSection> {
        self.sections.iter().find(|s| s.section == section)
    }
}

/// Group `modules` (given in registration order) into the composed prompt.
pub fn compose(modules: &[PromptModule]) -> ComposedPrompt {
    let sections = Section::ORDER
        .iter()
        .filter_map(|&section| {
            let mut members: Vec<&PromptModule> =
                modules.iter().filter(|m| m.section == section).collect();
            if members.is_empty() {
                return None;
            }
            // `sort_by_key` is stable, so equal priorities keep registration order.
            members.sort_by_key(|m| m.priority);
            Some(ComposedSection {
                section,
                parts: members.iter().map(|m| m.content.clone()).collect(),
            })
        })
        .collect();
    ComposedPrompt { sections }
}
