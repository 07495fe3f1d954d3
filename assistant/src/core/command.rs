//! Command string normalization and policy pattern matching.
//!
//! Matching runs on the normalized form only; the executor always receives the
//! command exactly as proposed.

use std::fmt;

use regex::Regex;

/// Substrings that let a shell do more than run a single program.
const CONTROL_MARKERS: [&str; 8] = [";", "&", "|", "`", "$(", ">", "<", "\n"];

/// Trim the command and collapse whitespace runs to a single space.
///
/// Newlines separate commands for the shell, so they are kept (one per
/// non-blank line) rather than folded into spaces.
pub fn normalize(command: &str) -> String {
    command
        .split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns true if the normalized command contains shell control characters.
pub fn has_shell_control(normalized: &str) -> bool {
    CONTROL_MARKERS
        .iter()
        .any(|marker| normalized.contains(marker))
}

/// Split a normalized command into the segments the shell would run
/// independently (`;`, `&&`, `||`, `|`, `&`, newline).
pub fn segments(normalized: &str) -> Vec<&str> {
    normalized
        .split(|c| matches!(c, ';' | '|' | '&' | '\n'))
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// One entry of `allowedCommands` / `deniedCommands`.
///
/// Entries written as `/expr/` are regular expressions; everything else is a
/// literal compared against normalized command text.
#[derive(Debug, Clone)]
pub enum CommandPattern {
    Literal(String),
    Regex(Regex),
}

impl CommandPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty command pattern".to_string());
        }
        if trimmed.len() > 2 && trimmed.starts_with('/') && trimmed.ends_with('/') {
            let expr = &trimmed[1..trimmed.len() - 1];
            return Regex::new(expr)
                .map(Self::Regex)
                .map_err(|err| format!("invalid pattern {trimmed}: {err}"));
        }
        Ok(Self::Literal(normalize(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(literal) => literal,
            Self::Regex(re) => re.as_str(),
        }
    }

    /// Deny matching: literal substring anywhere in the command, or regex match.
    pub fn denies(&self, normalized: &str) -> bool {
        match self {
            Self::Literal(literal) => normalized.contains(literal.as_str()),
            Self::Regex(re) => re.is_match(normalized),
        }
    }

    /// Allow matching for one segment: literal leading-token prefix, or regex match.
    pub fn allows(&self, segment: &str) -> bool {
        match self {
            Self::Literal(literal) => starts_with_tokens(segment, literal),
            Self::Regex(re) => re.is_match(segment),
        }
    }
}

impl PartialEq for CommandPattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Regex(a), Self::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for CommandPattern {}

impl fmt::Display for CommandPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => f.write_str(literal),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

fn starts_with_tokens(segment: &str, prefix: &str) -> bool {
    let mut tokens = segment.split(' ');
    prefix.split(' ').all(|expected| tokens.next() == Some(expected))
}
