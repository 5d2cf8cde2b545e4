//! Path sandboxing for tool inputs.
//!
//! Path-like strings are pulled out of the input recursively and each one
//! must avoid `..` segments and start with an allow-listed prefix.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::input::ParsedInput;

/// Key fragments that mark a value as a path regardless of its shape.
const PATH_KEY_HINTS: &[&str] = &["path", "file", "dir"];

fn drive_letter() -> &'static Regex {
    static DRIVE: OnceLock<Regex> = OnceLock::new();
    DRIVE.get_or_init(|| Regex::new(r"^[A-Za-z]:").expect("drive letter pattern is valid"))
}

/// Why a path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationReason {
    ParentTraversal,
    OutsideAllowedPrefixes,
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentTraversal => f.write_str("path contains a parent-directory segment"),
            Self::OutsideAllowedPrefixes => f.write_str("path is outside the allowed prefixes"),
        }
    }
}

/// A rejected path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxViolation {
    pub path: String,
    pub reason: ViolationReason,
}

/// Allow-list of path prefixes. Empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSandbox {
    prefixes: Vec<String>,
}

impl PathSandbox {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| normalize(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Check every path-like string in the input. The first offender wins.
    pub fn check(&self, input: &ParsedInput) -> Result<(), SandboxViolation> {
        if self.is_unrestricted() {
            return Ok(());
        }
        for path in extract_paths(input) {
            self.check_path(&path)?;
        }
        Ok(())
    }

    /// Check a single path against the allow-list.
    pub fn check_path(&self, path: &str) -> Result<(), SandboxViolation> {
        let normalized = normalize(path);
        if normalized.split('/').any(|segment| segment == "..") {
            return Err(SandboxViolation {
                path: path.to_string(),
                reason: ViolationReason::ParentTraversal,
            });
        }
        if !self.prefixes.iter().any(|prefix| normalized.starts_with(prefix.as_str())) {
            return Err(SandboxViolation {
                path: path.to_string(),
                reason: ViolationReason::OutsideAllowedPrefixes,
            });
        }
        Ok(())
    }
}

/// Collect every path-like string in the input, in document order.
pub fn extract_paths(input: &ParsedInput) -> Vec<String> {
    let mut paths = Vec::new();
    match input {
        ParsedInput::RawText(text) => {
            if looks_like_path(text) {
                paths.push(text.clone());
            }
        }
        ParsedInput::Json(value) => collect(value, false, &mut paths),
    }
    paths
}

/// Heuristic: separators, a drive letter, or a leading `~` / `.`.
pub fn looks_like_path(value: &str) -> bool {
    value.contains('/')
        || value.contains('\\')
        || value.starts_with('~')
        || value.starts_with('.')
        || drive_letter().is_match(value)
}

fn collect(value: &Value, under_path_key: bool, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if !s.is_empty() && (under_path_key || looks_like_path(s)) {
                out.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, under_path_key, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect(item, is_path_key(key), out);
            }
        }
        _ => {}
    }
}

fn is_path_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    PATH_KEY_HINTS.iter().any(|hint| key.contains(hint))
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}
