//! Tool auto-approval policy.
//!
//! Decides whether a pending tool use will run without a prompt, mirroring
//! the rules Claude Code reads from `~/.claude/settings.json`:
//!
//! ```json
//! {
//!   "permissions": {
//!     "allow": ["Bash(npm test:*)", "Edit", "WebFetch(domain:docs.rs)", "mcp__github"],
//!     "deny": ["Bash(rm:*)"],
//!     "defaultMode": "acceptEdits"
//!   }
//! }
//! ```
//!
//! A tool use is auto-approved when it is read-only, or when an allow rule
//! matches it and no deny rule does.

use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, warn};

/// Tools Claude Code runs without asking in every mode.
const READ_ONLY_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "TodoWrite",
    "NotebookRead",
    "WebSearch",
    "Task",
];

/// Tools auto-approved under `defaultMode: acceptEdits`.
const EDIT_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit"];

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    permissions: PermissionsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionsSection {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
    #[serde(default)]
    default_mode: Option<String>,
}

/// Permission mode from the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    fn parse(mode: Option<&str>) -> Self {
        match mode {
            Some("acceptEdits") => Self::AcceptEdits,
            Some("bypassPermissions") => Self::BypassPermissions,
            _ => Self::Default,
        }
    }
}

/// A single `Tool` or `Tool(specifier)` rule.
#[derive(Debug, Clone)]
struct Rule {
    tool: String,
    specifier: Option<String>,
    /// Compiled specifier for path-based tools.
    paths: Option<GlobMatcher>,
}

impl Rule {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let Some((tool, rest)) = raw.split_once('(') else {
            return Some(Self {
                tool: raw.to_string(),
                specifier: None,
                paths: None,
            });
        };
        let tool = tool.trim().to_string();
        let specifier = rest.strip_suffix(')')?.to_string();
        let paths = match tool.as_str() {
            "Bash" | "WebFetch" => None,
            _ => match compile_path_glob(&specifier) {
                Ok(matcher) => Some(matcher),
                Err(e) => {
                    warn!(rule = raw, error = %e, "Ignoring rule with invalid path pattern");
                    return None;
                }
            },
        };
        Some(Self {
            tool,
            specifier: Some(specifier),
            paths,
        })
    }

    fn matches(&self, tool: &str, input: &Value) -> bool {
        if !self.matches_tool(tool) {
            return false;
        }
        let Some(specifier) = self.specifier.as_deref() else {
            return true;
        };

        match tool {
            "Bash" => input
                .get("command")
                .and_then(Value::as_str)
                .is_some_and(|command| bash_matches(specifier, command)),
            "WebFetch" => input
                .get("url")
                .and_then(Value::as_str)
                .is_some_and(|url| domain_matches(specifier, url)),
            _ => match (&self.paths, input_path(input)) {
                (Some(paths), Some(path)) => paths.is_match(path),
                _ => false,
            },
        }
    }

    fn matches_tool(&self, tool: &str) -> bool {
        if self.tool == tool {
            return true;
        }
        // "mcp__server" covers every tool that server exposes
        self.specifier.is_none()
            && self.tool.starts_with("mcp__")
            && tool
                .strip_prefix(self.tool.as_str())
                .is_some_and(|rest| rest.starts_with("__"))
    }
}

/// Compiles a path specifier. `*` stays within one segment and `**` spans
/// directories; a pattern without `/` matches the file name at any depth.
fn compile_path_glob(specifier: &str) -> Result<GlobMatcher, globset::Error> {
    let pattern = if specifier.contains('/') {
        Cow::Borrowed(specifier)
    } else {
        Cow::Owned(format!("**/{specifier}"))
    };
    let glob = GlobBuilder::new(&pattern).literal_separator(true).build()?;
    Ok(glob.compile_matcher())
}

/// `npm test:*` is a prefix rule, anything else must match exactly.
fn bash_matches(specifier: &str, command: &str) -> bool {
    let command = command.trim();
    match specifier.strip_suffix(":*") {
        Some(prefix) => command == prefix || command.starts_with(&format!("{prefix} ")),
        None => command == specifier,
    }
}

fn domain_matches(specifier: &str, url: &str) -> bool {
    let Some(domain) = specifier.strip_prefix("domain:") else {
        return false;
    };
    let host = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit_once('@').map_or(host, |(_, h)| h);
    let host = host.split(':').next().unwrap_or_default();
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn input_path(input: &Value) -> Option<&str> {
    ["file_path", "notebook_path", "path"]
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
}

/// Decides whether tool uses run without a permission prompt.
#[derive(Debug, Clone, Default)]
pub struct PermissionChecker {
    mode: PermissionMode,
    allow: Vec<Rule>,
    deny: Vec<Rule>,
}

impl PermissionChecker {
    /// Loads rules from a Claude Code settings file.
    ///
    /// A missing or malformed file yields the built-in policy (read-only
    /// tools only).
    pub fn from_settings_file(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No settings file, using built-in policy");
                return Self::default();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Self::from_settings_value(&value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed settings file, using built-in policy");
                Self::default()
            }
        }
    }

    /// Builds a checker from an already-parsed settings document.
    pub fn from_settings_value(value: &Value) -> Self {
        let settings = SettingsFile::deserialize(value).unwrap_or_default();
        let permissions = settings.permissions;
        Self {
            mode: PermissionMode::parse(permissions.default_mode.as_deref()),
            allow: permissions.allow.iter().filter_map(|r| Rule::parse(r)).collect(),
            deny: permissions.deny.iter().filter_map(|r| Rule::parse(r)).collect(),
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Returns true if Claude Code would run this tool use without asking.
    pub fn is_auto_approved(&self, tool: &str, input: &Value) -> bool {
        if self.mode == PermissionMode::BypassPermissions {
            return true;
        }
        if self.deny.iter().any(|rule| rule.matches(tool, input)) {
            return false;
        }
        if READ_ONLY_TOOLS.contains(&tool) {
            return true;
        }
        if self.mode == PermissionMode::AcceptEdits && EDIT_TOOLS.contains(&tool) {
            return true;
        }
        self.allow.iter().any(|rule| rule.matches(tool, input))
    }
}
