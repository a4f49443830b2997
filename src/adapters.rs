//! Tool adapters
//!
//! A tool is just a name, an output file, a format and a token budget. The
//! registry maps names to profiles; everything tool-specific about rendering
//! is carried by `OutputFormat`.

use crate::{Result, VibememError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Budget key that applies to tools without an explicit entry
pub const DEFAULT_BUDGET_KEY: &str = "default";

/// Budget for custom tools when nothing else is configured
pub const DEFAULT_BUDGET: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Yaml,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Yaml => write!(f, "yaml"),
        }
    }
}

/// Where and how one assistant reads its context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProfile {
    pub name: String,
    /// Relative to the project root
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
    pub token_budget: usize,
}

impl ToolProfile {
    pub fn new(
        name: impl Into<String>,
        output_path: impl Into<PathBuf>,
        output_format: OutputFormat,
        token_budget: usize,
    ) -> Self {
        Self {
            name: name.into(),
            output_path: output_path.into(),
            output_format,
            token_budget,
        }
    }
}

const BUILTIN_TOOLS: &[(&str, &str, OutputFormat, usize)] = &[
    ("claude-code", "CLAUDE.md", OutputFormat::Markdown, 10000),
    ("cursor", ".cursorrules", OutputFormat::Markdown, 6000),
    ("copilot", ".github/copilot-instructions.md", OutputFormat::Markdown, 3000),
    ("aider", ".aider.conf.yml", OutputFormat::Yaml, 4000),
    ("windsurf", ".windsurfrules", OutputFormat::Markdown, 5000),
    ("cline", ".clinerules", OutputFormat::Markdown, 5000),
    ("continue", ".continuerules", OutputFormat::Markdown, 4000),
    ("zed", ".rules", OutputFormat::Markdown, 4000),
];

/// Tool name -> profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRegistry {
    profiles: BTreeMap<String, ToolProfile>,
}

impl AdapterRegistry {
    /// Registry with every built-in assistant at its default budget
    pub fn builtin() -> Self {
        let profiles = BUILTIN_TOOLS
            .iter()
            .map(|(name, path, format, budget)| {
                (name.to_string(), ToolProfile::new(*name, *path, *format, *budget))
            })
            .collect();
        Self { profiles }
    }

    /// Add or replace a profile
    pub fn register(&mut self, profile: ToolProfile) {
        debug!("Registering tool {} -> {}", profile.name, profile.output_path.display());
        self.profiles.insert(normalize(&profile.name), profile);
    }

    /// Override budgets by tool name. The `default` key is not applied to
    /// built-ins, it is the fallback for custom tools (see `default_budget`).
    pub fn apply_budgets(&mut self, budgets: &BTreeMap<String, usize>) {
        for (name, budget) in budgets {
            let key = normalize(name);
            if key == DEFAULT_BUDGET_KEY {
                continue;
            }
            match self.profiles.get_mut(&key) {
                Some(profile) => profile.token_budget = *budget,
                None => warn!("Ignoring budget for unknown tool: {}", name),
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Result<ToolProfile> {
        self.profiles
            .get(&normalize(name))
            .cloned()
            .ok_or_else(|| VibememError::UnknownTool(name.trim().to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &ToolProfile> {
        self.profiles.values()
    }

    /// Tools whose output file already exists under `root`
    pub fn detect(&self, root: &Path) -> Vec<&ToolProfile> {
        self.profiles
            .values()
            .filter(|p| root.join(&p.output_path).is_file())
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Budget for a custom tool given the configured budgets map
pub fn default_budget(budgets: &BTreeMap<String, usize>) -> usize {
    budgets
        .get(DEFAULT_BUDGET_KEY)
        .copied()
        .unwrap_or(DEFAULT_BUDGET)
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_profiles() {
        let registry = AdapterRegistry::builtin();
        assert_eq!(registry.names().len(), 8);

        let claude = registry.resolve("claude-code").unwrap();
        assert_eq!(claude.output_path, PathBuf::from("CLAUDE.md"));
        assert_eq!(claude.token_budget, 10000);

        let aider = registry.resolve("aider").unwrap();
        assert_eq!(aider.output_format, OutputFormat::Yaml);
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = AdapterRegistry::builtin();
        assert_eq!(registry.resolve(" Cursor ").unwrap().name, "cursor");
    }

    #[test]
    fn test_unknown_tool() {
        let registry = AdapterRegistry::builtin();
        let err = registry.resolve("emacs").unwrap_err();
        assert!(matches!(err, VibememError::UnknownTool(name) if name == "emacs"));
    }

    #[test]
    fn test_apply_budgets() {
        let mut registry = AdapterRegistry::builtin();
        let budgets: BTreeMap<String, usize> = [
            ("copilot".to_string(), 1500),
            ("default".to_string(), 2000),
            ("nope".to_string(), 10),
        ]
        .into_iter()
        .collect();
        registry.apply_budgets(&budgets);

        assert_eq!(registry.resolve("copilot").unwrap().token_budget, 1500);
        assert_eq!(registry.resolve("cursor").unwrap().token_budget, 6000);
        assert_eq!(default_budget(&budgets), 2000);
        assert_eq!(default_budget(&BTreeMap::new()), DEFAULT_BUDGET);
    }

    #[test]
    fn test_register_custom() {
        let mut registry = AdapterRegistry::builtin();
        registry.register(ToolProfile::new("MyTool", "docs/AI.md", OutputFormat::Markdown, 800));
        assert_eq!(registry.resolve("mytool").unwrap().token_budget, 800);
    }

    #[test]
    fn test_detect_existing_outputs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".cursorrules"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join(".github")).unwrap();
        std::fs::write(dir.path().join(".github/copilot-instructions.md"), "x").unwrap();

        let registry = AdapterRegistry::builtin();
        let found: Vec<&str> = registry
            .detect(dir.path())
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(found, vec!["copilot", "cursor"]);
    }
}
