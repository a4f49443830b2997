//! Layered configuration.
//!
//! Built-in defaults, then `<global>/config.toml`, then
//! `<root>/.vibemem/config.toml`. Layers are merged as TOML tables so a
//! project file only has to name the keys it changes.

use crate::adapters::{default_budget, AdapterRegistry, OutputFormat, ToolProfile};
use crate::compress::{CompressionConfig, Strategy};
use crate::memory::{Category, STORE_DIR};
use crate::{Result, VibememError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.toml";

/// Accepted in `preserve_categories` for compatibility. Critical records are
/// always kept, so it has no effect.
const CRITICAL_ALIAS: &str = "critical";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibememConfig {
    pub version: u32,
    pub token_budgets: BTreeMap<String, usize>,
    pub compression: CompressionSettings,
    pub sync: SyncSettings,
    /// Extra tools beyond the built-ins
    pub tools: BTreeMap<String, CustomTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub strategy: Strategy,
    pub preserve_categories: Vec<String>,
    pub summarize_threshold: f64,
    pub overflow_slack: usize,
    pub min_excerpt_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Sync only tools whose output file already exists
    pub auto_detect_tools: bool,
    /// Merge the global store into every tool's output
    pub include_global: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTool {
    pub output_path: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<usize>,
}

impl Default for VibememConfig {
    fn default() -> Self {
        let registry = AdapterRegistry::builtin();
        let mut token_budgets: BTreeMap<String, usize> = registry
            .profiles()
            .map(|p| (p.name.clone(), p.token_budget))
            .collect();
        token_budgets.insert(
            crate::adapters::DEFAULT_BUDGET_KEY.to_string(),
            crate::adapters::DEFAULT_BUDGET,
        );

        Self {
            version: 1,
            token_budgets,
            compression: CompressionSettings::default(),
            sync: SyncSettings::default(),
            tools: BTreeMap::new(),
        }
    }
}

impl Default for CompressionSettings {
    fn default() -> Self {
        let defaults = CompressionConfig::default();
        Self {
            strategy: defaults.strategy,
            preserve_categories: defaults
                .preserve_categories
                .iter()
                .map(Category::to_string)
                .collect(),
            summarize_threshold: defaults.summarize_threshold,
            overflow_slack: defaults.overflow_slack,
            min_excerpt_tokens: defaults.min_excerpt_tokens,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_detect_tools: true,
            include_global: true,
        }
    }
}

impl VibememConfig {
    pub fn project_path(project_root: &Path) -> PathBuf {
        project_root.join(STORE_DIR).join(CONFIG_FILE)
    }

    /// Defaults layered with the global and project files that exist.
    pub fn load(project_root: &Path, global_dir: Option<&Path>) -> Result<Self> {
        let mut merged = match toml::Value::try_from(Self::default()) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(VibememError::Config("defaults are not a table".into())),
            Err(e) => return Err(VibememError::Config(e.to_string())),
        };

        let layers = global_dir
            .map(|dir| dir.join(CONFIG_FILE))
            .into_iter()
            .chain(std::iter::once(Self::project_path(project_root)));

        for path in layers {
            if let Some(layer) = read_table(&path)? {
                debug!("Applying config layer {}", path.display());
                deep_merge(&mut merged, layer);
            }
        }

        let config: Self = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| VibememError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.compression.summarize_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(VibememError::Config(format!(
                "compression.summarize_threshold must be between 0 and 1, got {threshold}"
            )));
        }
        Ok(())
    }

    /// Budget for a tool, falling back to the `default` entry
    pub fn budget_for(&self, tool: &str) -> usize {
        self.token_budgets
            .get(tool)
            .copied()
            .unwrap_or_else(|| default_budget(&self.token_budgets))
    }

    pub fn compression_config(&self) -> Result<CompressionConfig> {
        let mut preserve = BTreeSet::new();
        for name in &self.compression.preserve_categories {
            if name.trim().eq_ignore_ascii_case(CRITICAL_ALIAS) {
                continue;
            }
            let category: Category = name
                .parse()
                .map_err(|_| VibememError::Config(format!("invalid preserve category: {name}")))?;
            preserve.insert(category);
        }

        Ok(CompressionConfig {
            strategy: self.compression.strategy,
            preserve_categories: preserve,
            overflow_slack: self.compression.overflow_slack,
            min_excerpt_tokens: self.compression.min_excerpt_tokens,
            summarize_threshold: self.compression.summarize_threshold,
            ..CompressionConfig::default()
        })
    }

    /// Built-in tools with configured budgets plus the custom `[tools.*]`
    pub fn registry(&self) -> AdapterRegistry {
        let mut registry = AdapterRegistry::builtin();
        registry.apply_budgets(&self.token_budgets);
        for (name, tool) in &self.tools {
            let budget = tool.budget.unwrap_or_else(|| self.budget_for(name));
            registry.register(ToolProfile::new(
                name.as_str(),
                tool.output_path.clone(),
                tool.format,
                budget,
            ));
        }
        registry
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VibememError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<Option<toml::Table>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let table = content
        .parse::<toml::Table>()
        .map_err(|e| VibememError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(table))
}

/// Tables merge key by key, anything else is replaced by the override
fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
