//! Memory records and their enumerations

use crate::tokens::TokenCounter;
use crate::{Result, VibememError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a memory is about.
///
/// Built-in categories plus two open cases: `platform:<name>` for
/// per-platform notes and `Custom` for any other slug a user invents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    Arch,
    Api,
    Gotcha,
    Error,
    Cred,
    Style,
    Platform(Option<String>),
    Custom(String),
}

impl Category {
    /// Human heading used by the Markdown renderer
    pub fn title(&self) -> String {
        match self {
            Self::Arch => "Architecture".to_string(),
            Self::Api => "API".to_string(),
            Self::Gotcha => "Gotchas".to_string(),
            Self::Error => "Errors to Avoid".to_string(),
            Self::Cred => "Credentials".to_string(),
            Self::Style => "Style".to_string(),
            Self::Platform(None) => "Platform".to_string(),
            Self::Platform(Some(name)) => format!("Platform: {}", capitalize(name)),
            Self::Custom(name) => capitalize(&name.replace(['-', '_'], " ")),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl FromStr for Category {
    type Err = VibememError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        if let Some((head, name)) = normalized.split_once(':') {
            if head != "platform" || !is_slug(name) {
                return Err(VibememError::InvalidCategory(s.to_string()));
            }
            return Ok(Self::Platform(Some(name.to_string())));
        }

        match normalized.as_str() {
            "arch" => Ok(Self::Arch),
            "api" => Ok(Self::Api),
            "gotcha" => Ok(Self::Gotcha),
            "error" => Ok(Self::Error),
            "cred" => Ok(Self::Cred),
            "style" => Ok(Self::Style),
            "platform" => Ok(Self::Platform(None)),
            other if is_slug(other) => Ok(Self::Custom(other.to_string())),
            _ => Err(VibememError::InvalidCategory(s.to_string())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arch => write!(f, "arch"),
            Self::Api => write!(f, "api"),
            Self::Gotcha => write!(f, "gotcha"),
            Self::Error => write!(f, "error"),
            Self::Cred => write!(f, "cred"),
            Self::Style => write!(f, "style"),
            Self::Platform(None) => write!(f, "platform"),
            Self::Platform(Some(name)) => write!(f, "platform:{}", name),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl TryFrom<String> for Category {
    type Error = VibememError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.to_string()
    }
}

/// Priority of a memory; critical memories are never dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    #[default]
    Normal,
    Low,
}

impl FromStr for Priority {
    type Err = VibememError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(VibememError::InvalidPriority(s.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Where a memory applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Applies to every project
    Global,
    /// Applies to one project
    Project,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// One atomic fact about a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub category: Category,
    pub content: String,
    #[serde(default)]
    pub priority: Priority,
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Token size of the full content. Derived, never stored.
    pub fn size_tokens(&self, counter: &dyn TokenCounter) -> usize {
        counter.count(&self.content)
    }

    pub fn is_critical(&self) -> bool {
        self.priority == Priority::Critical
    }
}

/// A validated memory waiting to be added to a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMemory {
    pub category: Category,
    pub content: String,
    pub priority: Priority,
}

impl NewMemory {
    pub fn new(category: Category, content: impl Into<String>, priority: Priority) -> Result<Self> {
        let content = content.into().trim().to_string();
        if content.is_empty() {
            return Err(VibememError::InvalidMemory("content cannot be empty".to_string()));
        }
        Ok(Self {
            category,
            content,
            priority,
        })
    }

    /// Validate raw, untrusted fields (CLI arguments or `learn` candidates).
    pub fn parse(category: &str, content: &str, priority: Option<&str>) -> Result<Self> {
        let category = category.parse()?;
        let priority = match priority {
            Some(p) => p.parse()?,
            None => Priority::default(),
        };
        Self::new(category, content, priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_builtins() {
        assert_eq!("arch".parse::<Category>().unwrap(), Category::Arch);
        assert_eq!(" API ".parse::<Category>().unwrap(), Category::Api);
        assert_eq!("platform".parse::<Category>().unwrap(), Category::Platform(None));
    }

    #[test]
    fn test_category_compound_platform() {
        let cat: Category = "platform:hackerone".parse().unwrap();
        assert_eq!(cat, Category::Platform(Some("hackerone".to_string())));
        assert_eq!(cat.to_string(), "platform:hackerone");
        assert_eq!(cat.title(), "Platform: Hackerone");
    }

    #[test]
    fn test_category_rejects_bad_input() {
        assert!("".parse::<Category>().is_err());
        assert!("db:postgres".parse::<Category>().is_err());
        assert!("platform:".parse::<Category>().is_err());
        assert!("two words".parse::<Category>().is_err());
    }

    #[test]
    fn test_custom_category() {
        let cat: Category = "deploy-notes".parse().unwrap();
        assert_eq!(cat, Category::Custom("deploy-notes".to_string()));
        assert_eq!(cat.title(), "Deploy notes");
    }

    #[test]
    fn test_category_serde_as_string() {
        let cat = Category::Platform(Some("bugcrowd".to_string()));
        let json = serde_json::to_string(&cat).unwrap();
        assert_eq!(json, "\"platform:bugcrowd\"");
        let back: Category = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cat);
        assert!(serde_json::from_str::<Category>("\"no spaces allowed\"").is_err());
    }

    #[test]
    fn test_priority_parse_and_default() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_new_memory_validation() {
        assert!(NewMemory::parse("gotcha", "   ", None).is_err());
        assert!(NewMemory::parse("gotcha", "x", Some("sometimes")).is_err());

        let mem = NewMemory::parse("gotcha", "  API runs on port 8002  ", Some("low")).unwrap();
        assert_eq!(mem.content, "API runs on port 8002");
        assert_eq!(mem.priority, Priority::Low);
    }
}
