//! vibemem - Universal memory for AI coding tools
//!
//! Keeps one canonical store of project memories and renders a context file
//! for each supported assistant:
//! - Select what fits each tool's token budget (critical facts always survive)
//! - Summarize preserved categories instead of dropping them
//! - Render Markdown or YAML and re-check the measured size

pub mod adapters;
pub mod compress;
pub mod config;
pub mod learn;
pub mod memory;
pub mod sync;
pub mod tokens;

pub use adapters::{AdapterRegistry, OutputFormat, ToolProfile};
pub use compress::{
    BudgetOverflow, CompressionConfig, Decision, RenderOutcome, Selection, SelectedEntry,
    Strategy, Summarizer,
};
pub use config::VibememConfig;
pub use memory::{Category, MemoryRecord, MemoryStore, NewMemory, Priority, Scope};
pub use sync::{SyncEngine, SyncReport, ToolSyncResult};
pub use tokens::{ApproxCounter, Cl100kCounter, TokenCounter};

/// Result type for vibemem operations
pub type Result<T> = std::result::Result<T, VibememError>;

/// Errors that can occur in vibemem
#[derive(Debug, thiserror::Error)]
pub enum VibememError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Memory store {path} is corrupted: {source}")]
    CorruptStore {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid memory: {0}")]
    InvalidMemory(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Invalid priority: {0} (expected critical, normal or low)")]
    InvalidPriority(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Token counter error: {0}")]
    TokenCounter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
