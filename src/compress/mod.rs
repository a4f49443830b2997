//! Budgeted compression: select, summarize, render.
//!
//! The pipeline for one tool is
//!   1. `select` partitions records into tiers and decides KEEP_FULL,
//!      SUMMARIZE or DROP per record against the budget
//!   2. `Summarizer` shortens the SUMMARIZE entries
//!   3. `render` serializes the result and `render_within_budget` re-measures
//!      it, re-selecting with a smaller effective budget when formatting
//!      overhead pushed it over

mod render;
mod selector;
mod summarizer;

pub use render::{render, render_within_budget, BudgetOverflow, RenderOutcome, Rendered};
pub use selector::{select, Decision, SelectedEntry, Selection};
pub use summarizer::Summarizer;

use crate::memory::Category;
use crate::{Result, VibememError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// How non-critical records are shrunk to fit a budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Keep what fits, summarize preserved categories, drop the rest
    #[default]
    Smart,
    /// Past the summarize threshold, shorten every non-critical record
    Summarize,
    /// Keep what fits, drop the rest. No summaries.
    Truncate,
}

impl FromStr for Strategy {
    type Err = VibememError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smart" => Ok(Self::Smart),
            "summarize" => Ok(Self::Summarize),
            "truncate" => Ok(Self::Truncate),
            other => Err(VibememError::Config(format!(
                "unknown compression strategy: {other} (expected smart, summarize or truncate)"
            ))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smart => write!(f, "smart"),
            Self::Summarize => write!(f, "summarize"),
            Self::Truncate => write!(f, "truncate"),
        }
    }
}

/// Immutable compression parameters for one run
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    pub strategy: Strategy,

    /// Categories demoted to summaries instead of being dropped
    pub preserve_categories: BTreeSet<Category>,

    /// Total tokens preserved-category summaries may overrun the budget by
    pub overflow_slack: usize,

    /// Excerpt part of the summary floor (the category tag is added on top)
    pub min_excerpt_tokens: usize,

    /// Fraction of the budget after which `Strategy::Summarize` shortens
    /// everything non-critical
    pub summarize_threshold: f64,

    /// Formatting overhead tolerated by the renderer (ε)
    pub tolerance: f64,

    /// Re-selections the renderer may request before giving up
    pub max_retries: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Smart,
            preserve_categories: [Category::Error, Category::Arch].into_iter().collect(),
            overflow_slack: 16,
            min_excerpt_tokens: 8,
            summarize_threshold: 0.5,
            tolerance: 0.10,
            max_retries: 2,
        }
    }
}

impl CompressionConfig {
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_preserve_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.preserve_categories = categories.into_iter().collect();
        self
    }

    pub fn with_overflow_slack(mut self, slack: usize) -> Self {
        self.overflow_slack = slack;
        self
    }

    pub fn is_preserved(&self, category: &Category) -> bool {
        self.preserve_categories.contains(category)
    }
}
