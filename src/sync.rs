//! Sync engine: one compression pass and one output file per tool.
//!
//! Tools share read-only access to the merged records and each pass owns
//! its own selection, so a failing tool never affects the others. Failures
//! are collected into the report instead of aborting the run.

use crate::adapters::{AdapterRegistry, ToolProfile};
use crate::compress::{render_within_budget, BudgetOverflow, CompressionConfig, Decision, Summarizer};
use crate::memory::MemoryRecord;
use crate::tokens::TokenCounter;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What one tool's pass produced
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Absolute path of the output file
    pub path: PathBuf,
    pub budget: usize,
    /// Measured size of the emitted file
    pub tokens: usize,
    /// Size of every record's full content
    pub original_tokens: usize,
    pub kept: usize,
    pub summarized: usize,
    pub dropped: usize,
    pub attempts: usize,
    pub warnings: Vec<BudgetOverflow>,
    /// False on dry runs
    pub written: bool,
    pub content: String,
}

impl ToolOutput {
    pub fn compressed(&self) -> bool {
        self.summarized > 0 || self.dropped > 0
    }
}

#[derive(Debug)]
pub struct ToolSyncResult {
    pub tool: String,
    pub outcome: Result<ToolOutput>,
}

/// Per-tool results of one sync run, in request order
#[derive(Debug, Default)]
pub struct SyncReport {
    pub results: Vec<ToolSyncResult>,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn get(&self, tool: &str) -> Option<&ToolSyncResult> {
        self.results.iter().find(|r| r.tool == tool)
    }
}

pub struct SyncEngine {
    registry: AdapterRegistry,
    compression: CompressionConfig,
    summarizer: Summarizer,
    counter: Box<dyn TokenCounter>,
}

impl SyncEngine {
    pub fn new(
        registry: AdapterRegistry,
        compression: CompressionConfig,
        counter: Box<dyn TokenCounter>,
    ) -> Self {
        Self {
            registry,
            compression,
            summarizer: Summarizer::new(),
            counter,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Explicit tools win. Otherwise, with `auto_detect`, the tools whose
    /// output already exists, falling back to every registered tool.
    pub fn tools_to_sync(&self, root: &Path, requested: &[String], auto_detect: bool) -> Vec<String> {
        if !requested.is_empty() {
            return requested.to_vec();
        }
        if auto_detect {
            let detected: Vec<String> = self
                .registry
                .detect(root)
                .into_iter()
                .map(|p| p.name.clone())
                .collect();
            if !detected.is_empty() {
                debug!("Detected tools: {}", detected.join(", "));
                return detected;
            }
        }
        self.registry.names().into_iter().map(String::from).collect()
    }

    /// Render every tool in `tools` and write it under `root` unless
    /// `dry_run`.
    pub fn sync(&self, root: &Path, records: &[MemoryRecord], tools: &[String], dry_run: bool) -> SyncReport {
        let mut report = SyncReport::default();

        for tool in tools {
            let outcome = self
                .registry
                .resolve(tool)
                .and_then(|profile| self.sync_tool(root, records, &profile, dry_run));

            match &outcome {
                Ok(output) => info!(
                    "{}: {} tokens of {} ({} kept, {} summarized, {} dropped)",
                    tool, output.tokens, output.budget, output.kept, output.summarized, output.dropped
                ),
                Err(e) => warn!("{}: sync failed: {}", tool, e),
            }

            report.results.push(ToolSyncResult {
                tool: tool.clone(),
                outcome,
            });
        }

        report
    }

    fn sync_tool(
        &self,
        root: &Path,
        records: &[MemoryRecord],
        profile: &ToolProfile,
        dry_run: bool,
    ) -> Result<ToolOutput> {
        let outcome = render_within_budget(
            profile,
            records,
            &self.compression,
            &self.summarizer,
            self.counter.as_ref(),
        );

        let path = root.join(&profile.output_path);
        if !dry_run {
            write_output(&path, &outcome.text)?;
        }

        let selection = &outcome.selection;
        Ok(ToolOutput {
            path,
            budget: profile.token_budget,
            tokens: outcome.measured_tokens,
            original_tokens: selection.full_tokens(),
            kept: selection.count(Decision::KeepFull),
            summarized: selection.count(Decision::Summarize),
            dropped: selection.count(Decision::Drop),
            attempts: outcome.attempts,
            warnings: outcome.warnings,
            written: !dry_run,
            content: outcome.text,
        })
    }
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    debug!("Wrote {}", path.display());
    Ok(())
}
