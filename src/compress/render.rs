//! Output rendering for tool context files.
//!
//! Two layouts: Markdown for most assistants and a YAML document for tools
//! that read config files. Output never carries timestamps so re-rendering
//! the same selection is byte-identical.

use super::selector::{more_line, pointer_line};
use super::{select, CompressionConfig, Decision, SelectedEntry, Selection, Summarizer};
use crate::adapters::{OutputFormat, ToolProfile};
use crate::memory::{Category, MemoryRecord};
use crate::tokens::TokenCounter;
use std::fmt;
use std::fmt::Write as _;
use tracing::{debug, warn};

const MARKDOWN_TITLE: &str = "# Project Memory";
const ALSO_TRACKED: &str = "Also tracked";
const CRITICAL_MARK_MD: &str = "**[!]** ";
const CRITICAL_MARK_YAML: &str = "[!] ";

/// Serialized output and its measured size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub tokens: usize,
}

/// Why a rendered file ended up over budget. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetOverflow {
    /// Critical records alone exceed the budget
    CriticalOnly { critical_tokens: usize, budget: usize },
    /// Formatting overhead kept the output over budget after every retry
    RetriesExhausted {
        measured: usize,
        budget: usize,
        attempts: usize,
    },
}

impl fmt::Display for BudgetOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CriticalOnly {
                critical_tokens,
                budget,
            } => write!(
                f,
                "critical memories need {critical_tokens} tokens, budget is {budget}"
            ),
            Self::RetriesExhausted {
                measured,
                budget,
                attempts,
            } => write!(
                f,
                "output is {measured} tokens after {attempts} attempts, budget is {budget}"
            ),
        }
    }
}

/// Result of the budget-convergent render loop
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub text: String,
    pub measured_tokens: usize,
    /// Selection behind the emitted text
    pub selection: Selection,
    pub attempts: usize,
    pub warnings: Vec<BudgetOverflow>,
}

/// Serialize a selection in the profile's format and measure it.
pub fn render(profile: &ToolProfile, selection: &Selection, counter: &dyn TokenCounter) -> Rendered {
    let text = match profile.output_format {
        OutputFormat::Markdown => render_markdown(&profile.name, selection),
        OutputFormat::Yaml => render_yaml(&profile.name, selection),
    };
    let tokens = counter.count(&text);
    Rendered { text, tokens }
}

/// Select and render, re-selecting with a smaller effective budget while the
/// measured output exceeds `budget * (1 + tolerance)`. When no attempt gets
/// within the ceiling the smallest one is emitted.
pub fn render_within_budget(
    profile: &ToolProfile,
    records: &[MemoryRecord],
    config: &CompressionConfig,
    summarizer: &Summarizer,
    counter: &dyn TokenCounter,
) -> RenderOutcome {
    let budget = profile.token_budget;
    let ceiling = budget as f64 * (1.0 + config.tolerance);
    let mut effective = budget;
    let mut attempts = 0;
    let mut warnings = Vec::new();
    let mut best: Option<(Rendered, Selection)> = None;

    let (rendered, selection) = loop {
        attempts += 1;
        let selection = select(records, effective, config, summarizer, counter);
        let rendered = render(profile, &selection, counter);

        debug!(
            "{}: attempt {} with effective budget {} measured {} tokens",
            profile.name, attempts, effective, rendered.tokens
        );

        // Retries shrink the effective budget, critical overflow is judged
        // against the real one
        if selection.critical_tokens > budget {
            warnings.push(BudgetOverflow::CriticalOnly {
                critical_tokens: selection.critical_tokens,
                budget,
            });
            break (rendered, selection);
        }
        if rendered.tokens as f64 <= ceiling {
            break (rendered, selection);
        }

        let overshoot = rendered.tokens - budget;
        if best.as_ref().map_or(true, |(b, _)| rendered.tokens < b.tokens) {
            best = Some((rendered, selection));
        }

        if attempts > config.max_retries || effective == 0 {
            if let Some((rendered, selection)) = best.take() {
                warnings.push(BudgetOverflow::RetriesExhausted {
                    measured: rendered.tokens,
                    budget,
                    attempts,
                });
                break (rendered, selection);
            }
        }
        effective = effective.saturating_sub(overshoot);
    };

    for warning in &warnings {
        warn!("{}: over budget: {}", profile.name, warning);
    }

    RenderOutcome {
        text: rendered.text,
        measured_tokens: rendered.tokens,
        selection,
        attempts,
        warnings,
    }
}

/// Categories in the order they first appear among emitted entries
fn grouped(selection: &Selection) -> Vec<(&Category, Vec<&SelectedEntry>)> {
    let mut groups: Vec<(&Category, Vec<&SelectedEntry>)> = Vec::new();
    for entry in selection.entries.iter().filter(|e| e.decision != Decision::Drop) {
        let category = &entry.record.category;
        match groups.iter_mut().find(|(c, _)| *c == category) {
            Some((_, entries)) => entries.push(entry),
            None => groups.push((category, vec![entry])),
        }
    }
    groups
}

fn dropped(selection: &Selection) -> impl Iterator<Item = &SelectedEntry> {
    selection.entries.iter().filter(|e| e.decision == Decision::Drop)
}

fn render_markdown(tool: &str, selection: &Selection) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{MARKDOWN_TITLE}");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "<!-- Generated by vibemem for {tool}. Edit memories with `vibemem add`, not this file. -->"
    );

    for (category, entries) in grouped(selection) {
        let _ = writeln!(out);
        let _ = writeln!(out, "## {}", category.title());
        let _ = writeln!(out);
        for entry in entries {
            let mark = if entry.record.is_critical() {
                CRITICAL_MARK_MD
            } else {
                ""
            };
            // Continuation lines stay inside the bullet
            let text = entry
                .text
                .trim()
                .lines()
                .map(escape_block_marker)
                .collect::<Vec<_>>()
                .join("\n  ");
            let _ = writeln!(out, "- {mark}{text}");
        }
    }

    let mut pointers = dropped(selection).peekable();
    if pointers.peek().is_some() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## {ALSO_TRACKED}");
        let _ = writeln!(out);
        for entry in pointers.filter(|e| e.listed) {
            let _ = writeln!(out, "{}", pointer_line(&entry.record));
        }
        let omitted = selection.omitted();
        if omitted > 0 {
            let _ = writeln!(out, "{}", more_line(omitted));
        }
    }

    out
}

/// Backslash-escape a leading heading, list or quote marker so memory text
/// can't open a new block inside its bullet.
fn escape_block_marker(line: &str) -> String {
    let body = line.trim_start();
    let indent = &line[..line.len() - body.len()];
    let digits = body.len() - body.trim_start_matches(|c: char| c.is_ascii_digit()).len();

    if body.starts_with(&['#', '-', '*', '+', '>'][..]) {
        format!("{indent}\\{body}")
    } else if digits > 0 && body[digits..].starts_with(&['.', ')'][..]) {
        format!("{indent}{}\\{}", &body[..digits], &body[digits..])
    } else {
        line.to_string()
    }
}

/// Double-quoted YAML scalar. JSON string escapes are valid YAML.
fn yaml_quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn render_yaml(tool: &str, selection: &Selection) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Generated by vibemem for {tool}. Edit memories with `vibemem add`, not this file."
    );

    let groups = grouped(selection);
    if groups.is_empty() {
        let _ = writeln!(out, "memory: {{}}");
    } else {
        let _ = writeln!(out, "memory:");
        for (category, entries) in groups {
            let _ = writeln!(out, "  {}:", yaml_quote(&category.to_string()));
            for entry in entries {
                let mark = if entry.record.is_critical() {
                    CRITICAL_MARK_YAML
                } else {
                    ""
                };
                let text = format!("{mark}{}", entry.text.trim());
                let _ = writeln!(out, "    - {}", yaml_quote(&text));
            }
        }
    }

    let mut pointers = dropped(selection).filter(|e| e.listed).peekable();
    if pointers.peek().is_some() {
        let _ = writeln!(out, "also_tracked:");
        for entry in pointers {
            let _ = writeln!(out, "  - id: {}", yaml_quote(&entry.record.id));
            let _ = writeln!(
                out,
                "    category: {}",
                yaml_quote(&entry.record.category.to_string())
            );
        }
    }
    let omitted = selection.omitted();
    if omitted > 0 {
        let _ = writeln!(out, "also_tracked_more: {omitted}");
    }

    out
}
