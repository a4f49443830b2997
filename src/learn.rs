//! Learning memories from conversations.
//!
//! Candidates come from an untrusted source (a transcript, a hand-written
//! JSON list) so every one is validated before it reaches the store. The
//! `Extractor` finds candidates in transcripts with keyword patterns: user
//! corrections ("no, it's 8002") and specifications ("the api is on port
//! 8002").

use crate::memory::{MemoryStore, NewMemory, Priority};
use crate::{Result, VibememError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Matches shorter than this are noise
const MIN_MATCH_CHARS: usize = 10;

const FALLBACK_CATEGORY: &str = "gotcha";

const CORRECTION_PATTERNS: &[&str] = &[
    r"\bno[,.]?\s+(?:it'?s|the|that|this)\s+(?:actually\s+)?.+",
    r"\bnot\s+\d+[,.]?\s+(?:it'?s|use)\s+\d+",
    r"\bwrong[,.]?\s+.+",
    r"\bactually[,.]?\s+.+",
    r"\b(?:the\s+)?correct\s+(?:one\s+is|answer\s+is|way\s+is)\s+.+",
    r"\bshould\s+be\s+.+?\s+not\s+.+",
    r"\buse\s+.+?\s+instead\s+of\s+.+",
    r"\bdon'?t\s+(?:use|do)\s+.+",
    r"\bnever\s+.+",
    r"\balways\s+.+",
];

const SPECIFICATION_PATTERNS: &[&str] = &[
    r"\b(?:the\s+)?api\s+(?:is\s+)?(?:on|at)\s+(?:port\s+)?\d+",
    r"\b(?:the\s+)?(?:server|service|app)\s+runs\s+(?:on|at)\s+.+",
    r"\b(?:we\s+)?use\s+.+?\s+for\s+.+",
    r"\b(?:the\s+)?architecture\s+is\s+.+",
    r"\b(?:the\s+)?database\s+is\s+.+",
    r"\bcredentials?\s+(?:are|is)\s+.+",
    r"\b(?:the\s+)?format\s+(?:is|should\s+be)\s+.+",
];

/// First matching category wins, in this order
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("arch", &["architecture", "structure", "design", "pattern", "flow", "system"]),
    ("api", &["api", "endpoint", "port", "url", "route", "request", "response"]),
    ("gotcha", &["gotcha", "watch out", "careful", "note", "warning", "caveat", "bug"]),
    ("error", &["error", "mistake", "wrong", "incorrect", "don't", "never", "avoid"]),
    ("cred", &["credential", "password", "api key", "token", "secret", "auth"]),
    ("style", &["style", "format", "convention", "naming", "prefer", "always use"]),
    ("platform", &["hackerone", "bugcrowd", "github", "gitlab", "jira"]),
];

/// An unvalidated memory proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub priority: Option<String>,
}

impl Candidate {
    fn validate(&self) -> Result<NewMemory> {
        NewMemory::parse(&self.category, &self.content, self.priority.as_deref())
    }
}

#[derive(Debug, Default)]
pub struct IngestReport {
    /// Ids of the stored records
    pub added: Vec<String>,
    pub rejected: Vec<(Candidate, VibememError)>,
}

/// Validate candidates and add the good ones to `store`. Candidates whose
/// content is already stored (case-insensitive) are rejected.
pub fn ingest(store: &mut MemoryStore, candidates: Vec<Candidate>) -> IngestReport {
    let mut report = IngestReport::default();
    let mut seen: HashSet<String> = store
        .records()
        .iter()
        .map(|r| r.content.trim().to_lowercase())
        .collect();

    for candidate in candidates {
        let memory = match candidate.validate() {
            Ok(memory) => memory,
            Err(e) => {
                warn!("Rejected candidate {:?}: {}", candidate.content, e);
                report.rejected.push((candidate, e));
                continue;
            }
        };

        if !seen.insert(memory.content.to_lowercase()) {
            let err = VibememError::InvalidMemory("already stored".to_string());
            report.rejected.push((candidate, err));
            continue;
        }

        let id = store.add(memory);
        debug!("Learned {}", id);
        report.added.push(id);
    }

    report
}

/// Pattern-based candidate extraction
#[derive(Debug, Clone)]
pub struct Extractor {
    patterns: Vec<Regex>,
    role_prefix: Regex,
}

impl Extractor {
    pub fn new() -> Self {
        let patterns = CORRECTION_PATTERNS
            .iter()
            .chain(SPECIFICATION_PATTERNS)
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect();
        Self {
            patterns,
            role_prefix: Regex::new(r"(?i)^\[(?:human|assistant|user|ai)\]:\s*").unwrap(),
        }
    }

    /// Candidates from a file's contents. A JSON list of candidate objects
    /// is taken as-is; a JSON transcript or plain text goes through the
    /// patterns.
    pub fn read(&self, input: &str) -> Vec<Candidate> {
        if let Ok(candidates) = serde_json::from_str::<Vec<Candidate>>(input) {
            if !candidates.is_empty() {
                return candidates;
            }
        }
        self.extract(&transcript_text(input))
    }

    /// Correction and specification matches, de-duplicated by content
    pub fn extract(&self, text: &str) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for pattern in &self.patterns {
            for m in pattern.find_iter(text) {
                let matched = m.as_str().trim();
                if matched.chars().count() <= MIN_MATCH_CHARS {
                    continue;
                }
                let content = self.clean(matched);
                if !seen.insert(content.to_lowercase()) {
                    continue;
                }
                candidates.push(Candidate {
                    category: categorize(matched).to_string(),
                    content,
                    priority: Some(Priority::Normal.to_string()),
                });
            }
        }

        candidates
    }

    /// Strip the role prefix, collapse whitespace, capitalize
    pub fn clean(&self, text: &str) -> String {
        let stripped = self.role_prefix.replace(text, "");
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut chars = collapsed.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyword category for extracted text
pub fn categorize(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(FALLBACK_CATEGORY)
}

/// Flatten a JSON transcript (`[{role, content}]` or `{"messages": [...]}`)
/// into `[role]: text` lines. Anything else is returned unchanged.
pub fn transcript_text(input: &str) -> String {
    let messages = match serde_json::from_str::<Value>(input) {
        Ok(Value::Array(messages)) => messages,
        Ok(Value::Object(mut map)) => match map.remove("messages") {
            Some(Value::Array(messages)) => messages,
            _ => return input.to_string(),
        },
        _ => return input.to_string(),
    };

    messages
        .iter()
        .filter_map(|msg| {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
            let text = message_text(msg.get("content")?)?;
            (!text.is_empty()).then(|| format!("[{role}]: {text}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain string content, or the first `text` block of a block list
fn message_text(content: &Value) -> Option<&str> {
    match content {
        Value::String(s) => Some(s.as_str()),
        Value::Array(blocks) => blocks
            .iter()
            .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|b| b.get("text"))
            .and_then(Value::as_str),
        _ => None,
    }
}
