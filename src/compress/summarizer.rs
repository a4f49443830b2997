//! Extractive summarizer.
//!
//! Keeps the leading clause and the fact-like tokens (ports, paths,
//! identifiers, versions) because those are what users come back for. Prose
//! is trimmed first, facts last.

use crate::tokens::{truncate_to_tokens, TokenCounter};
use regex::Regex;

const ELLIPSIS: &str = "…";

/// Shortens memory content under a token target
#[derive(Debug, Clone)]
pub struct Summarizer {
    fact_pattern: Regex,
    clause_end: Regex,
}

impl Summarizer {
    pub fn new() -> Self {
        Self {
            fact_pattern: Self::compile_fact_pattern(),
            clause_end: Regex::new(r"[.;!?](?:\s|$)|\s[-–—]\s|\n").unwrap(),
        }
    }

    fn compile_fact_pattern() -> Regex {
        Regex::new(
            r"(?x)
            `[^`\n]+`                                        # inline code
            | https?://[^\s)>\]]+                            # urls
            | [A-Za-z0-9_.~-]*/[A-Za-z0-9_./{}:~-]+          # paths and endpoints
            | \b[A-Za-z_]\w*(?:::[A-Za-z_]\w*)+              # a::b paths
            | \b[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)+\b        # file.ext, 1.2.3, host.name
            | --[A-Za-z][A-Za-z0-9-]*                        # long flags
            | \b(?:[A-Za-z_]+[0-9]+|[0-9]{2,})\w*\b          # ports, md5, v2
            | \b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b              # snake_case
            | \b[a-z]+(?:[A-Z][a-z0-9]*)+\b                  # camelCase
            | \b[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]*)+\b          # PascalCase
            ",
        )
        .unwrap()
    }

    /// Fact-like tokens in order of appearance, without duplicates
    pub fn fact_tokens<'a>(&self, content: &'a str) -> Vec<&'a str> {
        let mut facts: Vec<&str> = Vec::new();
        for m in self.fact_pattern.find_iter(content) {
            let fact = m.as_str().trim_end_matches(['.', ',', ':', ';']);
            if !fact.is_empty() && !facts.contains(&fact) {
                facts.push(fact);
            }
        }
        facts
    }

    /// Text up to the first sentence or clause break
    pub fn leading_clause<'a>(&self, content: &'a str) -> &'a str {
        let content = content.trim();
        match self.clause_end.find(content) {
            Some(m) if m.start() > 0 => content[..m.start()].trim_end(),
            _ => content,
        }
    }

    /// Shorten `content` to at most `target_tokens`.
    ///
    /// Content that already fits is returned unchanged, which makes the
    /// operation idempotent. Otherwise the result keeps at least one
    /// fact-like token when the input has one and any fits.
    pub fn summarize(&self, content: &str, target_tokens: usize, counter: &dyn TokenCounter) -> String {
        if counter.count(content) <= target_tokens {
            return content.to_string();
        }

        let facts = self.fact_tokens(content);
        let words: Vec<&str> = self.leading_clause(content).split_whitespace().collect();

        // Longest lead whose bare form fits; adding facts only grows it.
        let max_words = longest_fitting_prefix(&words, target_tokens, counter);

        for n in (0..=max_words).rev() {
            let head = words[..n].join(" ");
            let head_has_fact = facts.iter().any(|f| head.contains(f));

            let mut trailer: Vec<&str> = Vec::new();
            for fact in facts.iter().filter(|f| !head.contains(**f)) {
                trailer.push(*fact);
                if counter.count(&compose(&head, &trailer)) > target_tokens {
                    trailer.pop();
                }
            }

            if head.is_empty() && trailer.is_empty() {
                continue;
            }
            if !facts.is_empty() && !head_has_fact && trailer.is_empty() {
                continue;
            }

            let candidate = compose(&head, &trailer);
            if counter.count(&candidate) <= target_tokens {
                return candidate;
            }
        }

        let fallback = facts.first().copied().unwrap_or(content);
        truncate_to_tokens(fallback, target_tokens, counter).to_string()
    }
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::new()
    }
}

fn compose(head: &str, trailer: &[&str]) -> String {
    match (head.is_empty(), trailer.is_empty()) {
        (_, true) => format!("{head}{ELLIPSIS}"),
        (true, false) => format!("{}{ELLIPSIS}", trailer.join(", ")),
        (false, false) => format!("{head}{ELLIPSIS} ({})", trailer.join(", ")),
    }
}

fn longest_fitting_prefix(words: &[&str], target: usize, counter: &dyn TokenCounter) -> usize {
    let fits = |n: usize| counter.count(&compose(&words[..n].join(" "), &[])) <= target;

    if words.is_empty() || !fits(1) {
        return 0;
    }
    let (mut lo, mut hi) = (1, words.len());
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::ApproxCounter;

    fn words(text: &str) -> usize {
        text.split_whitespace().count()
    }

    #[test]
    fn test_short_content_unchanged() {
        let s = Summarizer::new();
        let text = "API runs on port 8002";
        assert_eq!(s.summarize(text, 10, &words), text);
    }

    #[test]
    fn test_fact_tokens() {
        let s = Summarizer::new();
        let facts = s.fact_tokens(
            "The API runs on port 8002, endpoint /api/v1/users, see src/main.rs and `cargo test`. Uses max_retries.",
        );
        assert!(facts.contains(&"8002"));
        assert!(facts.contains(&"/api/v1/users"));
        assert!(facts.contains(&"src/main.rs"));
        assert!(facts.contains(&"`cargo test`"));
        assert!(facts.contains(&"max_retries"));
        assert!(!facts.contains(&"The"));
    }

    #[test]
    fn test_no_facts_in_plain_prose() {
        let s = Summarizer::new();
        assert!(s.fact_tokens("use two space indent in every file").is_empty());
    }

    #[test]
    fn test_leading_clause() {
        let s = Summarizer::new();
        assert_eq!(
            s.leading_clause("SAST and DAST are separate systems. They share nothing."),
            "SAST and DAST are separate systems"
        );
        assert_eq!(s.leading_clause("one clause only"), "one clause only");
        assert_eq!(s.leading_clause("see file.rs for details"), "see file.rs for details");
    }

    #[test]
    fn test_summary_keeps_fact_from_later_sentence() {
        let s = Summarizer::new();
        let text = "The payment service is deployed separately from the main monolith and \
                    has its own database. It listens on port 8002 behind the gateway.";
        let out = s.summarize(text, 12, &words);

        assert!(words(&out) <= 12, "too long: {out}");
        assert!(out.contains("8002"), "fact lost: {out}");
        assert!(out.contains(ELLIPSIS));
    }

    #[test]
    fn test_summary_prefers_facts_over_prose() {
        let s = Summarizer::new();
        let text = "Remember that the staging database for integration runs lives at db.staging.internal";
        let out = s.summarize(text, 3, &words);
        assert!(words(&out) <= 3, "too long: {out}");
        assert!(out.contains("db.staging.internal"), "fact lost: {out}");
    }

    #[test]
    fn test_summary_within_target_with_byte_counter() {
        let s = Summarizer::new();
        let text = "Microservices: API(8002)->Queue(Redis)->Workers, each worker pulls jobs \
                    and writes results to the results bucket at s3://results/out";
        for target in [4, 8, 12, 20] {
            let out = s.summarize(text, target, &ApproxCounter);
            assert!(ApproxCounter.count(&out) <= target, "target {target}: {out}");
        }
    }

    #[test]
    fn test_idempotent() {
        let s = Summarizer::new();
        let text = "Never call the billing API (/v2/charge) without an idempotency key. \
                    Retries otherwise double-charge customers.";
        for target in [2, 5, 9] {
            let once = s.summarize(text, target, &words);
            let twice = s.summarize(&once, target, &words);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_zero_target() {
        let s = Summarizer::new();
        assert_eq!(s.summarize("anything at all", 0, &words), "");
    }
}
