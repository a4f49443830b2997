//! Token counting
//!
//! Counting is a pluggable service: the compression engine only ever asks a
//! `TokenCounter` how big a string is. Two counters ship with the crate, a
//! cheap byte estimator and the `cl100k_base` BPE used by most assistants.

use crate::{Result, VibememError};
use tiktoken_rs::CoreBPE;

/// Approximate bytes per token for context estimation
const APPROX_BYTES_PER_TOKEN: usize = 4;

/// Counts tokens in a piece of text.
///
/// Implementations must be deterministic: the same text always yields the
/// same count, otherwise selection stops being reproducible.
pub trait TokenCounter {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Byte-length estimate (~4 bytes per token), rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxCounter;

impl TokenCounter for ApproxCounter {
    fn count(&self, text: &str) -> usize {
        text.len().div_ceil(APPROX_BYTES_PER_TOKEN)
    }
}

/// `cl100k_base` BPE counter (GPT-4 / Claude approximate).
pub struct Cl100kCounter {
    bpe: CoreBPE,
}

impl Cl100kCounter {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| VibememError::TokenCounter(e.to_string()))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for Cl100kCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }
}

impl std::fmt::Debug for Cl100kCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cl100kCounter").finish_non_exhaustive()
    }
}

/// Longest prefix of `text` (cut on a char boundary, trailing whitespace
/// trimmed) whose token count is at most `max_tokens`.
pub fn truncate_to_tokens<'a>(text: &'a str, max_tokens: usize, counter: &dyn TokenCounter) -> &'a str {
    if counter.count(text) <= max_tokens {
        return text;
    }

    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    // boundaries[lo] always fits (the empty prefix), boundaries[hi] never does.
    let mut lo = 0;
    let mut hi = boundaries.len() - 1;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if counter.count(&text[..boundaries[mid]]) <= max_tokens {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    text[..boundaries[lo]].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_counter_rounds_up() {
        assert_eq!(ApproxCounter.count(""), 0);
        assert_eq!(ApproxCounter.count("abc"), 1);
        assert_eq!(ApproxCounter.count("abcd"), 1);
        assert_eq!(ApproxCounter.count("abcde"), 2);
    }

    #[test]
    fn test_closure_counter() {
        let words = |text: &str| text.split_whitespace().count();
        assert_eq!(words.count("three small words"), 3);
    }

    #[test]
    fn test_truncate_to_tokens_fits() {
        let text = "API runs on port 8002, not 8000";
        let cut = truncate_to_tokens(text, 3, &ApproxCounter);
        assert!(ApproxCounter.count(cut) <= 3);
        assert!(text.starts_with(cut));

        assert_eq!(truncate_to_tokens(text, 100, &ApproxCounter), text);
        assert_eq!(truncate_to_tokens(text, 0, &ApproxCounter), "");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "暂时先这样实现 with more text";
        let cut = truncate_to_tokens(text, 2, &ApproxCounter);
        assert!(ApproxCounter.count(cut) <= 2);
    }

    #[test]
    fn test_cl100k_counts_words() {
        let counter = Cl100kCounter::new().unwrap();
        assert_eq!(counter.count(""), 0);
        let n = counter.count("NEVER use md5 for passwords");
        assert!(n > 0 && n < 12);
    }
}
