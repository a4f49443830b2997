//! Budget selection.
//!
//! Records are walked in tier order (critical, preserved normal, other
//! normal, low), most recently updated first within a tier. Critical records
//! are always kept whole; everything else competes for what is left.

use super::{CompressionConfig, Strategy, Summarizer};
use crate::memory::{MemoryRecord, Priority};
use crate::tokens::TokenCounter;
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// What happens to one record in a rendered file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    KeepFull,
    Summarize,
    /// Only a pointer (id + category) is emitted
    Drop,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepFull => write!(f, "keep"),
            Self::Summarize => write!(f, "summarize"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

/// A record with its decision and the text the renderer should emit
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedEntry {
    pub record: MemoryRecord,
    pub decision: Decision,
    /// Full content, summary, or pointer text for drops
    pub text: String,
    /// Content tokens charged against the budget (0 for drops)
    pub tokens: usize,
    /// Tokens of the full content
    pub full_tokens: usize,
    /// False for drops whose pointer did not fit; those are only counted
    /// in the trailing "more" line
    pub listed: bool,
}

/// Outcome of one selection pass, in emission order
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub entries: Vec<SelectedEntry>,
    pub budget: usize,
    /// Cost of the critical tier alone
    pub critical_tokens: usize,
    /// Tokens charged for kept and summarized entries
    pub used_tokens: usize,
    /// Tokens charged for pointer lines and the trailing "more" line
    pub pointer_tokens: usize,
    /// Critical content alone exceeds the budget
    pub critical_overflow: bool,
}

impl Selection {
    pub fn count(&self, decision: Decision) -> usize {
        self.entries.iter().filter(|e| e.decision == decision).count()
    }

    pub fn decision_for(&self, id: &str) -> Option<Decision> {
        self.entries
            .iter()
            .find(|e| e.record.id == id)
            .map(|e| e.decision)
    }

    /// Drops collapsed into the trailing "more" line
    pub fn omitted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.decision == Decision::Drop && !e.listed)
            .count()
    }

    /// Total size of every record had nothing been compressed
    pub fn full_tokens(&self) -> usize {
        self.entries.iter().map(|e| e.full_tokens).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Critical = 0,
    Preserved = 1,
    Normal = 2,
    Low = 3,
}

fn tier_of(record: &MemoryRecord, config: &CompressionConfig) -> Tier {
    match record.priority {
        Priority::Critical => Tier::Critical,
        Priority::Low => Tier::Low,
        Priority::Normal if config.is_preserved(&record.category) => Tier::Preserved,
        Priority::Normal => Tier::Normal,
    }
}

/// Newest first. The trailing keys make this a total order so that the
/// caller's input order never leaks into the result.
fn recency_order(a: &MemoryRecord, b: &MemoryRecord) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.content.cmp(&b.content))
        .then_with(|| a.category.cmp(&b.category))
}

fn pointer_text(record: &MemoryRecord) -> String {
    format!("{} ({})", record.id, record.category)
}

/// Markdown line listing a dropped record
pub(crate) fn pointer_line(record: &MemoryRecord) -> String {
    format!("- `{}` ({})", record.id, record.category)
}

/// Markdown line standing in for drops whose pointers did not fit
pub(crate) fn more_line(count: usize) -> String {
    format!("- …and {count} more (`vibemem show`)")
}

/// Decide KEEP_FULL / SUMMARIZE / DROP for every record against `budget`.
pub fn select(
    records: &[MemoryRecord],
    budget: usize,
    config: &CompressionConfig,
    summarizer: &Summarizer,
    counter: &dyn TokenCounter,
) -> Selection {
    let mut ordered: Vec<(Tier, &MemoryRecord)> =
        records.iter().map(|r| (tier_of(r, config), r)).collect();
    ordered.sort_by(|(ta, a), (tb, b)| ta.cmp(tb).then_with(|| recency_order(a, b)));

    let mut pass = Pass {
        config,
        summarizer,
        counter,
        budget: budget as i64,
        remaining: budget as i64,
        pointer_tokens: 0,
        entries: Vec::with_capacity(records.len()),
    };

    let mut critical_tokens = 0;
    for (tier, record) in &ordered {
        if *tier == Tier::Critical {
            critical_tokens += pass.keep_critical(record);
        } else {
            pass.place(record);
        }
    }

    let omitted = pass.entries.iter().filter(|e| !e.listed).count();
    if omitted > 0 {
        let cost = counter.count(&more_line(omitted));
        pass.remaining -= cost as i64;
        pass.pointer_tokens += cost;
    }

    let critical_overflow = critical_tokens > budget;
    let used_tokens = pass.entries.iter().map(|e| e.tokens).sum();

    debug!(
        "Selected {} records for budget {} ({} used, {} on pointers, {} omitted, {} critical)",
        pass.entries.len(),
        budget,
        used_tokens,
        pass.pointer_tokens,
        omitted,
        critical_tokens
    );

    Selection {
        entries: pass.entries,
        budget,
        critical_tokens,
        used_tokens,
        pointer_tokens: pass.pointer_tokens,
        critical_overflow,
    }
}

struct Pass<'a> {
    config: &'a CompressionConfig,
    summarizer: &'a Summarizer,
    counter: &'a dyn TokenCounter,
    budget: i64,
    /// Goes negative when critical content or slack overruns the budget
    remaining: i64,
    pointer_tokens: usize,
    entries: Vec<SelectedEntry>,
}

impl Pass<'_> {
    fn keep_critical(&mut self, record: &MemoryRecord) -> usize {
        let size = record.size_tokens(self.counter);
        self.remaining -= size as i64;
        self.push(record, Decision::KeepFull, record.content.clone(), size, size);
        size
    }

    fn place(&mut self, record: &MemoryRecord) {
        let size = record.size_tokens(self.counter);
        let preserved = self.config.is_preserved(&record.category);
        let fits = self.remaining > 0 && size as i64 <= self.remaining;

        match self.config.strategy {
            Strategy::Truncate => {
                if fits {
                    self.keep(record, size);
                } else {
                    self.pointer(record, size);
                }
            }
            Strategy::Smart => {
                if fits {
                    self.keep(record, size);
                } else if preserved {
                    let target = self.remaining.max(0) as usize;
                    self.try_summary(record, size, target, true);
                } else {
                    self.pointer(record, size);
                }
            }
            Strategy::Summarize => {
                let used = self.budget - self.remaining;
                let past_threshold =
                    used as f64 > self.config.summarize_threshold * self.budget as f64;

                if !preserved && self.remaining <= 0 {
                    self.pointer(record, size);
                } else if past_threshold {
                    let target = (size / 2).min(self.remaining.max(0) as usize);
                    self.try_summary(record, size, target, preserved);
                } else if fits {
                    self.keep(record, size);
                } else {
                    let target = self.remaining.max(0) as usize;
                    self.try_summary(record, size, target, preserved);
                }
            }
        }
    }

    /// Summarize toward `target` (raised to the floor) and accept it if the
    /// charge fits, with slack for preserved categories.
    fn try_summary(&mut self, record: &MemoryRecord, size: usize, target: usize, allow_slack: bool) {
        let floor = self.summary_floor(record);
        let summary = self
            .summarizer
            .summarize(&record.content, target.max(floor), self.counter);

        // Unchanged means the content was already within the target.
        let (decision, charge) = if summary == record.content {
            (Decision::KeepFull, size)
        } else {
            let charge = self.counter.count(&summary).max(floor).min(size);
            (Decision::Summarize, charge)
        };

        let limit = if allow_slack {
            -(self.config.overflow_slack as i64)
        } else {
            0
        };

        if self.remaining - (charge as i64) >= limit {
            self.remaining -= charge as i64;
            self.push(record, decision, summary, charge, size);
        } else {
            self.pointer(record, size);
        }
    }

    fn summary_floor(&self, record: &MemoryRecord) -> usize {
        self.counter.count(&format!("[{}]", record.category)) + self.config.min_excerpt_tokens
    }

    fn keep(&mut self, record: &MemoryRecord, size: usize) {
        self.remaining -= size as i64;
        self.push(record, Decision::KeepFull, record.content.clone(), size, size);
    }

    /// Drop the record. Its pointer line is charged like content and is
    /// left out when the remaining budget can't hold it.
    fn pointer(&mut self, record: &MemoryRecord, size: usize) {
        let cost = self.counter.count(&pointer_line(record));
        let listed = self.remaining >= cost as i64;
        if listed {
            self.remaining -= cost as i64;
            self.pointer_tokens += cost;
        }
        self.entries.push(SelectedEntry {
            record: record.clone(),
            decision: Decision::Drop,
            text: pointer_text(record),
            tokens: 0,
            full_tokens: size,
            listed,
        });
    }

    fn push(&mut self, record: &MemoryRecord, decision: Decision, text: String, tokens: usize, full_tokens: usize) {
        self.entries.push(SelectedEntry {
            record: record.clone(),
            decision,
            text,
            tokens,
            full_tokens,
            listed: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Category, Scope};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn record(id: &str, category: Category, priority: Priority, content: &str, age_days: i64) -> MemoryRecord {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let at = base - Duration::days(age_days);
        MemoryRecord {
            id: id.to_string(),
            category,
            content: content.to_string(),
            priority,
            scope: Scope::Project,
            created_at: at,
            updated_at: at,
        }
    }

    fn example_records() -> Vec<MemoryRecord> {
        vec![
            record("1", Category::Gotcha, Priority::Critical, "NEVER use md5 for passwords", 10),
            record(
                "2",
                Category::Arch,
                Priority::Normal,
                "Microservices: API(8002)->Queue(Redis)->Workers",
                1,
            ),
            record("3", Category::Style, Priority::Low, "use 2-space indent", 300),
        ]
    }

    /// 6 / 14 / 6 tokens for the three example records, words otherwise.
    fn example_counter() -> impl Fn(&str) -> usize {
        let sizes: HashMap<&'static str, usize> = [
            ("NEVER use md5 for passwords", 6),
            ("Microservices: API(8002)->Queue(Redis)->Workers", 14),
            ("use 2-space indent", 6),
        ]
        .into_iter()
        .collect();
        move |text: &str| {
            sizes
                .get(text)
                .copied()
                .unwrap_or_else(|| text.split_whitespace().count())
        }
    }

    #[test]
    fn test_example_budget_20() {
        let counter = example_counter();
        let selection = select(
            &example_records(),
            20,
            &CompressionConfig::default(),
            &Summarizer::new(),
            &counter,
        );

        assert_eq!(selection.decision_for("1"), Some(Decision::KeepFull));
        assert_eq!(selection.decision_for("2"), Some(Decision::KeepFull));
        assert_eq!(selection.decision_for("3"), Some(Decision::Drop));
        assert_eq!(selection.used_tokens, 20);
        assert_eq!(selection.critical_tokens, 6);
        assert!(!selection.critical_overflow);

        // Nothing is left for the style pointer, so only the "more" line is charged.
        let dropped = &selection.entries[2];
        assert_eq!(dropped.text, "3 (style)");
        assert_eq!(dropped.tokens, 0);
        assert!(!dropped.listed);
        assert_eq!(selection.omitted(), 1);
        assert_eq!(selection.pointer_tokens, counter(&more_line(1)));
    }

    #[test]
    fn test_pointer_lines_are_charged() {
        let records = vec![
            record("big", Category::Gotcha, Priority::Normal, "one two three four five six", 1),
            record("mid", Category::Gotcha, Priority::Normal, "one two three four", 2),
            record("small", Category::Gotcha, Priority::Normal, "one two three", 3),
        ];
        let words = |t: &str| t.split_whitespace().count();
        let config = CompressionConfig::default().with_strategy(Strategy::Truncate);

        // "big" drops and its 3-token pointer leaves 2 of 5, too few for the
        // other two or for their pointers.
        let selection = select(&records, 5, &config, &Summarizer::new(), &words);
        assert_eq!(selection.decision_for("big"), Some(Decision::Drop));
        assert_eq!(selection.decision_for("mid"), Some(Decision::Drop));
        assert_eq!(selection.decision_for("small"), Some(Decision::Drop));
        assert!(selection.entries[0].listed);
        assert_eq!(selection.omitted(), 2);
        assert_eq!(selection.pointer_tokens, 3 + words(&more_line(2)));
    }

    #[test]
    fn test_example_budget_8_preserved_arch_is_summarized() {
        let counter = example_counter();
        let selection = select(
            &example_records(),
            8,
            &CompressionConfig::default(),
            &Summarizer::new(),
            &counter,
        );

        assert_eq!(selection.decision_for("1"), Some(Decision::KeepFull));
        assert_eq!(selection.decision_for("2"), Some(Decision::Summarize));
        assert_eq!(selection.decision_for("3"), Some(Decision::Drop));

        let summarized = &selection.entries[1];
        assert!(summarized.tokens < summarized.full_tokens);
        assert!(summarized.text.contains("8002"));
    }

    #[test]
    fn test_example_budget_8_without_preservation_drops() {
        let counter = example_counter();
        let config = CompressionConfig::default().with_preserve_categories([]);
        let selection = select(&example_records(), 8, &config, &Summarizer::new(), &counter);

        assert_eq!(selection.decision_for("1"), Some(Decision::KeepFull));
        assert_eq!(selection.decision_for("2"), Some(Decision::Drop));
        assert_eq!(selection.decision_for("3"), Some(Decision::Drop));
    }

    #[test]
    fn test_summary_needs_slack() {
        let counter = example_counter();
        let config = CompressionConfig::default().with_overflow_slack(0);
        let selection = select(&example_records(), 8, &config, &Summarizer::new(), &counter);

        // Floor is 1 + 8 tokens, only 2 remain and no slack is allowed.
        assert_eq!(selection.decision_for("2"), Some(Decision::Drop));
    }

    #[test]
    fn test_critical_overflow_eats_into_slack() {
        let long = "The billing worker retries failed charges with exponential backoff \
                    starting at 30 seconds and gives up after the fifth attempt";
        let words = |t: &str| t.split_whitespace().count();
        let critical = |n: usize| {
            let content = vec!["word"; n].join(" ");
            vec![
                record("crit", Category::Cred, Priority::Critical, &content, 5),
                record("arch", Category::Arch, Priority::Normal, long, 1),
            ]
        };

        // A 9-token summary from a balance of -3 stays within 16 of slack,
        // from -10 it would not.
        let config = CompressionConfig::default();
        let small = select(&critical(13), 10, &config, &Summarizer::new(), &words);
        assert_eq!(small.decision_for("arch"), Some(Decision::Summarize));
        let large = select(&critical(20), 10, &config, &Summarizer::new(), &words);
        assert_eq!(large.decision_for("arch"), Some(Decision::Drop));
    }

    #[test]
    fn test_critical_never_dropped_even_over_budget() {
        let counter = example_counter();
        let selection = select(
            &example_records(),
            3,
            &CompressionConfig::default(),
            &Summarizer::new(),
            &counter,
        );

        assert_eq!(selection.decision_for("1"), Some(Decision::KeepFull));
        assert!(selection.critical_overflow);
    }

    #[test]
    fn test_emission_order_is_tier_then_recency() {
        let records = vec![
            record("low", Category::Style, Priority::Low, "a", 0),
            record("old", Category::Gotcha, Priority::Normal, "b", 50),
            record("new", Category::Gotcha, Priority::Normal, "c", 1),
            record("arch", Category::Arch, Priority::Normal, "d", 90),
            record("crit", Category::Cred, Priority::Critical, "e", 400),
        ];
        let words = |t: &str| t.split_whitespace().count();
        let selection = select(
            &records,
            100,
            &CompressionConfig::default(),
            &Summarizer::new(),
            &words,
        );

        let order: Vec<&str> = selection.entries.iter().map(|e| e.record.id.as_str()).collect();
        assert_eq!(order, vec!["crit", "arch", "new", "old", "low"]);
        assert_eq!(selection.count(Decision::KeepFull), 5);
    }

    #[test]
    fn test_greedy_keeps_smaller_later_record() {
        let records = vec![
            record("big", Category::Gotcha, Priority::Normal, "one two three four five six", 1),
            record("small", Category::Gotcha, Priority::Normal, "one two", 2),
        ];
        let words = |t: &str| t.split_whitespace().count();
        let config = CompressionConfig::default().with_strategy(Strategy::Truncate);
        // 3 of the 5 tokens go to the pointer for "big"
        let selection = select(&records, 5, &config, &Summarizer::new(), &words);

        assert_eq!(selection.decision_for("big"), Some(Decision::Drop));
        assert_eq!(selection.decision_for("small"), Some(Decision::KeepFull));
    }

    #[test]
    fn test_truncate_never_summarizes() {
        let counter = example_counter();
        let config = CompressionConfig::default().with_strategy(Strategy::Truncate);
        let selection = select(&example_records(), 8, &config, &Summarizer::new(), &counter);

        assert_eq!(selection.count(Decision::Summarize), 0);
        assert_eq!(selection.decision_for("2"), Some(Decision::Drop));
    }

    #[test]
    fn test_summarize_strategy_shortens_past_threshold() {
        let long = "The billing worker retries failed charges with exponential backoff \
                    starting at 30 seconds and gives up after the fifth attempt";
        let records = vec![
            record(
                "crit",
                Category::Cred,
                Priority::Critical,
                "one two three four five six seven eight nine ten eleven twelve thirteen",
                5,
            ),
            record("a", Category::Gotcha, Priority::Normal, long, 1),
        ];
        let words = |t: &str| t.split_whitespace().count();
        let config = CompressionConfig::default()
            .with_strategy(Strategy::Summarize)
            .with_preserve_categories([]);

        // Critical uses 13 of 24, past half, so the gotcha is shortened to
        // at most half its size while smart simply drops it.
        let selection = select(&records, 24, &config, &Summarizer::new(), &words);
        assert_eq!(selection.decision_for("a"), Some(Decision::Summarize));
        let entry = &selection.entries[1];
        assert_eq!(entry.full_tokens, 20);
        assert!(entry.tokens <= 10);
        assert!(entry.text.contains("30"));

        let smart = select(
            &records,
            24,
            &config.clone().with_strategy(Strategy::Smart),
            &Summarizer::new(),
            &words,
        );
        assert_eq!(smart.decision_for("a"), Some(Decision::Drop));
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let counter = example_counter();
        let config = CompressionConfig::default();
        let mut reversed = example_records();
        reversed.reverse();

        let a = select(&example_records(), 8, &config, &Summarizer::new(), &counter);
        let b = select(&reversed, 8, &config, &Summarizer::new(), &counter);
        assert_eq!(a, b);
    }
}
