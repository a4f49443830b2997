//! Keyword relevance used by `vibemem context` to preview what an assistant
//! would see for a query. Plain word overlap, no semantic search.

use super::record::{MemoryRecord, Priority};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

const CATEGORY_MATCH: i32 = 10;
const WORD_OVERLAP: i32 = 2;
const SUBSTRING_MATCH: i32 = 5;
const CRITICAL_BOOST: i32 = 5;
const LOW_PENALTY: i32 = 2;
const FRESH_DAY_BOOST: i32 = 3;
const FRESH_WEEK_BOOST: i32 = 1;

/// Score one record against a query. `now` is passed in so ranking stays
/// reproducible in tests.
pub fn relevance_score(record: &MemoryRecord, query: &str, now: DateTime<Utc>) -> i32 {
    let query = query.to_lowercase();
    let query_words: HashSet<&str> = query.split_whitespace().collect();
    let content = record.content.to_lowercase();
    let category = record.category.to_string();

    let mut score = 0;

    if query.contains(&category) || (!query.is_empty() && category.contains(&query)) {
        score += CATEGORY_MATCH;
    }

    let content_words: HashSet<&str> = content.split_whitespace().collect();
    score += WORD_OVERLAP * query_words.intersection(&content_words).count() as i32;

    if !query.is_empty() && content.contains(&query) {
        score += SUBSTRING_MATCH;
    }

    match record.priority {
        Priority::Critical => score += CRITICAL_BOOST,
        Priority::Low => score -= LOW_PENALTY,
        Priority::Normal => {}
    }

    let age_hours = (now - record.updated_at).num_hours();
    if age_hours < 24 {
        score += FRESH_DAY_BOOST;
    } else if age_hours < 24 * 7 {
        score += FRESH_WEEK_BOOST;
    }

    score
}

/// Records with a positive score, best first, at most `max_items`.
pub fn rank_relevant<'a>(
    records: &'a [MemoryRecord],
    query: &str,
    now: DateTime<Utc>,
    max_items: usize,
) -> Vec<&'a MemoryRecord> {
    let mut scored: Vec<(i32, &MemoryRecord)> = records
        .iter()
        .map(|r| (relevance_score(r, query, now), r))
        .filter(|(score, _)| *score > 0)
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.cmp(sa)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    scored.into_iter().take(max_items).map(|(_, r)| r).collect()
}
