//! Interaction Heuristics
//!
//! Keyword rules that turn a raw request/response exchange into a memory:
//! which category it belongs to, how important it is and which tags it
//! carries. All cut points are named constants.

use std::collections::{BTreeSet, HashMap};

use super::embeddings::tokenize;
use super::types::MemoryCategory;

/// Characters of the response kept in the stored content
pub const RESPONSE_EXCERPT_CHARS: usize = 200;

/// Maximum number of tags derived from an interaction
pub const MAX_INTERACTION_TAGS: usize = 5;

/// Input longer than this many characters counts as long
pub const LONG_INPUT_CHARS: usize = 100;
/// Input longer than this many characters counts as medium
pub const MEDIUM_INPUT_CHARS: usize = 50;
/// Response longer than this many characters counts as long
pub const LONG_RESPONSE_CHARS: usize = 500;
/// Response longer than this many characters counts as medium
pub const MEDIUM_RESPONSE_CHARS: usize = 200;

/// Importance added per signal keyword found in the input
pub const KEYWORD_IMPORTANCE: f64 = 0.1;
/// Cap on the keyword share of the importance
pub const MAX_KEYWORD_IMPORTANCE: f64 = 0.5;

/// Checked in order; the first category with a hit wins
const CATEGORY_RULES: &[(MemoryCategory, &[&str])] = &[
    (
        MemoryCategory::Decision,
        &["decision", "decide", "chose", "choose", "selected"],
    ),
    (
        MemoryCategory::Pattern,
        &["pattern", "template", "convention"],
    ),
    (
        MemoryCategory::Issue,
        &["issue", "error", "bug", "failure", "broken"],
    ),
    (
        MemoryCategory::Learning,
        &["learning", "learned", "lesson", "experience"],
    ),
];

const IMPORTANCE_KEYWORDS: &[&str] = &[
    "error",
    "issue",
    "decision",
    "important",
    "critical",
    "architecture",
    "design",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "are", "was", "were", "been", "have", "has", "had",
    "does", "did", "will", "would", "could", "should", "this", "that", "from", "into", "input",
    "response",
];

/// Category of an exchange, `Context` when no rule matches
pub fn classify_interaction(input: &str, response: &str) -> MemoryCategory {
    let text = format!("{} {}", input, response).to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(MemoryCategory::Context)
}

/// Importance in `[0, 1]` from input length, signal keywords and
/// response length
pub fn estimate_importance(input: &str, response: &str) -> f64 {
    let length_share = |len: usize, long: usize, medium: usize| {
        if len > long {
            0.3
        } else if len > medium {
            0.2
        } else {
            0.1
        }
    };

    let lower = input.to_lowercase();
    let hits = IMPORTANCE_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count();
    let keyword_share = (hits as f64 * KEYWORD_IMPORTANCE).min(MAX_KEYWORD_IMPORTANCE);

    let total = length_share(input.chars().count(), LONG_INPUT_CHARS, MEDIUM_INPUT_CHARS)
        + keyword_share
        + length_share(
            response.chars().count(),
            LONG_RESPONSE_CHARS,
            MEDIUM_RESPONSE_CHARS,
        );
    total.min(1.0)
}

/// Most frequent non-trivial terms, ties in order of first appearance
pub fn extract_tags(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in tokenize(text).into_iter().enumerate() {
        if token.chars().count() <= 2 || STOP_WORDS.contains(&token.as_str()) {
            continue;
        }
        counts.entry(token).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    ranked.into_iter().take(limit).map(|(term, _)| term).collect()
}

/// Stored content for an exchange, with the response cut to an excerpt
pub fn interaction_content(input: &str, response: &str) -> String {
    let response = response.trim();
    if response.is_empty() {
        return format!("input: {}", input.trim());
    }

    let mut excerpt: String = response.chars().take(RESPONSE_EXCERPT_CHARS).collect();
    if response.chars().count() > RESPONSE_EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    format!("input: {}\nresponse: {}", input.trim(), excerpt)
}

/// Jaccard overlap of the token sets of two texts
pub(crate) fn token_overlap(a: &str, b: &str) -> f64 {
    let a: BTreeSet<String> = tokenize(a).into_iter().collect();
    let b: BTreeSet<String> = tokenize(b).into_iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    shared as f64 / a.union(&b).count() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_first_matching_rule_wins() {
        assert_eq!(
            classify_interaction("We decided to drop the cache", "noted"),
            MemoryCategory::Decision
        );
        assert_eq!(
            classify_interaction("Login throws an error", "check the token"),
            MemoryCategory::Issue
        );
        assert_eq!(
            classify_interaction("Lesson from the outage", ""),
            MemoryCategory::Learning
        );
        // Decision outranks issue
        assert_eq!(
            classify_interaction("decision on the retry bug", ""),
            MemoryCategory::Decision
        );
        assert_eq!(
            classify_interaction("what time is standup", "ten"),
            MemoryCategory::Context
        );
    }

    #[test]
    fn test_importance_components() {
        // Short input, no keywords, short response
        assert!((estimate_importance("hello", "hi") - 0.2).abs() < 1e-9);

        let long_input = "x".repeat(LONG_INPUT_CHARS + 1);
        let long_response = "y".repeat(LONG_RESPONSE_CHARS + 1);
        assert!((estimate_importance(&long_input, &long_response) - 0.6).abs() < 1e-9);

        // Every keyword hits but the keyword share is capped
        let loaded = "critical architecture design decision: important error issue";
        let expected = 0.2 + MAX_KEYWORD_IMPORTANCE + 0.1;
        assert!((estimate_importance(loaded, "") - expected).abs() < 1e-9);
    }

    #[test]
    fn test_extract_tags_by_frequency() {
        let tags = extract_tags("Redis cache for sessions; the cache expires sessions hourly", 2);
        assert_eq!(tags, vec!["cache".to_string(), "session".to_string()]);
        assert!(extract_tags("a an to", 5).is_empty());
    }

    #[test]
    fn test_content_truncates_long_response() {
        let response = "z".repeat(RESPONSE_EXCERPT_CHARS + 10);
        let content = interaction_content(" why? ", &response);
        assert!(content.starts_with("input: why?\nresponse: "));
        assert!(content.ends_with("..."));

        assert_eq!(interaction_content("only input", "  "), "input: only input");
    }

    #[test]
    fn test_token_overlap() {
        assert_eq!(token_overlap("alpha beta", "beta alpha"), 1.0);
        assert!((token_overlap("alpha beta", "alpha gamma") - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(token_overlap("", "alpha"), 0.0);
    }
}
