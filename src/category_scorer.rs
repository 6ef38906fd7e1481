//! Weighted ranking of hierarchical category matches.

use std::cmp::Reverse;

use crate::data_models::CategorySuggestion;

const EXACT_NAME: i32 = 100;
const NAME_PREFIX: i32 = 50;
const CATEGORY_PREFIX: i32 = 30;
const SUBCATEGORY_PREFIX: i32 = 25;
const SUBSUBCATEGORY_PREFIX: i32 = 20;
const NAME_CONTAINS: i32 = 15;
const KEY_SEGMENT_CONTAINS: i32 = 10;
const LEVEL_PENALTY: i32 = 2;
/// Deepest level the hierarchy has; deeper values are treated as this one.
const MAX_LEVEL: u8 = 2;

fn starts_with(key: Option<&str>, query: &str) -> bool {
    key.is_some_and(|key| key.to_lowercase().starts_with(query))
}

/// Scores one suggestion against `query`. Matching is case-insensitive and
/// every rule that matches adds to the score; deeper levels pay a small
/// penalty so a top-level category wins a tie.
pub fn score(suggestion: &CategorySuggestion, query: &str) -> i32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0;
    }
    let name = suggestion.display_name.trim().to_lowercase();

    let mut score = 0;
    if name == query {
        score += EXACT_NAME;
    }
    if name.starts_with(&query) {
        score += NAME_PREFIX;
    }
    if starts_with(Some(&suggestion.category_key), &query) {
        score += CATEGORY_PREFIX;
    }
    if starts_with(suggestion.subcategory_key.as_deref(), &query) {
        score += SUBCATEGORY_PREFIX;
    }
    if starts_with(suggestion.subsubcategory_key.as_deref(), &query) {
        score += SUBSUBCATEGORY_PREFIX;
    }
    if name.contains(&query) {
        score += NAME_CONTAINS;
    }
    let segment_match = suggestion.keys().any(|key| {
        key.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .any(|segment| segment.contains(&query))
    });
    if segment_match {
        score += KEY_SEGMENT_CONTAINS;
    }

    score - LEVEL_PENALTY * i32::from(suggestion.level.min(MAX_LEVEL))
}

/// Keeps suggestions scoring above zero, best first, at most `max_results`.
/// Equal scores keep their input order.
pub fn rank(
    suggestions: Vec<CategorySuggestion>,
    query: &str,
    max_results: usize,
) -> Vec<CategorySuggestion> {
    let mut scored: Vec<(i32, CategorySuggestion)> = suggestions
        .into_iter()
        .map(|suggestion| (score(&suggestion, query), suggestion))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by_key(|(score, _)| Reverse(*score));
    scored
        .into_iter()
        .take(max_results)
        .map(|(_, suggestion)| suggestion)
        .collect()
}
