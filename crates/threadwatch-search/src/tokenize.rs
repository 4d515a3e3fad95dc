//! Shared tokenization rules for [`crate::index::SearchIndex`] (spec 4.13).

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &["an", "the", "is", "are", "was", "were"];

/// Lowercases `text`, replaces every non-alphanumeric character with a
/// space, splits on whitespace, drops tokens of length <= 1 and stop
/// words, and dedupes.
///
/// Order is not significant to any caller (the index stores sets, and
/// query evaluation intersects them), so the dedupe is a plain
/// `HashSet` rather than an order-preserving pass.
pub(crate) fn tokenize(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    let normalized: String = lower
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    normalized
        .split_whitespace()
        .filter(|token| token.len() > 1 && !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}
