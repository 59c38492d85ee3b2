//! Keyword heuristic that routes a task to a capability tier.

use crate::core::types::Complexity;

const SIMPLE_KEYWORDS: &[&str] = &[
    "typo", "rename", "format", "formatting", "comment", "comments", "docs", "doc", "readme",
    "lint", "bump", "simple", "trivial", "small", "minor", "cleanup", "spelling",
];

const COMPLEX_KEYWORDS: &[&str] = &[
    "refactor", "architecture", "redesign", "migrate", "migration", "concurrency", "concurrent",
    "race", "deadlock", "security", "performance", "optimize", "rewrite", "complex",
    "distributed", "protocol", "algorithm",
];

/// Classify `task` by keyword match.
///
/// Any complex keyword wins over simple ones; no match at all is `Medium`.
pub fn classify_task(task: &str) -> Complexity {
    let lowered = task.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    if words.iter().any(|word| COMPLEX_KEYWORDS.contains(word)) {
        return Complexity::Complex;
    }
    if words.iter().any(|word| SIMPLE_KEYWORDS.contains(word)) {
        return Complexity::Simple;
    }
    Complexity::Medium
}
