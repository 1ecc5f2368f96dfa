//! Small text helpers shared by the shortlist and retrieval paths.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern"))
}

pub fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9_]{2,}").expect("token pattern"))
}

/// Collapse repeated whitespace for stable matching and snippets.
pub fn normalize_whitespace(value: &str) -> String {
    whitespace_pattern().replace_all(value, " ").trim().to_string()
}

/// Lowercased lexical terms of two or more word characters.
pub fn tokenize(text: &str) -> HashSet<String> {
    token_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Deduplicate while preserving first-seen ordering.
pub fn dedupe_preserve_order<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values {
        let value: String = value.into();
        if value.is_empty() || !seen.insert(value.clone()) {
            continue;
        }
        out.push(value);
    }
    out
}

/// Truncate to `max_chars` with an explicit ellipsis suffix.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    const SUFFIX: &str = "...";
    if max_chars == 0 {
        return String::new();
    }
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    if max_chars <= SUFFIX.len() {
        return SUFFIX.chars().take(max_chars).collect();
    }
    let head: String = text.chars().take(max_chars - SUFFIX.len()).collect();
    format!("{head}{SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_collapses() {
        assert_eq!(normalize_whitespace("  a\t b\n\nc "), "a b c");
    }

    #[test]
    fn tokenize_lowercases_and_drops_short() {
        let tokens = tokenize("Rust IS a Systems-language x");
        assert!(tokens.contains("rust"));
        assert!(tokens.contains("is"));
        assert!(!tokens.contains("a"));
        assert!(!tokens.contains("x"));
    }

    #[test]
    fn dedupe_keeps_first_seen() {
        let out = dedupe_preserve_order(vec!["b", "a", "b", "c", "a"]);
        assert_eq!(out, vec!["b", "a", "c"]);
    }

    #[test]
    fn truncation_signals_explicitly() {
        assert_eq!(truncate_with_ellipsis("abcdef", 5), "ab...");
        assert_eq!(truncate_with_ellipsis("abc", 5), "abc");
        assert_eq!(truncate_with_ellipsis("abcdef", 2), "..".to_string());
    }
}
