//! Language-independent keyphrase extraction for search query building.
//!
//! Frequency-ranked content tokens with a stopword filter; ties broken by
//! first appearance so phrase order follows the prompt.

use std::collections::HashMap;

use crate::text::{normalize_whitespace, token_pattern};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "that", "this", "these", "those", "from",
    "what", "which", "when", "where", "who", "whom", "how", "why", "can", "could", "should",
    "would", "will", "shall", "may", "might", "must", "about", "into", "onto", "over", "under",
    "between", "after", "before", "than", "then", "them", "they", "their", "there", "here",
    "have", "has", "had", "does", "did", "done", "been", "being", "its", "it's", "not", "but",
    "you", "your", "our", "out", "all", "any", "each", "per", "via", "use", "using", "used",
    "get", "got", "make", "made", "please", "tell", "give", "show", "find", "list", "explain",
    "summarize", "describe", "compare",
];

/// Extract up to `top_k` keyphrases from the query text. Queries shorter
/// than `min_query_chars` yield nothing.
pub fn extract_keyphrases(query_text: &str, min_query_chars: usize, top_k: usize) -> Vec<String> {
    let normalized = normalize_whitespace(query_text);
    if normalized.chars().count() < min_query_chars {
        return Vec::new();
    }

    let mut counts: HashMap<String, (usize, usize)> = HashMap::new(); // token -> (count, first index)
    for (position, token) in token_pattern().find_iter(&normalized).enumerate() {
        let lowered = token.as_str().to_lowercase();
        if lowered.len() < 3 || STOPWORDS.contains(&lowered.as_str()) {
            continue;
        }
        let entry = counts.entry(lowered).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(top_k).map(|(token, _, _)| token).collect()
}

/// Compact search query from the top phrases; falls back to the
/// normalized prompt text when no phrases survived.
pub fn build_search_query(query_text: &str, keyphrases: &[String], phrase_count: usize) -> String {
    if !keyphrases.is_empty() {
        let selected: Vec<&str> = keyphrases
            .iter()
            .take(phrase_count)
            .map(|s| s.as_str())
            .collect();
        if !selected.is_empty() {
            return selected.join(" ");
        }
    }
    normalize_whitespace(query_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_queries_yield_nothing() {
        assert!(extract_keyphrases("hi", 12, 8).is_empty());
    }

    #[test]
    fn stopwords_are_filtered_and_frequency_wins() {
        let phrases = extract_keyphrases(
            "compare rust async runtimes and explain how rust executors schedule tasks",
            12,
            4,
        );
        assert_eq!(phrases[0], "rust");
        assert!(phrases.contains(&"async".to_string()) || phrases.contains(&"runtimes".to_string()));
        assert!(!phrases.contains(&"and".to_string()));
        assert!(!phrases.contains(&"explain".to_string()));
    }

    #[test]
    fn search_query_prefers_phrases() {
        let phrases = vec!["rust".to_string(), "executors".to_string(), "latency".to_string()];
        assert_eq!(build_search_query("ignored", &phrases, 2), "rust executors");
        assert_eq!(build_search_query("plain  text ", &[], 3), "plain text");
    }
}
