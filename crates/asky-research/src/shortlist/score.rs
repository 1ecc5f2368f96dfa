//! Composite candidate scoring: embedding similarity, keyphrase overlap,
//! domain affinity, and structural penalties.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use asky_core::config::ShortlistConfig;

use crate::embeddings::Embedder;
use crate::text::{normalize_whitespace, tokenize};
use crate::vector::cosine_similarity;

use super::types::{CandidateRecord, ShortlistMetrics, SourceType};

/// Same-domain bonus only applies once some semantic signal exists, so an
/// unrelated page on a seed's domain cannot ride the bonus alone.
const SAME_DOMAIN_BONUS_MIN_SIGNAL: f64 = 0.05;
const SEED_CANDIDATE_BOOST: f64 = 0.05;
const MAX_REASON_COUNT: usize = 4;

const NOISE_PATH_MARKERS: &[&str] = &[
    "/tag/",
    "/category/",
    "/login",
    "/signin",
    "/sign-in",
    "/signup",
    "/sign-up",
    "/register",
    "/privacy",
    "/terms",
    "/cookie",
    "/subscribe",
    "/preference/",
    "/preferences/",
    "/account/",
    "/accounts/",
    "/edition/",
];

fn is_noise_path(url: &str) -> bool {
    let lowered = url.to_lowercase();
    NOISE_PATH_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Pick the text(s) used as the semantic query for scoring. Explicit
/// expanded queries win, then the prompt text, then keyphrases, then the
/// lead of the best candidate as a last resort.
pub fn resolve_scoring_queries(
    explicit_queries: Option<&[String]>,
    query_text: &str,
    keyphrases: &[String],
    candidates: &[CandidateRecord],
    cfg: &ShortlistConfig,
) -> Vec<String> {
    if let Some(queries) = explicit_queries {
        let cleaned: Vec<String> = queries
            .iter()
            .map(|q| normalize_whitespace(q))
            .filter(|q| !q.is_empty())
            .collect();
        if !cleaned.is_empty() {
            return cleaned;
        }
    }
    let normalized = normalize_whitespace(query_text);
    if !normalized.is_empty() {
        return vec![normalized];
    }
    if !keyphrases.is_empty() {
        return vec![keyphrases.join(" ")];
    }
    candidates
        .first()
        .map(|c| {
            let lead: String = c.text.chars().take(cfg.query_fallback_chars).collect();
            vec![normalize_whitespace(&lead)]
        })
        .unwrap_or_default()
}

/// Score fetched candidates in place.
pub async fn score_candidates(
    candidates: &mut [CandidateRecord],
    scoring_queries: &[String],
    keyphrases: &[String],
    seed_hostnames: &HashSet<String>,
    embedder: Option<&Arc<dyn Embedder>>,
    cfg: &ShortlistConfig,
    warnings: &mut Vec<String>,
    metrics: &mut ShortlistMetrics,
) {
    // Dense similarity between the query and each document lead, skipped
    // entirely when the embedder carries a sticky failure.
    let mut query_vectors: Vec<Vec<f32>> = Vec::new();
    let mut doc_vectors: Vec<Option<Vec<f32>>> = vec![None; candidates.len()];
    if let Some(embedder) = embedder {
        if !embedder.has_model_load_failure() && !scoring_queries.is_empty() {
            metrics.embedding_query_calls += 1;
            match embedder.embed(scoring_queries).await {
                Ok(vectors) => query_vectors = vectors,
                Err(e) => warnings.push(format!("embedding_error:{e}")),
            }

            if !query_vectors.is_empty() {
                let leads: Vec<String> = candidates
                    .iter()
                    .map(|c| c.text.chars().take(cfg.doc_lead_chars).collect())
                    .collect();
                metrics.embedding_doc_calls += 1;
                metrics.embedding_doc_count += leads.len();
                match embedder.embed(&leads).await {
                    Ok(vectors) => {
                        for (slot, vector) in doc_vectors.iter_mut().zip(vectors) {
                            *slot = Some(vector);
                        }
                    }
                    Err(e) => warnings.push(format!("embedding_error:{e}")),
                }
            }
        }
    }

    let keyphrase_tokens: Vec<HashSet<String>> =
        keyphrases.iter().map(|p| tokenize(p)).collect();

    for (index, candidate) in candidates.iter_mut().enumerate() {
        let mut score = 0.0f64;
        let mut reasons: Vec<String> = Vec::new();

        // (a) semantic similarity: best cosine over the scoring queries.
        let semantic = doc_vectors[index]
            .as_ref()
            .map(|doc| {
                query_vectors
                    .iter()
                    .map(|q| cosine_similarity(q, doc))
                    .fold(0.0f64, f64::max)
            })
            .unwrap_or(0.0)
            .max(0.0);
        candidate.semantic_score = semantic;
        if semantic > 0.0 {
            score += semantic;
            reasons.push(format!("semantic relevance {semantic:.2}"));
        }

        // (b) keyphrase overlap against body, title, and path tokens.
        let overlap = if keyphrase_tokens.is_empty() {
            0.0
        } else {
            let haystack = tokenize(&format!(
                "{} {} {}",
                candidate.title, candidate.text, candidate.path_tokens
            ));
            let matched = keyphrase_tokens
                .iter()
                .filter(|phrase| phrase.iter().all(|t| haystack.contains(t)))
                .count();
            matched as f64 / keyphrase_tokens.len() as f64
        };
        if overlap > 0.0 {
            let bonus = overlap * cfg.overlap_bonus_weight;
            score += bonus;
            reasons.push(format!("keyphrase overlap {overlap:.2}"));
        }

        // (c) same-domain bonus, gated on some semantic signal.
        if seed_hostnames.contains(&candidate.hostname)
            && candidate.source_type != SourceType::Seed
            && (semantic + overlap) > SAME_DOMAIN_BONUS_MIN_SIGNAL
        {
            score += cfg.same_domain_bonus;
            reasons.push("same domain as seed".to_string());
        }

        // (d) penalties for thin pages and utility paths.
        if candidate.text.chars().count() < cfg.short_text_threshold {
            score -= cfg.short_text_penalty;
            reasons.push("short page text".to_string());
        }
        if is_noise_path(&candidate.normalized_url) {
            score -= cfg.noise_path_penalty;
            reasons.push("utility path".to_string());
        }

        // (e) seed candidates get a small boost.
        if candidate.source_type == SourceType::Seed {
            score += SEED_CANDIDATE_BOOST;
            reasons.push("seed URL from prompt".to_string());
        }

        reasons.truncate(MAX_REASON_COUNT);
        candidate.final_score = score;
        candidate.why_selected = reasons;
        debug!(
            url = %candidate.url,
            score = candidate.final_score,
            semantic = candidate.semantic_score,
            "candidate scored"
        );
    }

    if query_vectors.is_empty() && embedder.is_some() {
        warn!("shortlist scored without embeddings; lexical signals only");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shortlist::types::SourceType;

    fn candidate(url: &str, text: &str, source_type: SourceType) -> CandidateRecord {
        let mut c = CandidateRecord::new(
            url.to_string(),
            crate::urlutil::normalize_url(url),
            source_type,
        );
        c.text = text.to_string();
        c
    }

    #[tokio::test]
    async fn scoring_without_embedder_uses_lexical_signals() {
        let long_body = "rust async runtime details ".repeat(40);
        let mut candidates = vec![
            candidate("https://ex.com/rust-async", &long_body, SourceType::Search),
            candidate("https://other.com/login", "thin", SourceType::Search),
        ];
        let cfg = asky_core::config::ShortlistConfig::default();
        let mut warnings = Vec::new();
        let mut metrics = ShortlistMetrics::default();
        let keyphrases = vec!["rust".to_string(), "async".to_string()];

        score_candidates(
            &mut candidates,
            &["rust async runtime".to_string()],
            &keyphrases,
            &HashSet::new(),
            None,
            &cfg,
            &mut warnings,
            &mut metrics,
        )
        .await;

        assert!(candidates[0].final_score > candidates[1].final_score);
        assert!(candidates[1].final_score < 0.0);
        assert!(candidates[1]
            .why_selected
            .iter()
            .any(|r| r.contains("utility path") || r.contains("short page text")));
    }

    #[tokio::test]
    async fn seed_candidates_get_boost() {
        let body = "substantial content about the requested topic ".repeat(30);
        let mut candidates = vec![
            candidate("https://ex.com/a", &body, SourceType::Seed),
            candidate("https://ex.com/b", &body, SourceType::Search),
        ];
        let cfg = asky_core::config::ShortlistConfig::default();
        let mut warnings = Vec::new();
        let mut metrics = ShortlistMetrics::default();

        score_candidates(
            &mut candidates,
            &["topic".to_string()],
            &[],
            &HashSet::new(),
            None,
            &cfg,
            &mut warnings,
            &mut metrics,
        )
        .await;

        assert!(candidates[0].final_score > candidates[1].final_score);
    }

    #[test]
    fn scoring_queries_prefer_explicit_expansion() {
        let cfg = asky_core::config::ShortlistConfig::default();
        let queries = vec!["sub one".to_string(), "sub two".to_string()];
        let resolved =
            resolve_scoring_queries(Some(&queries), "prompt text", &[], &[], &cfg);
        assert_eq!(resolved, queries);

        let fallback = resolve_scoring_queries(None, "prompt text", &[], &[], &cfg);
        assert_eq!(fallback, vec!["prompt text".to_string()]);
    }
}
