//! Candidate collection: seeds, seed-link expansion, and search results,
//! deduplicated by normalized URL.

use std::collections::HashSet;

use tracing::debug;

use asky_core::config::ShortlistConfig;

use crate::text::normalize_whitespace;
use crate::urlutil::{hostname_of, is_http_url, normalize_url};

use super::types::{
    CandidateRecord, SearchProvider, SeedLinkSource, ShortlistMetrics, SourceType,
};

const SEED_LINK_BLOCKED_HOST_PREFIXES: &[&str] =
    &["profile.", "support.", "accounts.", "account.", "id."];

const SEED_LINK_BLOCKED_PATH_MARKERS: &[&str] = &[
    "/signin",
    "/sign-in",
    "/signup",
    "/sign-up",
    "/register",
    "/login",
    "/logout",
    "/account",
    "/accounts",
    "/preferences",
    "/preference",
    "/privacy",
    "/terms",
    "/cookie",
    "/subscribe",
];

const MAX_TITLE_CHARS: usize = 180;

/// Filter known low-value utility/auth links during seed-link expansion.
fn is_blocked_seed_link(url: &str) -> bool {
    let normalized = normalize_url(url);
    if normalized.is_empty() {
        return true;
    }
    let hostname = hostname_of(&normalized);
    let lowered = normalized.to_lowercase();
    if SEED_LINK_BLOCKED_HOST_PREFIXES
        .iter()
        .any(|prefix| hostname.starts_with(prefix))
    {
        return true;
    }
    SEED_LINK_BLOCKED_PATH_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Build the deduplicated candidate list for the shortlist fetch stage.
pub async fn collect_candidates(
    seed_urls: &[String],
    search_queries: &[String],
    search: &dyn SearchProvider,
    seed_links: &dyn SeedLinkSource,
    cfg: &ShortlistConfig,
    warnings: &mut Vec<String>,
    metrics: &mut ShortlistMetrics,
) -> Vec<CandidateRecord> {
    let mut candidates: Vec<CandidateRecord> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let push_candidate = |candidates: &mut Vec<CandidateRecord>,
                              seen: &mut HashSet<String>,
                              metrics: &mut ShortlistMetrics,
                              url: &str,
                              source_type: SourceType|
     -> bool {
        metrics.candidate_inputs += 1;
        if !is_http_url(url) {
            return false;
        }
        let normalized = normalize_url(url);
        if normalized.is_empty() || !seen.insert(normalized.clone()) {
            return false;
        }
        metrics.candidate_deduped += 1;
        candidates.push(CandidateRecord::new(url.to_string(), normalized, source_type));
        true
    };

    // Seed URLs first so they land within the fetch budget.
    for seed in seed_urls {
        push_candidate(&mut candidates, &mut seen, metrics, seed, SourceType::Seed);
    }

    // Seed-link expansion: discover outbound links from the first pages.
    if cfg.seed_link_expansion_enabled && !seed_urls.is_empty() {
        for seed in seed_urls.iter().take(cfg.seed_link_max_pages) {
            metrics.seed_link_pages_attempted += 1;
            let payload = seed_links.links(seed).await;
            if let Some(error) = payload.error {
                metrics.seed_link_failures += 1;
                warnings.push(error);
                continue;
            }
            metrics.seed_link_pages_success += 1;
            metrics.seed_link_discovered += payload.links.len();

            let mut added_for_page = 0usize;
            for link in &payload.links {
                if added_for_page >= cfg.seed_links_per_page {
                    break;
                }
                if !is_http_url(&link.href) || is_blocked_seed_link(&link.href) {
                    continue;
                }
                if push_candidate(
                    &mut candidates,
                    &mut seen,
                    metrics,
                    &link.href,
                    SourceType::SeedLink,
                ) {
                    if let Some(candidate) = candidates.last_mut() {
                        candidate.title =
                            normalize_whitespace(&link.text).chars().take(MAX_TITLE_CHARS).collect();
                    }
                    metrics.seed_link_added += 1;
                    added_for_page += 1;
                }
            }
        }
    }

    // Search candidates, unless seeds were given and seed-only mode is on.
    let skip_search = !seed_urls.is_empty() && !cfg.search_with_seed_urls;
    if !skip_search {
        for query in search_queries {
            if query.trim().is_empty() {
                continue;
            }
            metrics.search_calls += 1;
            match search.search(query, cfg.search_result_count).await {
                Ok(hits) => {
                    metrics.search_results += hits.len();
                    for hit in hits {
                        if push_candidate(
                            &mut candidates,
                            &mut seen,
                            metrics,
                            &hit.url,
                            SourceType::Search,
                        ) {
                            if let Some(candidate) = candidates.last_mut() {
                                candidate.title = normalize_whitespace(&hit.title)
                                    .chars()
                                    .take(MAX_TITLE_CHARS)
                                    .collect();
                                candidate.snippet = normalize_whitespace(&hit.snippet);
                                candidate.date = hit.date.clone();
                            }
                        }
                    }
                }
                Err(e) => warnings.push(format!("search_error:{e}")),
            }
        }
    }

    candidates.truncate(cfg.max_candidates);
    debug!(
        seeds = seed_urls.len(),
        collected = candidates.len(),
        "shortlist candidates collected"
    );
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_seed_links_are_filtered() {
        assert!(is_blocked_seed_link("https://accounts.ex.com/profile"));
        assert!(is_blocked_seed_link("https://ex.com/signin"));
        assert!(is_blocked_seed_link("https://ex.com/help/privacy"));
        assert!(!is_blocked_seed_link("https://ex.com/articles/rust"));
    }
}
