//! URL normalization, prompt URL extraction, and corpus-handle parsing.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::text::normalize_whitespace;

pub const CORPUS_CACHE_HANDLE_PREFIX: &str = "corpus://cache/";
pub const SECTION_REF_FRAGMENT_PREFIX: &str = "#section=";

const TRAILING_URL_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '"', '\''];

/// Query keys stripped during normalization so tracking variants collapse.
const TRACKING_QUERY_KEYS: &[&str] = &[
    "gclid",
    "fbclid",
    "yclid",
    "mc_cid",
    "mc_eid",
    "ref",
    "ref_src",
    "igshid",
    "intcmp",
    "abcmp",
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("url pattern"))
}

fn bare_domain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Bare domains with a path (example.com/docs) get promoted to https.
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?:^|\s)((?:[a-z0-9-]+\.)+[a-z]{2,}/[^\s<>"']*)"#).expect("domain pattern")
    })
}

/// Remove artifacts around a URL token.
pub fn sanitize_url(url: &str) -> String {
    url.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_matches('"')
        .trim_end_matches(TRAILING_URL_PUNCTUATION)
        .to_string()
}

/// Extract seed URLs from a prompt and return the remaining query text.
/// Bare-domain URLs with a path are promoted to `https://`.
pub fn extract_prompt_urls_and_query_text(user_prompt: &str) -> (Vec<String>, String) {
    if user_prompt.is_empty() {
        return (Vec::new(), String::new());
    }

    let mut seed_urls: Vec<String> = Vec::new();
    for m in url_pattern().find_iter(user_prompt) {
        let cleaned = m.as_str().trim_end_matches(TRAILING_URL_PUNCTUATION);
        if !cleaned.is_empty() {
            seed_urls.push(cleaned.to_string());
        }
    }

    let without_urls = url_pattern().replace_all(user_prompt, " ");
    for caps in bare_domain_pattern().captures_iter(&without_urls) {
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let cleaned = raw.trim_end_matches(TRAILING_URL_PUNCTUATION);
        if !cleaned.is_empty() {
            seed_urls.push(format!("https://{cleaned}"));
        }
    }

    let stripped = bare_domain_pattern().replace_all(&without_urls, " ");
    let query_text = normalize_whitespace(&stripped);

    let seed_urls = crate::text::dedupe_preserve_order(seed_urls);
    (seed_urls, query_text)
}

/// Normalize a URL to collapse duplicate variants: lowercase host, drop
/// fragments, strip tracking query keys, order remaining keys.
pub fn normalize_url(raw: &str) -> String {
    let cleaned = sanitize_url(raw);
    let Ok(mut parsed) = Url::parse(&cleaned) else {
        return cleaned;
    };
    if let Some(host) = parsed.host_str().map(|h| h.to_lowercase()) {
        let _ = parsed.set_host(Some(&host));
    }
    parsed.set_fragment(None);

    let kept: BTreeMap<String, String> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_QUERY_KEYS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    let mut out = parsed.to_string();
    if out.ends_with('/') && parsed.path() == "/" && parsed.query().is_none() {
        out.pop();
    }
    out
}

pub fn is_http_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Local-filesystem handles are rejected by web tools; only the explicit
/// local-corpus path may touch them.
pub fn is_local_filesystem_target(target: &str) -> bool {
    let t = target.trim();
    t.starts_with("file://")
        || t.starts_with('/')
        || t.starts_with("./")
        || t.starts_with("../")
        || t.starts_with("~/")
        || (t.len() > 2 && t.as_bytes()[1] == b':' && (t.as_bytes()[2] == b'\\' || t.as_bytes()[2] == b'/'))
}

pub fn hostname_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

/// Lexical tokens from a URL path, for overlap scoring.
pub fn extract_path_tokens(url: &str) -> String {
    let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default();
    path.split(['/', '.', '_', '-'])
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_corpus_handle(cache_id: i64) -> String {
    format!("{CORPUS_CACHE_HANDLE_PREFIX}{cache_id}")
}

pub fn format_section_ref(cache_id: i64, section_id: &str) -> String {
    format!(
        "{}{}{}",
        format_corpus_handle(cache_id),
        SECTION_REF_FRAGMENT_PREFIX,
        section_id
    )
}

/// A parsed `corpus://cache/<id>` token with optional section scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusToken {
    pub is_corpus: bool,
    pub cache_id: Option<i64>,
    pub section_id: Option<String>,
    pub error: Option<String>,
}

const HANDLE_FORMAT_ERROR: &str = "Invalid corpus handle format. Accepted formats: \
corpus://cache/<id> or corpus://cache/<id>#section=<section-id>.";

/// Parse corpus source tokens with optional `#section=` scoping.
pub fn parse_corpus_source_token(target: &str) -> CorpusToken {
    let normalized = sanitize_url(target);
    let Some(suffix) = normalized.strip_prefix(CORPUS_CACHE_HANDLE_PREFIX) else {
        return CorpusToken::default();
    };

    let mut token = CorpusToken { is_corpus: true, ..Default::default() };
    let suffix = suffix.trim();
    if suffix.is_empty() {
        token.error = Some(HANDLE_FORMAT_ERROR.to_string());
        return token;
    }

    let (cache_token, section_token) = match suffix.split_once(SECTION_REF_FRAGMENT_PREFIX) {
        Some((cache, section)) => (cache, Some(section)),
        None => (suffix, None),
    };

    let cache_token = cache_token.trim().trim_matches('/');
    let Ok(cache_id) = cache_token.parse::<i64>() else {
        token.error = Some(HANDLE_FORMAT_ERROR.to_string());
        return token;
    };
    token.cache_id = Some(cache_id);

    if let Some(section) = section_token {
        let clean = section.trim().trim_start_matches('/').trim();
        if clean.is_empty() {
            token.error = Some(
                "Section identifier is empty. Use corpus://cache/<id>#section=<section-id>."
                    .to_string(),
            );
            return token;
        }
        token.section_id = Some(clean.to_string());
    }

    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_urls_and_strips_punctuation() {
        let (urls, query) =
            extract_prompt_urls_and_query_text("Summarize https://ex.com/a, and https://ex.com/b.");
        assert_eq!(urls, vec!["https://ex.com/a", "https://ex.com/b"]);
        assert_eq!(query, "Summarize and");
    }

    #[test]
    fn promotes_bare_domains_with_paths() {
        let (urls, _) = extract_prompt_urls_and_query_text("read example.com/docs please");
        assert_eq!(urls, vec!["https://example.com/docs"]);
    }

    #[test]
    fn normalization_collapses_variants() {
        let a = normalize_url("https://Example.COM/Page?utm_source=x&b=2&a=1#frag");
        let b = normalize_url("https://example.com/Page?a=1&b=2");
        assert_eq!(a, b);
    }

    #[test]
    fn local_targets_are_detected() {
        assert!(is_local_filesystem_target("/etc/passwd"));
        assert!(is_local_filesystem_target("file:///tmp/x"));
        assert!(is_local_filesystem_target("./notes.md"));
        assert!(is_local_filesystem_target("~/docs/a.txt"));
        assert!(!is_local_filesystem_target("https://ex.com"));
    }

    #[test]
    fn corpus_handle_roundtrip() {
        let token = parse_corpus_source_token("corpus://cache/42#section=intro-1");
        assert!(token.is_corpus);
        assert_eq!(token.cache_id, Some(42));
        assert_eq!(token.section_id.as_deref(), Some("intro-1"));
        assert_eq!(format_section_ref(42, "intro-1"), "corpus://cache/42#section=intro-1");
    }

    #[test]
    fn corpus_handle_rejects_non_numeric_id() {
        let token = parse_corpus_source_token("corpus://cache/abc");
        assert!(token.is_corpus);
        assert!(token.error.is_some());
    }

    #[test]
    fn non_corpus_urls_pass_through() {
        let token = parse_corpus_source_token("https://ex.com");
        assert!(!token.is_corpus);
        assert!(token.error.is_none());
    }
}
