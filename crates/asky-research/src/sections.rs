//! Markdown-aware section indexing for local corpus sources.
//!
//! Sections come from ATX headings. Tiny sections (TOC rows, micro
//! headings) are kept in the index but filtered from the default listable
//! view. Matching is strict: exact id, exact normalized title, or a unique
//! normalized prefix; anything looser returns suggestions instead.

use serde::{Deserialize, Serialize};

use crate::text::normalize_whitespace;

/// Sections below this size are treated as TOC/micro rows.
const TOC_SECTION_MAX_CHARS: usize = 80;
/// Sections below this cannot be summarized reliably.
pub const MIN_SUMMARIZE_SECTION_CHARS: usize = 400;
/// Chunk granularity used when a caller limits section slices.
const SECTION_CHUNK_CHARS: usize = 1200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub level: usize,
    /// Char offsets into the source content.
    pub start: usize,
    pub end: usize,
    pub char_count: usize,
    pub is_toc: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionIndex {
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionMatch {
    pub matched: bool,
    pub section: Option<Section>,
    pub confidence: f64,
    pub reason: String,
    pub suggestions: Vec<Section>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSlice {
    pub content: String,
    pub section: Option<Section>,
    pub requested_section_id: String,
    pub resolved_section_id: String,
    pub auto_promoted: bool,
    pub truncated: bool,
    pub available_chunks: usize,
    pub error: Option<String>,
}

/// Build the section index from ATX headings in `content`.
pub fn build_section_index(content: &str) -> SectionIndex {
    let chars: Vec<char> = content.chars().collect();
    let mut headings: Vec<(usize, usize, String)> = Vec::new(); // (offset, level, title)

    let mut offset = 0usize;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&hashes) && trimmed.chars().nth(hashes) == Some(' ') {
            let title = normalize_whitespace(trimmed[hashes + 1..].trim());
            if !title.is_empty() {
                headings.push((offset, hashes, title));
            }
        }
        offset += line.chars().count();
    }

    let total = chars.len();
    let mut sections = Vec::with_capacity(headings.len());
    for (i, (start, level, title)) in headings.iter().enumerate() {
        let end = headings
            .iter()
            .skip(i + 1)
            .find(|(_, next_level, _)| next_level <= level)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(total);
        let char_count = end.saturating_sub(*start);
        sections.push(Section {
            id: format!("{}-{}", slugify(title), i + 1),
            title: title.clone(),
            level: *level,
            start: *start,
            end,
            char_count,
            is_toc: char_count < TOC_SECTION_MAX_CHARS,
        });
    }

    SectionIndex { sections }
}

/// Sections usable as targets; TOC/micro rows excluded unless asked for.
pub fn get_listable_sections(index: &SectionIndex, include_toc: bool) -> Vec<Section> {
    index
        .sections
        .iter()
        .filter(|s| include_toc || !s.is_toc)
        .cloned()
        .collect()
}

fn normalize_title(title: &str) -> String {
    normalize_whitespace(title).to_lowercase()
}

/// Strictly match a section title query against the index.
pub fn match_section_strict(query: &str, index: &SectionIndex) -> SectionMatch {
    let normalized_query = normalize_title(query);
    let candidates = get_listable_sections(index, false);

    if normalized_query.is_empty() {
        return SectionMatch {
            matched: false,
            section: None,
            confidence: 0.0,
            reason: "empty section query".to_string(),
            suggestions: candidates.into_iter().take(8).collect(),
        };
    }

    // Exact normalized title match wins at full confidence.
    if let Some(section) = candidates
        .iter()
        .find(|s| normalize_title(&s.title) == normalized_query)
    {
        return SectionMatch {
            matched: true,
            section: Some(section.clone()),
            confidence: 1.0,
            reason: "exact title match".to_string(),
            suggestions: Vec::new(),
        };
    }

    // A unique prefix/containment match is accepted at lower confidence.
    let partial: Vec<&Section> = candidates
        .iter()
        .filter(|s| {
            let t = normalize_title(&s.title);
            t.starts_with(&normalized_query) || t.contains(&normalized_query)
        })
        .collect();
    if partial.len() == 1 {
        return SectionMatch {
            matched: true,
            section: Some(partial[0].clone()),
            confidence: 0.8,
            reason: "unique partial title match".to_string(),
            suggestions: Vec::new(),
        };
    }

    let reason = if partial.is_empty() {
        "no section title matched".to_string()
    } else {
        format!("{} sections matched ambiguously", partial.len())
    };
    let suggestions = if partial.is_empty() {
        candidates.into_iter().take(8).collect()
    } else {
        partial.into_iter().take(8).cloned().collect()
    };
    SectionMatch {
        matched: false,
        section: None,
        confidence: 0.0,
        reason,
        suggestions,
    }
}

/// Slice one section's content by id. A TOC/micro row is auto-promoted to
/// the body section carrying the same title when one exists.
pub fn slice_section_content(
    content: &str,
    index: &SectionIndex,
    section_id: &str,
    max_chunks: Option<usize>,
) -> SectionSlice {
    let requested = section_id.to_string();
    let Some(mut section) = index.sections.iter().find(|s| s.id == section_id).cloned() else {
        return SectionSlice {
            content: String::new(),
            section: None,
            requested_section_id: requested.clone(),
            resolved_section_id: requested,
            auto_promoted: false,
            truncated: false,
            available_chunks: 0,
            error: Some(format!("Section '{section_id}' not found.")),
        };
    };

    let mut auto_promoted = false;
    if section.is_toc {
        let promoted = index
            .sections
            .iter()
            .find(|s| !s.is_toc && normalize_title(&s.title) == normalize_title(&section.title));
        if let Some(promoted) = promoted {
            section = promoted.clone();
            auto_promoted = true;
        }
    }

    let chars: Vec<char> = content.chars().collect();
    let start = section.start.min(chars.len());
    let end = section.end.min(chars.len());
    let full: String = chars[start..end].iter().collect();

    let available_chunks = full.chars().count().div_ceil(SECTION_CHUNK_CHARS);
    let (sliced, truncated) = match max_chunks {
        Some(limit) if limit > 0 && limit < available_chunks => {
            let cap = limit * SECTION_CHUNK_CHARS;
            (full.chars().take(cap).collect::<String>(), true)
        }
        _ => (full, false),
    };

    SectionSlice {
        content: sliced,
        resolved_section_id: section.id.clone(),
        section: Some(section),
        requested_section_id: requested,
        auto_promoted,
        truncated,
        available_chunks,
        error: None,
    }
}

fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let collapsed = slug
        .split('-')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    collapsed.chars().take(48).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Introduction\n\nThis is the introduction with enough body text to not be a \
table-of-contents row. It explains what the document covers in detail.\n\n\
## Background\n\nBackground section content, also long enough to count as a real body section \
with several sentences of material to read and consider carefully.\n\n\
## Methods\n\nTiny.\n\n\
# Conclusion\n\nFinal thoughts on the overall subject, long enough to be listable as a body \
section with genuine content inside it.\n";

    #[test]
    fn index_finds_headings_and_flags_toc_rows() {
        let index = build_section_index(DOC);
        assert_eq!(index.sections.len(), 4);
        let titles: Vec<&str> = index.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Background", "Methods", "Conclusion"]);
        assert!(index.sections[2].is_toc, "tiny Methods section flags as toc/micro");

        let listable = get_listable_sections(&index, false);
        assert_eq!(listable.len(), 3);
    }

    #[test]
    fn h1_section_spans_until_next_h1() {
        let index = build_section_index(DOC);
        let intro = &index.sections[0];
        let conclusion_start = index.sections[3].start;
        assert_eq!(intro.end, conclusion_start);
    }

    #[test]
    fn strict_match_exact_and_unique_partial() {
        let index = build_section_index(DOC);
        let exact = match_section_strict("background", &index);
        assert!(exact.matched);
        assert_eq!(exact.confidence, 1.0);

        let partial = match_section_strict("conclu", &index);
        assert!(partial.matched);
        assert!(partial.confidence < 1.0);

        let miss = match_section_strict("nonexistent topic", &index);
        assert!(!miss.matched);
        assert!(!miss.suggestions.is_empty());
    }

    #[test]
    fn slice_returns_section_body() {
        let index = build_section_index(DOC);
        let background = index.sections.iter().find(|s| s.title == "Background").unwrap();
        let slice = slice_section_content(DOC, &index, &background.id, None);
        assert!(slice.error.is_none());
        assert!(slice.content.contains("Background section content"));
        assert!(!slice.content.contains("Final thoughts"));
    }

    #[test]
    fn slice_unknown_id_errors_with_message() {
        let index = build_section_index(DOC);
        let slice = slice_section_content(DOC, &index, "missing-9", None);
        assert!(slice.error.is_some());
    }

    #[test]
    fn chunk_limit_truncates() {
        let body = format!("# Long\n\n{}", "sentence. ".repeat(1000));
        let index = build_section_index(&body);
        let id = index.sections[0].id.clone();
        let slice = slice_section_content(&body, &index, &id, Some(1));
        assert!(slice.truncated);
        assert!(slice.available_chunks > 1);
        assert!(slice.content.chars().count() <= 1200);
    }
}
