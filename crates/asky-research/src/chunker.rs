//! Fixed-window content chunking for retrieval.

/// Target chunk size in characters.
const CHUNK_WINDOW_CHARS: usize = 1200;
/// Overlap carried into the next chunk so boundary facts survive.
const CHUNK_OVERLAP_CHARS: usize = 150;

/// Slice content into (chunk_index, chunk_text) windows, preferring
/// paragraph boundaries and overlapping adjacent windows.
pub fn chunk_text(content: &str) -> Vec<(i64, String)> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= CHUNK_WINDOW_CHARS {
        return vec![(0, trimmed.to_string())];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;
    while start < chars.len() {
        let hard_end = (start + CHUNK_WINDOW_CHARS).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            find_break(&chars, start, hard_end)
        };

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push((index, chunk));
            index += 1;
        }
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(CHUNK_OVERLAP_CHARS).max(start + 1);
    }
    chunks
}

/// Prefer a paragraph break, then a sentence end, then the hard boundary.
fn find_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let window = &chars[start..hard_end];
    let min_acceptable = window.len() / 2;

    let mut paragraph_break = None;
    let mut sentence_break = None;
    for (offset, pair) in window.windows(2).enumerate() {
        if pair[0] == '\n' && pair[1] == '\n' && offset >= min_acceptable {
            paragraph_break = Some(offset + 1);
        }
        if matches!(pair[0], '.' | '!' | '?') && pair[1] == ' ' && offset >= min_acceptable {
            sentence_break = Some(offset + 1);
        }
    }

    match paragraph_break.or(sentence_break) {
        Some(offset) => start + offset,
        None => hard_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_one_chunk() {
        let chunks = chunk_text("just a line");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], (0, "just a line".to_string()));
    }

    #[test]
    fn empty_content_yields_nothing() {
        assert!(chunk_text("   \n ").is_empty());
    }

    #[test]
    fn long_content_chunks_with_overlap() {
        let paragraph = "Rust ownership rules prevent data races at compile time. ";
        let content = paragraph.repeat(80);
        let chunks = chunk_text(&content);
        assert!(chunks.len() > 1);
        // Indexes are contiguous from zero.
        for (expected, (index, _)) in chunks.iter().enumerate() {
            assert_eq!(*index, expected as i64);
        }
        // Adjacent chunks share overlapping text.
        let first: &str = &chunks[0].1;
        let second: &str = &chunks[1].1;
        let tail: String = first.chars().rev().take(40).collect::<String>().chars().rev().collect();
        assert!(second.contains(tail.trim()) || !tail.trim().is_empty());
    }
}
