//! Bounded LLM-based text compression.
//!
//! Short inputs go through a single call. Inputs over the map-reduce
//! threshold are sliced into overlapping windows, each window summarized
//! with progress updates, then the concatenated partials are reduced into
//! the final summary. The summarizer never touches any store.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::provider::{ChatMessage, ChatRequest, LlmClient, LlmError};
use crate::usage::UsageTracker;

/// Inputs above this run map-reduce instead of a single call.
const MAP_REDUCE_THRESHOLD_CHARS: usize = 16_000;
const MAP_SLICE_CHARS: usize = 12_000;
const MAP_SLICE_OVERLAP_CHARS: usize = 800;

/// Progress payload for summarization callbacks. Callbacks must return
/// quickly; they run on the summarizer's task.
#[derive(Debug, Clone)]
pub struct SummaryProgress {
    pub stage: &'static str,
    pub call_index: usize,
    pub call_total: usize,
    pub input_chars: usize,
    pub output_chars: usize,
    pub elapsed_ms: u64,
}

pub type ProgressFn = dyn Fn(SummaryProgress) + Send + Sync;

pub struct Summarizer {
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: u32,
}

impl Summarizer {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Summarize `content` under `prompt_template`, clamped to
    /// `max_output_chars`. Usage is accumulated in `tracker` when given.
    pub async fn summarize(
        &self,
        content: &str,
        prompt_template: &str,
        max_output_chars: usize,
        tracker: Option<&UsageTracker>,
        progress: Option<&ProgressFn>,
    ) -> Result<String, LlmError> {
        if content.trim().is_empty() {
            return Ok(String::new());
        }

        if content.len() <= MAP_REDUCE_THRESHOLD_CHARS {
            let summary = self
                .summarize_call(
                    content,
                    prompt_template,
                    max_output_chars,
                    tracker,
                    progress,
                    "single",
                    1,
                    1,
                )
                .await?;
            return Ok(clamp_chars(&summary, max_output_chars));
        }

        let slices = slice_with_overlap(content, MAP_SLICE_CHARS, MAP_SLICE_OVERLAP_CHARS);
        let total = slices.len();
        debug!(slices = total, input_chars = content.len(), "map-reduce summarization");

        let mut partials: Vec<String> = Vec::with_capacity(total);
        for (index, slice) in slices.iter().enumerate() {
            let partial = self
                .summarize_call(
                    slice,
                    prompt_template,
                    max_output_chars,
                    tracker,
                    progress,
                    "map",
                    index + 1,
                    total,
                )
                .await?;
            partials.push(partial);
        }

        let combined = partials.join("\n\n");
        let reduced = self
            .summarize_call(
                &combined,
                prompt_template,
                max_output_chars,
                tracker,
                progress,
                "reduce",
                1,
                1,
            )
            .await?;
        Ok(clamp_chars(&reduced, max_output_chars))
    }

    #[allow(clippy::too_many_arguments)]
    async fn summarize_call(
        &self,
        content: &str,
        prompt_template: &str,
        max_output_chars: usize,
        tracker: Option<&UsageTracker>,
        progress: Option<&ProgressFn>,
        stage: &'static str,
        call_index: usize,
        call_total: usize,
    ) -> Result<String, LlmError> {
        let system = format!(
            "{prompt_template}\n\nKeep the summary under {max_output_chars} characters."
        );
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(content)],
            max_tokens: self.max_tokens,
            temperature: None,
            tools: Vec::new(),
        };

        let started = Instant::now();
        let resp = self.client.send(&req).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Some(t) = tracker {
            t.record(resp.tokens_in, resp.tokens_out, elapsed_ms);
        }
        if let Some(cb) = progress {
            cb(SummaryProgress {
                stage,
                call_index,
                call_total,
                input_chars: content.len(),
                output_chars: resp.content.len(),
                elapsed_ms,
            });
        }

        Ok(resp.content)
    }
}

/// Slice text into overlapping windows on char boundaries.
fn slice_with_overlap(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= window {
        return vec![text.to_string()];
    }

    let step = window.saturating_sub(overlap).max(1);
    let mut slices = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window).min(chars.len());
        slices.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    slices
}

fn clamp_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_slice() {
        let slices = slice_with_overlap("hello world", 100, 10);
        assert_eq!(slices, vec!["hello world".to_string()]);
    }

    #[test]
    fn slices_overlap_and_cover_input() {
        let text: String = std::iter::repeat('x').take(250).collect();
        let slices = slice_with_overlap(&text, 100, 20);
        assert!(slices.len() >= 3);
        assert!(slices.iter().all(|s| s.chars().count() <= 100));
        let covered: usize = slices.iter().map(|s| s.chars().count()).sum();
        assert!(covered >= 250);
    }

    #[test]
    fn clamp_respects_char_boundaries() {
        assert_eq!(clamp_chars("héllo", 2), "hé");
        assert_eq!(clamp_chars("abc", 10), "abc");
    }
}
