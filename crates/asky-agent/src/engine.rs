//! Conversation engine: the bounded tool-call loop.
//!
//! Flow: messages → LLM → if tool calls → dispatch in declared order →
//! append tool results → LLM → repeat. Stops on a final answer, the turn
//! budget (one forced tools-off call), or cancellation at the turn
//! boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use asky_core::config::CHARS_PER_TOKEN_ESTIMATE;
use asky_llm::{ChatMessage, ChatRequest, LlmClient, Role, Summarizer, UsageTracker};

use crate::error::{AgentError, Result};
use crate::prompt::append_tool_guidelines;
use crate::registry::ToolRegistry;

/// Fraction of the context window the message list may fill before the
/// engine compacts older messages.
const COMPACT_TRIGGER_RATIO: f64 = 0.75;
/// Recent messages kept verbatim through a mid-turn compaction.
const COMPACT_KEEP_RECENT: usize = 6;
const COMPACT_SUMMARY_MAX_CHARS: usize = 4000;

const COMPACT_PROMPT: &str = "Summarize the earlier part of this conversation, \
keeping every fact, source URL, and tool result that could matter for the \
remaining work.";

/// Per-iteration observer. Implementations must return quickly.
pub trait EngineEvents: Send + Sync {
    fn turn_completed(&self, turn_index: usize, tool_calls: usize);
    fn tool_dispatched(&self, name: &str, elapsed_ms: u64);
}

/// Cooperative cancellation flag, honored between loop iterations only;
/// in-flight HTTP calls run to their own timeout.
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Final answer plus the full exchanged transcript.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub final_answer: String,
    pub messages: Vec<ChatMessage>,
}

/// Model parameters the engine needs for one turn.
#[derive(Debug, Clone)]
pub struct EngineModel {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub context_size: usize,
}

pub struct ConversationEngine {
    client: Arc<dyn LlmClient>,
    model: EngineModel,
    registry: ToolRegistry,
    summarizer: Option<Arc<Summarizer>>,
    usage: Arc<UsageTracker>,
    max_turns: usize,
    cancel: CancelHandle,
    events: Option<Arc<dyn EngineEvents>>,
}

impl ConversationEngine {
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: EngineModel,
        registry: ToolRegistry,
        usage: Arc<UsageTracker>,
        max_turns: usize,
    ) -> Self {
        Self {
            client,
            model,
            registry,
            summarizer: None,
            usage,
            max_turns: max_turns.max(1),
            cancel: CancelHandle::new(),
            events: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EngineEvents>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drive the tool loop to a final answer. The returned messages are
    /// the full exchanged transcript, including assistant tool-call
    /// messages and their tool results in dispatch order.
    pub async fn run(&self, mut messages: Vec<ChatMessage>) -> Result<EngineOutcome> {
        append_tool_guidelines(&mut messages, &self.registry.system_prompt_guidelines());
        let tools = self.registry.specs();

        for turn in 0..self.max_turns {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            self.maybe_compact(&mut messages).await;

            let response = self.send(&messages, tools.clone()).await?;
            debug!(turn, tool_calls = response.tool_calls.len(), "engine iteration");

            if response.tool_calls.is_empty() {
                info!(turn, "tool loop complete");
                return Ok(EngineOutcome {
                    final_answer: response.content,
                    messages,
                });
            }

            // The assistant message, including its tool-call list, precedes
            // every tool result in the next request.
            let tool_calls = response.tool_calls.clone();
            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone(),
                tool_calls.clone(),
            ));

            for call in &tool_calls {
                let started = Instant::now();
                let payload = match self.registry.dispatch(&call.name, call.arguments.clone()).await
                {
                    Some(payload) => payload,
                    None => serde_json::json!({
                        "error": format!("Unknown tool: {}", call.name)
                    }),
                };
                let content = serde_json::to_string(&payload)?;
                messages.push(ChatMessage::tool(call.id.clone(), content));
                if let Some(events) = &self.events {
                    events.tool_dispatched(&call.name, started.elapsed().as_millis() as u64);
                }
            }

            if let Some(events) = &self.events {
                events.turn_completed(turn, tool_calls.len());
            }
        }

        warn!(max_turns = self.max_turns, "turn budget exhausted, forcing final answer");
        let response = self.send(&messages, Vec::new()).await?;
        Ok(EngineOutcome {
            final_answer: response.content,
            messages,
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: Vec<asky_llm::ToolDefinition>,
    ) -> Result<asky_llm::ChatResponse> {
        let req = ChatRequest {
            model: self.model.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
            tools,
        };
        let started = Instant::now();
        let response = self.client.send(&req).await?;
        self.usage.record(
            response.tokens_in,
            response.tokens_out,
            started.elapsed().as_millis() as u64,
        );
        Ok(response)
    }

    /// Estimate message-list size and compact older messages through the
    /// summarizer when it crosses the context budget.
    async fn maybe_compact(&self, messages: &mut Vec<ChatMessage>) {
        let Some(summarizer) = &self.summarizer else {
            return;
        };
        let estimated_tokens = estimate_tokens(messages);
        let budget = (self.model.context_size as f64 * COMPACT_TRIGGER_RATIO) as usize;
        if estimated_tokens <= budget || messages.len() <= COMPACT_KEEP_RECENT + 2 {
            return;
        }

        // Keep the system message and the most recent exchange; summarize
        // the middle. Never split an assistant message from its tool
        // results.
        let mut keep_from = messages.len().saturating_sub(COMPACT_KEEP_RECENT);
        while keep_from > 1 && messages[keep_from].role == Role::Tool {
            keep_from -= 1;
        }
        if keep_from <= 1 {
            return;
        }

        let transcript: String = messages[1..keep_from]
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        match summarizer
            .summarize(&transcript, COMPACT_PROMPT, COMPACT_SUMMARY_MAX_CHARS, None, None)
            .await
        {
            Ok(summary) => {
                info!(
                    estimated_tokens,
                    budget,
                    compacted = keep_from - 1,
                    "compacted conversation messages"
                );
                let tail: Vec<ChatMessage> = messages.drain(keep_from..).collect();
                messages.truncate(1);
                messages.push(ChatMessage::user(format!(
                    "Summary of the conversation so far:\n{summary}"
                )));
                messages.extend(tail);
            }
            Err(e) => warn!(error = %e, "mid-turn compaction failed, continuing uncompacted"),
        }
    }
}

fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum();
    chars / CHARS_PER_TOKEN_ESTIMATE
}
