//! LLM endpoint client, usage tracking, and the map-reduce summarizer.

pub mod openai;
pub mod provider;
pub mod summarize;
pub mod usage;

pub use openai::OpenAiClient;
pub use provider::{
    ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, Role, ToolCall, ToolDefinition,
};
pub use summarize::{ProgressFn, SummaryProgress, Summarizer};
pub use usage::{UsageSnapshot, UsageTracker};
