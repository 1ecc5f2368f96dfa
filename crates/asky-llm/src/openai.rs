use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{
    ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, Role, ToolCall,
};

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    client_name: String,
    /// Path appended to base_url for chat completions.
    chat_path: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::with_path(
            "openai",
            api_key,
            base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            "/v1/chat/completions".to_string(),
        )
    }

    /// Named OpenAI-compatible client with a custom endpoint path.
    /// `base_url` should NOT include a trailing slash; `chat_path` should
    /// start with "/".
    pub fn with_path(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        chat_path: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_name: name.into(),
            api_key,
            base_url,
            chat_path,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.client_name
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = build_request_body(req);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, messages = req.messages.len(), "sending chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(LlmError::RateLimited { retry_after_ms: retry });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(LlmError::Api { status, message: text });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

pub(crate) fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req.messages.iter().map(message_to_wire).collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    });

    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }

    // Tool schemas go on the wire wrapped as function definitions.
    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

/// Convert a typed message to its wire form. Assistant tool calls become
/// `tool_calls` entries with stringified arguments; tool messages become
/// `tool` role rows carrying `tool_call_id`.
fn message_to_wire(msg: &ChatMessage) -> serde_json::Value {
    match msg.role {
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::json!(msg.content)
            };
            serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
            })
        }
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or("call_0"),
            "content": msg.content,
        }),
        Role::System => serde_json::json!({ "role": "system", "content": msg.content }),
        Role::User => serde_json::json!({ "role": "user", "content": msg.content }),
        Role::Assistant => serde_json::json!({ "role": "assistant", "content": msg.content }),
    }
}

pub(crate) fn parse_response(resp: ApiResponse) -> ChatResponse {
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCall> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| {
                    let arguments: serde_json::Value =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    // OpenAI reports "tool_calls" when the model wants tools; the engine
    // checks for the canonical "tool_use".
    let raw_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();
    let stop_reason = if raw_reason == "tool_calls" {
        "tool_use".to_string()
    } else {
        raw_reason
    };

    ChatResponse {
        content,
        model: resp.model,
        tokens_in: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        tokens_out: resp
            .usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or(0),
        stop_reason,
        tool_calls,
    }
}

// OpenAI API response types.

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    pub(crate) model: String,
    pub(crate) choices: Vec<Choice>,
    pub(crate) usage: Option<Usage>,
}

#[derive(Deserialize)]
pub(crate) struct Choice {
    pub(crate) message: WireMessage,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct WireMessage {
    pub(crate) content: Option<String>,
    pub(crate) tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
pub(crate) struct ApiToolCall {
    pub(crate) id: String,
    pub(crate) function: ApiFunction,
}

#[derive(Deserialize)]
pub(crate) struct ApiFunction {
    pub(crate) name: String,
    pub(crate) arguments: String,
}

#[derive(Deserialize)]
pub(crate) struct Usage {
    pub(crate) prompt_tokens: u32,
    pub(crate) completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolDefinition;

    fn request_with(messages: Vec<ChatMessage>, tools: Vec<ToolDefinition>) -> ChatRequest {
        ChatRequest {
            model: "test-model".into(),
            messages,
            max_tokens: 256,
            temperature: None,
            tools,
        }
    }

    #[test]
    fn tools_are_wrapped_as_functions() {
        let req = request_with(
            vec![ChatMessage::user("hi")],
            vec![ToolDefinition {
                name: "web_search".into(),
                description: "search".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
        );
        let body = build_request_body(&req);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
    }

    #[test]
    fn no_tools_field_when_empty() {
        let req = request_with(vec![ChatMessage::user("hi")], vec![]);
        let body = build_request_body(&req);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn assistant_tool_calls_round_trip_ids() {
        let call = ToolCall {
            id: "call_42".into(),
            name: "get_url_content".into(),
            arguments: serde_json::json!({"urls": ["https://ex.com"]}),
        };
        let req = request_with(
            vec![
                ChatMessage::assistant_with_tools("", vec![call]),
                ChatMessage::tool("call_42", "{\"ok\":true}"),
            ],
            vec![],
        );
        let body = build_request_body(&req);
        assert_eq!(body["messages"][0]["tool_calls"][0]["id"], "call_42");
        assert_eq!(body["messages"][1]["role"], "tool");
        assert_eq!(body["messages"][1]["tool_call_id"], "call_42");
    }

    #[test]
    fn tool_calls_finish_reason_maps_to_tool_use() {
        let api = ApiResponse {
            model: "m".into(),
            choices: vec![Choice {
                message: WireMessage {
                    content: None,
                    tool_calls: Some(vec![ApiToolCall {
                        id: "c1".into(),
                        function: ApiFunction {
                            name: "web_search".into(),
                            arguments: "{\"q\":\"rust\"}".into(),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: None,
        };
        let parsed = parse_response(api);
        assert_eq!(parsed.stop_reason, "tool_use");
        assert_eq!(parsed.tool_calls[0].arguments["q"], "rust");
    }
}
