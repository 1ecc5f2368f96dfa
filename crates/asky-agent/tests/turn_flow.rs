//! Orchestrated turn flows with a scripted LLM endpoint.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use asky_agent::{
    create_research_tool_registry, create_tool_registry, AskyClient, AskyRuntime,
    ConversationEngine, EngineModel, RegistryOptions, ToolExecutor, ToolRegistry, ToolSpec,
    TurnObservers, TurnRequest, ACQUISITION_TOOL_NAMES,
    STANDARD_SEED_DIRECT_ANSWER_DISABLED_TOOLS,
};
use asky_core::config::{AskyConfig, ModelConfig};
use asky_llm::{
    ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, Role, ToolCall, UsageTracker,
};
use asky_research::shortlist::{SearchHit, SearchProvider};
use asky_research::{Embedder, ResearchError};

// Scripted LLM: pops canned responses in order and records every request.
struct ScriptedLlm {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn final_response(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.to_string(),
        model: "scripted".to_string(),
        tokens_in: 10,
        tokens_out: 5,
        stop_reason: "stop".to_string(),
        tool_calls: Vec::new(),
    }
}

fn tool_response(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        model: "scripted".to_string(),
        tokens_in: 10,
        tokens_out: 5,
        stop_reason: "tool_use".to_string(),
        tool_calls: calls,
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(req.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| final_response("default answer")))
    }
}

struct NullEmbedder;

#[async_trait]
impl Embedder for NullEmbedder {
    fn model(&self) -> &str {
        "null-embedder"
    }
    fn has_model_load_failure(&self) -> bool {
        true
    }
    async fn embed(&self, _texts: &[String]) -> asky_research::Result<Vec<Vec<f32>>> {
        Err(ResearchError::Embedding("disabled".to_string()))
    }
    async fn embed_single(&self, _text: &str) -> asky_research::Result<Vec<f32>> {
        Err(ResearchError::Embedding("disabled".to_string()))
    }
}

struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _query: &str, _count: usize) -> Result<Vec<SearchHit>, String> {
        Ok(Vec::new())
    }
}

fn test_config(dir: &tempfile::TempDir, context_size: usize) -> AskyConfig {
    let mut config = AskyConfig::default();
    config.database.path = dir.path().join("asky.db");
    config.models.insert(
        "test".to_string(),
        ModelConfig {
            model: "test-model".to_string(),
            base_url: None,
            context_size,
            max_turns: Some(4),
            max_tokens: 512,
            temperature: None,
            source_shortlist_enabled: None,
        },
    );
    config
}

fn test_runtime(
    dir: &tempfile::TempDir,
    llm: Arc<ScriptedLlm>,
    context_size: usize,
) -> Arc<AskyRuntime> {
    Arc::new(
        AskyRuntime::with_components(
            test_config(dir, context_size),
            llm,
            Arc::new(NullEmbedder),
            Arc::new(NoSearch),
        )
        .unwrap(),
    )
}

// Echo tool used by engine-loop tests.
struct EchoTool;

#[async_trait]
impl ToolExecutor for EchoTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "echoed": args })
    }
}

fn echo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolSpec {
            name: "echo".to_string(),
            description: "echo args".to_string(),
            system_prompt_guideline: Some("echo guideline".to_string()),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        },
        Arc::new(EchoTool),
    );
    registry
}

fn engine_model() -> EngineModel {
    EngineModel {
        model: "test-model".to_string(),
        max_tokens: 256,
        temperature: None,
        context_size: 100_000,
    }
}

#[tokio::test]
async fn tool_messages_preserve_declared_order_and_ids() {
    let llm = ScriptedLlm::new(vec![
        tool_response(vec![
            ToolCall {
                id: "call_a".to_string(),
                name: "echo".to_string(),
                arguments: serde_json::json!({"n": 1}),
            },
            ToolCall {
                id: "call_b".to_string(),
                name: "echo".to_string(),
                arguments: serde_json::json!({"n": 2}),
            },
        ]),
        final_response("done"),
    ]);

    let engine = ConversationEngine::new(
        llm.clone(),
        engine_model(),
        echo_registry(),
        Arc::new(UsageTracker::new()),
        5,
    );
    let outcome = engine
        .run(vec![ChatMessage::system("sys"), ChatMessage::user("go")])
        .await
        .unwrap();
    assert_eq!(outcome.final_answer, "done");

    // The second request carries the assistant tool-call message followed
    // by both tool results, in declared order, with round-tripped ids.
    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1].messages;
    let assistant_index = second
        .iter()
        .position(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
        .unwrap();
    assert_eq!(second[assistant_index].tool_calls[0].id, "call_a");
    assert_eq!(second[assistant_index].tool_calls[1].id, "call_b");
    assert_eq!(second[assistant_index + 1].role, Role::Tool);
    assert_eq!(second[assistant_index + 1].tool_call_id.as_deref(), Some("call_a"));
    assert_eq!(second[assistant_index + 2].tool_call_id.as_deref(), Some("call_b"));
    assert!(second[assistant_index + 1].content.contains("\"n\":1"));
}

#[tokio::test]
async fn unknown_tool_becomes_error_tool_message() {
    let llm = ScriptedLlm::new(vec![
        tool_response(vec![ToolCall {
            id: "call_x".to_string(),
            name: "no_such_tool".to_string(),
            arguments: serde_json::json!({}),
        }]),
        final_response("recovered"),
    ]);

    let engine = ConversationEngine::new(
        llm.clone(),
        engine_model(),
        echo_registry(),
        Arc::new(UsageTracker::new()),
        5,
    );
    let outcome = engine
        .run(vec![ChatMessage::system("sys"), ChatMessage::user("go")])
        .await
        .unwrap();
    assert_eq!(outcome.final_answer, "recovered");

    let requests = llm.requests();
    let tool_message = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_message.content.contains("Unknown tool: no_such_tool"));
}

#[tokio::test]
async fn exhausted_budget_forces_tools_off_final_call() {
    // Every scripted response requests another tool call.
    let responses: Vec<ChatResponse> = (0..3)
        .map(|i| {
            tool_response(vec![ToolCall {
                id: format!("call_{i}"),
                name: "echo".to_string(),
                arguments: serde_json::json!({}),
            }])
        })
        .chain(std::iter::once(final_response("forced")))
        .collect();
    let llm = ScriptedLlm::new(responses);

    let engine = ConversationEngine::new(
        llm.clone(),
        engine_model(),
        echo_registry(),
        Arc::new(UsageTracker::new()),
        3,
    );
    let outcome = engine
        .run(vec![ChatMessage::system("sys"), ChatMessage::user("go")])
        .await
        .unwrap();
    assert_eq!(outcome.final_answer, "forced");

    let requests = llm.requests();
    assert_eq!(requests.len(), 4);
    assert!(!requests[2].tools.is_empty());
    assert!(requests[3].tools.is_empty(), "final forced call must disable tools");
}

#[tokio::test]
async fn guidelines_are_appended_to_system_message() {
    let llm = ScriptedLlm::new(vec![final_response("ok")]);
    let engine = ConversationEngine::new(
        llm.clone(),
        engine_model(),
        echo_registry(),
        Arc::new(UsageTracker::new()),
        3,
    );
    engine
        .run(vec![ChatMessage::system("base"), ChatMessage::user("q")])
        .await
        .unwrap();
    let first_request = &llm.requests()[0];
    assert!(first_request.messages[0].content.contains("Enabled Tool Guidelines:"));
    assert!(first_request.messages[0].content.contains("echo guideline"));
}

#[tokio::test]
async fn lean_turn_answers_without_tools_and_saves_history() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(vec![final_response("lean answer")]);
    let runtime = test_runtime(&dir, llm.clone(), 100_000);
    let client = AskyClient::new(Arc::clone(&runtime), "test", false).unwrap();

    let mut request = TurnRequest::for_query("what is rust");
    request.lean = true;

    let result = client.run_turn(request, TurnObservers::default()).await.unwrap();
    assert_eq!(result.final_answer, "lean answer");
    assert!(!result.halted);

    // Lean disables every tool: no tools[] on the wire.
    let requests = llm.requests();
    assert!(requests[0].tools.is_empty());

    // Interaction persisted as a non-session pair.
    let history = runtime.store.get_history(5).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].query, "what is rust");
    assert_eq!(history[0].answer, "lean answer");
    runtime.shutdown().await;
}

#[tokio::test]
async fn identical_turns_build_identical_request_messages() {
    let build = |dir: &tempfile::TempDir| {
        let llm = ScriptedLlm::new(vec![final_response("same")]);
        (test_runtime(dir, llm.clone(), 100_000), llm)
    };

    let dir_a = tempfile::tempdir().unwrap();
    let (runtime_a, llm_a) = build(&dir_a);
    let dir_b = tempfile::tempdir().unwrap();
    let (runtime_b, llm_b) = build(&dir_b);

    let mut request = TurnRequest::for_query("deterministic question");
    request.lean = true;

    let client_a = AskyClient::new(runtime_a, "test", false).unwrap();
    client_a.run_turn(request.clone(), TurnObservers::default()).await.unwrap();
    let client_b = AskyClient::new(runtime_b, "test", false).unwrap();
    client_b.run_turn(request, TurnObservers::default()).await.unwrap();

    let messages_a: Vec<(Role, String)> = llm_a.requests()[0]
        .messages
        .iter()
        .map(|m| (m.role, m.content.clone()))
        .collect();
    let messages_b: Vec<(Role, String)> = llm_b.requests()[0]
        .messages
        .iter()
        .map(|m| (m.role, m.content.clone()))
        .collect();
    assert_eq!(messages_a, messages_b);
}

#[tokio::test]
async fn sticky_session_without_query_halts_command_only() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(vec![]);
    let runtime = test_runtime(&dir, llm.clone(), 100_000);
    let client = AskyClient::new(Arc::clone(&runtime), "test", false).unwrap();

    let mut request = TurnRequest::for_query("");
    request.sticky_session_name = Some("work".to_string());

    let result = client.run_turn(request, TurnObservers::default()).await.unwrap();
    assert!(result.halted);
    assert_eq!(result.halt_reason.as_deref(), Some("session_command_only"));
    assert!(result.session_id.is_some());
    assert!(llm.requests().is_empty(), "no LLM call on a halted turn");
}

#[tokio::test]
async fn ambiguous_resume_halts_with_matches() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(vec![]);
    let runtime = test_runtime(&dir, llm.clone(), 100_000);
    runtime.store.create_session("test", Some("dup"), false, None).unwrap();
    runtime.store.create_session("test", Some("dup"), false, None).unwrap();

    let client = AskyClient::new(Arc::clone(&runtime), "test", false).unwrap();
    let mut request = TurnRequest::for_query("hello");
    request.resume_session_term = Some("dup".to_string());

    let result = client.run_turn(request, TurnObservers::default()).await.unwrap();
    assert!(result.halted);
    assert_eq!(result.halt_reason.as_deref(), Some("session_ambiguous"));
    assert_eq!(result.session.matched_sessions.len(), 2);
}

#[tokio::test]
async fn missing_resume_halts_session_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(vec![]);
    let runtime = test_runtime(&dir, llm.clone(), 100_000);
    let client = AskyClient::new(runtime, "test", false).unwrap();

    let mut request = TurnRequest::for_query("hello");
    request.resume_session_term = Some("ghost".to_string());

    let result = client.run_turn(request, TurnObservers::default()).await.unwrap();
    assert_eq!(result.halt_reason.as_deref(), Some("session_not_found"));
}

#[tokio::test]
async fn local_only_research_without_corpus_halts() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(vec![]);
    let runtime = test_runtime(&dir, llm.clone(), 100_000);
    let client = AskyClient::new(runtime, "test", true).unwrap();

    let mut request = TurnRequest::for_query("analyze the corpus");
    request.research_source_mode = Some("local_only".to_string());

    let result = client.run_turn(request, TurnObservers::default()).await.unwrap();
    assert!(result.halted);
    assert_eq!(result.halt_reason.as_deref(), Some("local_corpus_missing"));
}

#[tokio::test]
async fn session_turn_compacts_when_context_budget_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    // Tiny context: budget is 100 tokens * 0.8 = 80 tokens ≈ 320 chars.
    let long_answer = "fact ".repeat(200);
    let llm = ScriptedLlm::new(vec![
        final_response(&long_answer),
        final_response("compacted summary of the session"),
    ]);
    let runtime = test_runtime(&dir, llm.clone(), 100);
    let client = AskyClient::new(Arc::clone(&runtime), "test", false).unwrap();

    let mut request = TurnRequest::for_query("tell me everything");
    request.sticky_session_name = Some("long-run".to_string());

    let result = client.run_turn(request, TurnObservers::default()).await.unwrap();
    assert!(!result.halted);
    assert!(result.notices.iter().any(|n| n == "Session context compacted"));

    let session_id: i64 = result.session_id.unwrap().parse().unwrap();
    let session = runtime.store.get_session_by_id(session_id).unwrap().unwrap();
    assert_eq!(
        session.compacted_summary.as_deref(),
        Some("compacted summary of the session")
    );
    // Raw messages are retained for audit.
    let messages = runtime.store.get_session_messages(session_id).unwrap();
    assert_eq!(messages.len(), 2);
    runtime.shutdown().await;
}

#[tokio::test]
async fn direct_answer_gating_removes_discovery_tools_from_registry() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(vec![]);
    let runtime = test_runtime(&dir, llm, 100_000);

    let mut disabled = HashSet::new();
    disabled.extend(
        STANDARD_SEED_DIRECT_ANSWER_DISABLED_TOOLS
            .iter()
            .map(|n| n.to_string()),
    );
    let options = RegistryOptions {
        disabled_tools: disabled,
        ..Default::default()
    };
    let registry = create_tool_registry(&runtime, &options, Arc::new(UsageTracker::new()));
    let names = registry.names();
    for gated in STANDARD_SEED_DIRECT_ANSWER_DISABLED_TOOLS {
        assert!(!names.contains(&gated.to_string()), "{gated} must be absent");
    }
    assert!(names.contains(&"save_memory".to_string()));
}

#[tokio::test]
async fn preloaded_corpus_disables_acquisition_tools() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(vec![]);
    let runtime = test_runtime(&dir, llm, 100_000);

    let options = RegistryOptions {
        corpus_preloaded: true,
        ..Default::default()
    };
    let registry = create_research_tool_registry(&runtime, &options, Arc::new(UsageTracker::new()));
    let names = registry.names();
    for gated in ACQUISITION_TOOL_NAMES {
        assert!(!names.contains(&gated.to_string()), "{gated} must be absent");
    }
    assert!(names.contains(&"get_relevant_content".to_string()));
    assert!(names.contains(&"query_research_memory".to_string()));
}

#[tokio::test]
async fn section_tools_only_register_for_local_modes() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(vec![]);
    let runtime = test_runtime(&dir, llm, 100_000);

    let web_only = create_research_tool_registry(
        &runtime,
        &RegistryOptions::default(),
        Arc::new(UsageTracker::new()),
    );
    assert!(!web_only.names().contains(&"list_sections".to_string()));

    let local = create_research_tool_registry(
        &runtime,
        &RegistryOptions {
            research_source_mode: Some("local_only".to_string()),
            ..Default::default()
        },
        Arc::new(UsageTracker::new()),
    );
    assert!(local.names().contains(&"list_sections".to_string()));
    assert!(local.names().contains(&"summarize_section".to_string()));
}
