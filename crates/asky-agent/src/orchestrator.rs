//! Turn orchestrator: resolves context, session, and preload state around
//! one external turn, drives the conversation engine, and persists the
//! outcome.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use asky_core::config::ModelConfig;
use asky_hooks::{HookContext, HookEvent};
use asky_llm::{ChatMessage, UsageTracker};
use asky_research::shortlist::StatusSink;

use crate::context::{load_context_from_history, ContextResolution};
use crate::engine::{ConversationEngine, EngineEvents, EngineModel};
use crate::error::{AgentError, Result};
use crate::memory::extract_and_save_memories_from_turn;
use crate::preload::{run_preload_pipeline, PreloadParams};
use crate::prompt::{
    append_research_guidance, construct_research_system_prompt, construct_system_prompt,
};
use crate::registry_factory::{
    all_tool_names, create_research_tool_registry, create_tool_registry, RegistryOptions,
    STANDARD_SEED_DIRECT_ANSWER_DISABLED_TOOLS,
};
use crate::runtime::AskyRuntime;
use crate::session::{resolve_session_for_turn, SessionDirectives, SessionManager};
use crate::tools::url_tools::SummarizationStatus;
use crate::types::{PreloadResolution, TurnRequest, TurnResult};

/// Observer handles for one turn. All optional; implementations must not
/// block.
#[derive(Default, Clone)]
pub struct TurnObservers {
    pub preload_status: Option<Arc<dyn StatusSink>>,
    pub engine_events: Option<Arc<dyn EngineEvents>>,
    pub summarization_status: Option<Arc<dyn SummarizationStatus>>,
    pub set_shell_session_id: Option<Arc<dyn Fn(i64) + Send + Sync>>,
    pub clear_shell_session: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Library entry point for running asky turns.
pub struct AskyClient {
    runtime: Arc<AskyRuntime>,
    model_alias: String,
    model: ModelConfig,
    research_mode: bool,
    system_prompt_override: Option<String>,
    base_disabled_tools: HashSet<String>,
    usage: Arc<UsageTracker>,
    summarization_usage: Arc<UsageTracker>,
}

impl AskyClient {
    pub fn new(runtime: Arc<AskyRuntime>, model_alias: &str, research_mode: bool) -> Result<Self> {
        let model = runtime
            .config
            .model(model_alias)
            .map_err(|e| AgentError::Config(e.to_string()))?
            .clone();
        Ok(Self {
            runtime,
            model_alias: model_alias.to_string(),
            model,
            research_mode,
            system_prompt_override: None,
            base_disabled_tools: HashSet::new(),
            usage: Arc::new(UsageTracker::new()),
            summarization_usage: Arc::new(UsageTracker::new()),
        })
    }

    pub fn with_system_prompt_override(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt_override = Some(prompt.into());
        self
    }

    pub fn with_disabled_tools(mut self, tools: HashSet<String>) -> Self {
        self.base_disabled_tools = tools;
        self
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn summarization_usage(&self) -> &Arc<UsageTracker> {
        &self.summarization_usage
    }

    /// Build the message list for one turn: system prompt (with research
    /// guidance and memory context), session or prior context, then the
    /// user query annotated with preloaded sources.
    pub fn build_messages(
        &self,
        query_text: &str,
        context_str: &str,
        session_manager: Option<&SessionManager>,
        preload: &PreloadResolution,
        local_kb_hint_enabled: bool,
        section_tools_enabled: bool,
        research_mode: bool,
    ) -> Result<Vec<ChatMessage>> {
        let mut system_prompt = match &self.system_prompt_override {
            Some(prompt) => prompt.clone(),
            None if research_mode => construct_research_system_prompt(),
            None => construct_system_prompt(),
        };
        if research_mode {
            system_prompt = append_research_guidance(
                system_prompt,
                preload.is_corpus_preloaded(),
                local_kb_hint_enabled,
                section_tools_enabled,
            );
        }
        if let Some(memory_context) = &preload.memory_context {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(memory_context);
        }

        let mut messages = vec![ChatMessage::system(system_prompt)];

        if let Some(manager) = session_manager {
            messages.extend(manager.build_context_messages()?);
        } else if !context_str.is_empty() {
            messages.push(ChatMessage::user(format!(
                "Context from previous queries:\n{context_str}\n\nMy new query is below."
            )));
        }

        let user_content = match &preload.combined_context {
            Some(combined) if !combined.is_empty() => {
                let instruction = if preload.seed_url_direct_answer_ready {
                    "Seed URL content is already preloaded with full_content status. \
                     Answer directly from that content and do NOT call get_url_content/\
                     get_url_details for the same URL unless the user explicitly asks for a \
                     fresh fetch or the provided content is clearly incomplete."
                } else {
                    "Use this preloaded corpus as a starting point, then verify with tools \
                     before citing."
                };
                format!(
                    "{query_text}\n\nPreloaded sources gathered before tool calls:\n{combined}\n\n{instruction}"
                )
            }
            _ => query_text.to_string(),
        };
        messages.push(ChatMessage::user(user_content));
        Ok(messages)
    }

    /// Turn-scoped tool disablement: lean disables every known name;
    /// a seed-ready standard turn disables the discovery tools.
    fn resolve_disabled_tools(
        &self,
        request: &TurnRequest,
        preload: &PreloadResolution,
        research_mode: bool,
    ) -> (HashSet<String>, bool) {
        let mut disabled: HashSet<String> = self
            .base_disabled_tools
            .iter()
            .chain(request.disabled_tools.iter())
            .cloned()
            .collect();

        if request.lean {
            disabled.extend(all_tool_names().iter().map(|n| n.to_string()));
            return (disabled, false);
        }

        if !research_mode && preload.seed_url_direct_answer_ready {
            disabled.extend(
                STANDARD_SEED_DIRECT_ANSWER_DISABLED_TOOLS
                    .iter()
                    .map(|n| n.to_string()),
            );
            return (disabled, true);
        }

        (disabled, false)
    }

    /// Run a full orchestrated turn.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        observers: TurnObservers,
    ) -> Result<TurnResult> {
        let mut notices: Vec<String> = Vec::new();
        let mut context = ContextResolution::default();
        let hooks = &self.runtime.hooks;

        // 1. History selectors.
        if let Some(continue_ids) = &request.continue_ids {
            context = load_context_from_history(
                &self.runtime.store,
                Some(&self.runtime.summarizer),
                continue_ids,
                request.summarize_context,
            )
            .await?;
            if !context.resolved_ids.is_empty() {
                notices.push(format!(
                    "Loaded context from IDs: {}",
                    context
                        .resolved_ids
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }

        // 2. Session resolution.
        let research_mode = request.research.unwrap_or(self.research_mode);
        let (mut session_manager, session_resolution) = resolve_session_for_turn(
            &self.runtime.store,
            &self.runtime.summarizer,
            &self.model_alias,
            self.model.context_size,
            SessionDirectives {
                query_text: &request.query_text,
                sticky_session_name: request.sticky_session_name.as_deref(),
                resume_session_term: request.resume_session_term.as_deref(),
                shell_session_id: request.shell_session_id,
                research_mode,
                elephant_mode: request.elephant_mode,
                max_turns: request.max_turns,
            },
        )?;
        notices.extend(session_resolution.notices.iter().cloned());

        match session_resolution.event.as_deref() {
            Some("session_created") | Some("session_resumed") | Some("research_session_created") => {
                if let (Some(set_shell), Some(id)) =
                    (&observers.set_shell_session_id, session_resolution.session_id)
                {
                    set_shell(id);
                }
            }
            Some("session_auto_resume_missing") => {
                if let Some(clear_shell) = &observers.clear_shell_session {
                    clear_shell();
                }
            }
            _ => {}
        }

        if !hooks.is_empty() {
            let mut ctx = HookContext::new(
                HookEvent::SessionResolved,
                serde_json::json!({
                    "session_id": session_resolution.session_id,
                    "event": session_resolution.event,
                    "memory_auto_extract": session_resolution.memory_auto_extract,
                }),
            );
            hooks.invoke(HookEvent::SessionResolved, &mut ctx);
        }

        if research_mode {
            notices.insert(
                0,
                "Research mode enabled - using link extraction and RAG tools".to_string(),
            );
        }

        if let Some(halt_reason) = &session_resolution.halt_reason {
            let result = TurnResult {
                final_answer: String::new(),
                messages: Vec::new(),
                model_alias: self.model_alias.clone(),
                session_id: session_resolution.session_id.map(|id| id.to_string()),
                halted: true,
                halt_reason: Some(halt_reason.clone()),
                notices,
                context,
                session: session_resolution,
                preload: PreloadResolution::default(),
            };
            return Ok(self.finalize_turn(result));
        }

        // 3. Global memory trigger.
        let mut capture_global_memory = false;
        let mut effective_query = request.query_text.clone();
        if !request.lean {
            for trigger in &self.runtime.config.memory.global_triggers {
                if let Some(stripped) = strip_prefix_case_insensitive(&effective_query, trigger) {
                    effective_query = stripped.trim_start().to_string();
                    capture_global_memory = true;
                    notices.push(format!("Global memory trigger detected: '{trigger}'"));
                    break;
                }
            }
        }

        // 4. Preload, bracketed by the PRE/POST hooks.
        let mut preload_query = effective_query.clone();
        let mut effective_research_mode = research_mode;
        let mut effective_source_mode = request.research_source_mode.clone();
        let mut local_corpus_paths = request.local_corpus_paths.clone();
        let mut preload_local_sources = request.preload_local_sources;
        let mut preload_shortlist = request.preload_shortlist;
        let mut shortlist_override = request.shortlist_override.clone();
        let mut additional_source_context = request.additional_source_context.clone();

        if !hooks.is_empty() {
            let mut ctx = HookContext::new(
                HookEvent::PrePreload,
                serde_json::json!({
                    "query_text": preload_query,
                    "research_mode": effective_research_mode,
                    "research_source_mode": effective_source_mode,
                    "local_corpus_paths": local_corpus_paths,
                    "preload_local_sources": preload_local_sources,
                    "preload_shortlist": preload_shortlist,
                    "shortlist_override": shortlist_override,
                    "additional_source_context": additional_source_context,
                }),
            );
            hooks.invoke(HookEvent::PrePreload, &mut ctx);
            let payload = &ctx.payload;
            if let Some(q) = payload.get("query_text").and_then(|v| v.as_str()) {
                if !q.trim().is_empty() {
                    preload_query = q.to_string();
                }
            }
            if let Some(r) = payload.get("research_mode").and_then(|v| v.as_bool()) {
                effective_research_mode = r;
            }
            effective_source_mode = payload
                .get("research_source_mode")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .or(effective_source_mode);
            if let Some(paths) = payload.get("local_corpus_paths") {
                if let Some(list) = paths.as_array() {
                    local_corpus_paths = Some(
                        list.iter()
                            .filter_map(|v| v.as_str())
                            .map(|s| s.to_string())
                            .collect(),
                    );
                }
            }
            if let Some(v) = payload.get("preload_local_sources").and_then(|v| v.as_bool()) {
                preload_local_sources = v;
            }
            if let Some(v) = payload.get("preload_shortlist").and_then(|v| v.as_bool()) {
                preload_shortlist = v;
            }
            shortlist_override = payload
                .get("shortlist_override")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .or(shortlist_override);
            additional_source_context = payload
                .get("additional_source_context")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .or(additional_source_context);
        }

        let session_row_id = session_manager.as_ref().and_then(|m| m.session_id());
        let mut preload = run_preload_pipeline(
            &self.runtime,
            PreloadParams {
                query_text: &preload_query,
                research_mode: effective_research_mode,
                model_config: &self.model,
                lean: request.lean,
                preload_local_sources,
                preload_shortlist,
                shortlist_override: shortlist_override.as_deref(),
                additional_source_context: additional_source_context.as_deref(),
                local_corpus_paths: local_corpus_paths.as_deref(),
                session_row_id,
                status: observers.preload_status.clone(),
            },
        )
        .await;
        effective_query = preload_query.clone();

        if !hooks.is_empty() {
            let mut ctx = HookContext::new(
                HookEvent::PostPreload,
                serde_json::json!({
                    "query_text": effective_query,
                    "research_mode": effective_research_mode,
                    "combined_context": preload.combined_context,
                    "seed_url_direct_answer_ready": preload.seed_url_direct_answer_ready,
                }),
            );
            hooks.invoke(HookEvent::PostPreload, &mut ctx);
            if let Some(q) = ctx.payload.get("query_text").and_then(|v| v.as_str()) {
                if !q.trim().is_empty() {
                    effective_query = q.to_string();
                }
            }
            if let Some(r) = ctx.payload.get("research_mode").and_then(|v| v.as_bool()) {
                effective_research_mode = r;
            }
            if let Some(c) = ctx.payload.get("combined_context").and_then(|v| v.as_str()) {
                preload.combined_context = Some(c.to_string());
            }
        }

        // 5. Local corpus guards.
        let source_mode = effective_source_mode
            .as_deref()
            .map(|m| m.trim().to_lowercase())
            .unwrap_or_default();
        let local_mode = matches!(source_mode.as_str(), "local_only" | "mixed");
        if effective_research_mode && local_mode && preload_local_sources {
            let paths_missing = local_corpus_paths
                .as_ref()
                .map(|p| p.is_empty())
                .unwrap_or(true);
            if paths_missing {
                notices.push(
                    "Research session requires local corpus sources, but no corpus paths are \
                     configured. Re-run with research mode and local corpus pointers."
                        .to_string(),
                );
                return Ok(self.finalize_turn(self.halted_result(
                    "local_corpus_missing",
                    notices,
                    context,
                    session_resolution,
                    preload,
                )));
            }
            if preload.local.ingested.is_empty() {
                let detail = preload
                    .local
                    .warnings
                    .first()
                    .map(|w| format!(" Details: {w}"))
                    .unwrap_or_default();
                notices.push(format!(
                    "No local corpus documents were ingested from {} configured path(s). \
                     Check the corpus pointers and re-run.{detail}",
                    local_corpus_paths.as_ref().map(|p| p.len()).unwrap_or(0)
                ));
                return Ok(self.finalize_turn(self.halted_result(
                    "local_corpus_ingestion_failed",
                    notices,
                    context,
                    session_resolution,
                    preload,
                )));
            }
        }

        // 6. Message construction.
        let local_kb_hint_enabled = !preload.local.ingested.is_empty()
            || local_corpus_paths.as_ref().map(|p| !p.is_empty()).unwrap_or(false);
        let section_tools_enabled = effective_research_mode && local_mode;
        if local_kb_hint_enabled {
            effective_query = redact_local_source_targets(
                &effective_query,
                local_corpus_paths.as_deref().unwrap_or(&[]),
                &preload,
            );
            if effective_query.trim().is_empty() {
                effective_query =
                    "Answer the user's request using the preloaded local knowledge base."
                        .to_string();
            }
        }

        let mut messages = self.build_messages(
            &effective_query,
            &context.context_str,
            session_manager.as_ref(),
            &preload,
            local_kb_hint_enabled,
            section_tools_enabled,
            effective_research_mode,
        )?;

        if !hooks.is_empty() {
            if let Some(first) = messages.first_mut() {
                if first.role == asky_llm::Role::System {
                    let extended = hooks.invoke_chain(
                        HookEvent::SystemPromptExtend,
                        serde_json::json!(first.content),
                    );
                    match extended.as_str() {
                        Some(prompt) => first.content = prompt.to_string(),
                        None => warn!("SYSTEM_PROMPT_EXTEND chain returned a non-string value"),
                    }
                }
            }
        }

        // 7. Disabled-tool resolution.
        let (disabled_tools, seed_direct_mode) =
            self.resolve_disabled_tools(&request, &preload, effective_research_mode);
        if seed_direct_mode {
            notices.push(
                "Direct-answer preload mode enabled: disabled web_search, get_url_content, \
                 and get_url_details for this turn."
                    .to_string(),
            );
        }

        // 8. Engine invocation.
        let registry_options = RegistryOptions {
            disabled_tools,
            session_id: session_row_id.map(|id| id.to_string()),
            session_row_id,
            corpus_preloaded: preload.is_corpus_preloaded(),
            research_source_mode: effective_source_mode.clone(),
            summarization_status: observers.summarization_status.clone(),
        };
        let registry = if effective_research_mode {
            create_research_tool_registry(
                &self.runtime,
                &registry_options,
                Arc::clone(&self.summarization_usage),
            )
        } else {
            create_tool_registry(
                &self.runtime,
                &registry_options,
                Arc::clone(&self.summarization_usage),
            )
        };

        let max_turns = session_resolution
            .max_turns
            .or(request.max_turns)
            .map(|m| m as usize)
            .or(self.model.max_turns)
            .unwrap_or(self.runtime.config.agent.max_turns);

        let mut engine = ConversationEngine::new(
            Arc::clone(&self.runtime.llm),
            EngineModel {
                model: self.model.model.clone(),
                max_tokens: self.model.max_tokens,
                temperature: self.model.temperature,
                context_size: self.model.context_size,
            },
            registry,
            Arc::clone(&self.usage),
            max_turns,
        )
        .with_summarizer(Arc::clone(&self.runtime.summarizer));
        if let Some(events) = &observers.engine_events {
            engine = engine.with_events(Arc::clone(events));
        }

        let outcome = engine.run(messages).await?;
        let final_answer = outcome.final_answer;
        messages = outcome.messages;
        debug!(answer_chars = final_answer.len(), "engine returned final answer");

        // 9. Persistence and background extraction.
        if !final_answer.is_empty() && request.save_history {
            if let Some(manager) = session_manager.as_mut() {
                manager.save_turn(&request.query_text, &final_answer, "", "")?;
                if !request.lean && manager.check_and_compact().await? {
                    notices.push("Session context compacted".to_string());
                }
            } else {
                self.runtime.store.save_interaction(
                    &request.query_text,
                    &final_answer,
                    &self.model_alias,
                    "",
                    "",
                )?;
            }
        }

        if !request.lean && !final_answer.is_empty() {
            if session_resolution.memory_auto_extract {
                self.spawn_memory_extraction(
                    effective_query.clone(),
                    final_answer.clone(),
                    session_row_id,
                )
                .await;
            }
            if capture_global_memory {
                self.spawn_memory_extraction(effective_query.clone(), final_answer.clone(), None)
                    .await;
            }
        }

        let result = TurnResult {
            final_answer,
            messages,
            model_alias: self.model_alias.clone(),
            session_id: session_row_id.map(|id| id.to_string()),
            halted: false,
            halt_reason: None,
            notices,
            context,
            session: session_resolution,
            preload,
        };
        Ok(self.finalize_turn(result))
    }

    fn halted_result(
        &self,
        halt_reason: &str,
        notices: Vec<String>,
        context: ContextResolution,
        session: crate::session::SessionResolution,
        preload: PreloadResolution,
    ) -> TurnResult {
        TurnResult {
            final_answer: String::new(),
            messages: Vec::new(),
            model_alias: self.model_alias.clone(),
            session_id: session.session_id.map(|id| id.to_string()),
            halted: true,
            halt_reason: Some(halt_reason.to_string()),
            notices,
            context,
            session,
            preload,
        }
    }

    /// Deferred fact extraction on the store-owned background pool.
    /// Failures never reach the user turn.
    async fn spawn_memory_extraction(
        &self,
        query: String,
        answer: String,
        session_id: Option<i64>,
    ) {
        let store = Arc::clone(&self.runtime.store);
        let embedder = Arc::clone(&self.runtime.embedder);
        let llm = Arc::clone(&self.runtime.llm);
        let model = self
            .runtime
            .config
            .model(&self.runtime.config.agent.summarization_model)
            .map(|m| m.model.clone())
            .unwrap_or_else(|_| self.model.model.clone());

        let job = extract_and_save_memories_from_turn(
            store, embedder, llm, model, query, answer, session_id,
        );
        match self.runtime.cache.background_handle() {
            Some(handle) => {
                if handle.submit(job).await.is_err() {
                    warn!("background pool rejected memory extraction");
                }
            }
            None => {
                tokio::spawn(job);
            }
        }
        info!(session_id, "memory extraction scheduled");
    }

    /// Fire TURN_COMPLETED for every outcome, halted turns included.
    fn finalize_turn(&self, result: TurnResult) -> TurnResult {
        let hooks = &self.runtime.hooks;
        if !hooks.is_empty() {
            let mut ctx = HookContext::new(
                HookEvent::TurnCompleted,
                serde_json::json!({
                    "halted": result.halted,
                    "halt_reason": result.halt_reason,
                    "session_id": result.session_id,
                    "answer_chars": result.final_answer.len(),
                    "notices": result.notices,
                }),
            );
            hooks.invoke(HookEvent::TurnCompleted, &mut ctx);
        }
        result
    }
}

/// Strip a case-insensitive prefix, mapping back to the original string's
/// boundaries so multi-byte casing never splits a char.
fn strip_prefix_case_insensitive<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix_folded = prefix.to_lowercase();
    for (index, _) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        let head = &text[..index];
        if head.to_lowercase() == prefix_folded {
            return Some(&text[index..]);
        }
        if head.len() > prefix_folded.len() + 4 {
            break;
        }
    }
    None
}

/// Replace raw local paths in the query with their opaque corpus handles.
fn redact_local_source_targets(
    query: &str,
    corpus_paths: &[String],
    preload: &PreloadResolution,
) -> String {
    let mut redacted = query.to_string();
    for path in corpus_paths {
        if path.is_empty() {
            continue;
        }
        let replacement = preload
            .preloaded_source_handles
            .get(path)
            .cloned()
            .unwrap_or_else(|| "[local source]".to_string());
        redacted = redacted.replace(path.as_str(), &replacement);
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_prefix_strip() {
        assert_eq!(
            strip_prefix_case_insensitive("Remember: I use vim", "remember:"),
            Some(" I use vim")
        );
        assert_eq!(strip_prefix_case_insensitive("nothing here", "remember:"), None);
    }

    #[test]
    fn local_paths_are_redacted_with_handles() {
        let mut preload = PreloadResolution::default();
        preload
            .preloaded_source_handles
            .insert("/home/user/notes.md".to_string(), "corpus://cache/3".to_string());
        let redacted = redact_local_source_targets(
            "summarize /home/user/notes.md please",
            &["/home/user/notes.md".to_string()],
            &preload,
        );
        assert_eq!(redacted, "summarize corpus://cache/3 please");
    }
}
