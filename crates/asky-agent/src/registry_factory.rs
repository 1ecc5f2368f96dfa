//! Factories for the standard and research tool registries.

use std::collections::HashSet;
use std::sync::Arc;

use asky_hooks::{HookContext, HookEvent};
use asky_llm::UsageTracker;

use crate::registry::{ToolRegistry, ToolSpec};
use crate::runtime::AskyRuntime;
use crate::tools::memory_tools::{QueryResearchMemoryTool, SaveFindingTool, SaveMemoryTool};
use crate::tools::research_tools::{
    ExtractLinksTool, GetFullContentTool, GetLinkSummariesTool, GetRelevantContentTool,
    DEFAULT_HYBRID_DENSE_WEIGHT, DEFAULT_MIN_CHUNK_RELEVANCE,
};
use crate::tools::section_tools::{ListSectionsTool, SummarizeSectionTool};
use crate::tools::url_tools::{GetUrlContentTool, GetUrlDetailsTool, SummarizationStatus};
use crate::tools::web_search::WebSearchTool;

/// Tools that acquire new corpus content. Disabled when the corpus is
/// already preloaded, to force reuse of prefetched content.
pub const ACQUISITION_TOOL_NAMES: &[&str] =
    &["extract_links", "get_link_summaries", "get_full_content"];

/// Tools that only operate on the local corpus; registered solely for
/// `research_source_mode` local_only or mixed.
pub const LOCAL_CORPUS_ONLY_RESEARCH_TOOLS: &[&str] = &["list_sections", "summarize_section"];

/// Discovery tools disabled for a standard turn whose seed URLs already
/// answer the question.
pub const STANDARD_SEED_DIRECT_ANSWER_DISABLED_TOOLS: &[&str] =
    &["web_search", "get_url_content", "get_url_details"];

/// Every tool name either registry can produce, for lean-mode disablement.
pub fn all_tool_names() -> Vec<&'static str> {
    vec![
        "web_search",
        "get_url_content",
        "get_url_details",
        "extract_links",
        "get_link_summaries",
        "get_relevant_content",
        "get_full_content",
        "list_sections",
        "summarize_section",
        "save_finding",
        "query_research_memory",
        "save_memory",
    ]
}

/// Per-turn registry construction options.
#[derive(Default)]
pub struct RegistryOptions {
    pub disabled_tools: HashSet<String>,
    /// Research session scope for findings/memory (TEXT at this boundary).
    pub session_id: Option<String>,
    /// Session row id for session-scoped user memories.
    pub session_row_id: Option<i64>,
    pub corpus_preloaded: bool,
    pub research_source_mode: Option<String>,
    pub summarization_status: Option<Arc<dyn SummarizationStatus>>,
}

fn enabled(name: &str, disabled: &HashSet<String>) -> bool {
    !disabled.contains(name)
}

/// Standard-mode registry: search, page fetch, user memory.
pub fn create_tool_registry(
    rt: &AskyRuntime,
    opts: &RegistryOptions,
    summarization_tracker: Arc<UsageTracker>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let disabled = &opts.disabled_tools;

    if enabled("web_search", disabled) {
        registry.register(
            web_search_spec(false),
            Arc::new(WebSearchTool::new(
                Arc::clone(&rt.search),
                rt.config.search.default_count,
            )),
        );
    }
    if enabled("get_url_content", disabled) {
        registry.register(
            get_url_content_spec(),
            Arc::new(GetUrlContentTool::new(
                Arc::clone(&rt.retriever),
                Arc::clone(&rt.cache),
                Arc::clone(&rt.summarizer),
                summarization_tracker,
                opts.summarization_status.clone(),
            )),
        );
    }
    if enabled("get_url_details", disabled) {
        registry.register(
            get_url_details_spec(),
            Arc::new(GetUrlDetailsTool::new(
                Arc::clone(&rt.retriever),
                Arc::clone(&rt.cache),
                rt.config.research.max_links_per_url,
            )),
        );
    }
    if enabled("save_memory", disabled) {
        registry.register(
            save_memory_spec(),
            Arc::new(SaveMemoryTool::new(
                Arc::clone(&rt.store),
                Arc::clone(&rt.embedder),
                opts.session_row_id,
            )),
        );
    }

    invoke_build_hook(rt, "standard", &registry, disabled);
    registry
}

/// Research-mode registry: discovery plus RAG retrieval and findings.
pub fn create_research_tool_registry(
    rt: &AskyRuntime,
    opts: &RegistryOptions,
    summarization_tracker: Arc<UsageTracker>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let mut disabled = opts.disabled_tools.clone();
    if opts.corpus_preloaded {
        for name in ACQUISITION_TOOL_NAMES {
            disabled.insert((*name).to_string());
        }
    }
    let source_mode = opts
        .research_source_mode
        .as_deref()
        .map(|m| m.trim().to_lowercase())
        .unwrap_or_default();
    let section_tools_allowed = matches!(source_mode.as_str(), "local_only" | "mixed");

    if enabled("web_search", &disabled) {
        registry.register(
            web_search_spec(true),
            Arc::new(WebSearchTool::new(
                Arc::clone(&rt.search),
                rt.config.search.default_count,
            )),
        );
    }
    if enabled("extract_links", &disabled) {
        registry.register(
            extract_links_spec(),
            Arc::new(ExtractLinksTool::new(
                Arc::clone(&rt.retriever),
                Arc::clone(&rt.cache),
                Arc::clone(&rt.vector),
                rt.config.research.max_links_per_url,
                rt.config.research.max_relevant_links,
            )),
        );
    }
    if enabled("get_link_summaries", &disabled) {
        registry.register(
            get_link_summaries_spec(),
            Arc::new(GetLinkSummariesTool::new(Arc::clone(&rt.cache))),
        );
    }
    if enabled("get_relevant_content", &disabled) {
        registry.register(
            get_relevant_content_spec(),
            Arc::new(GetRelevantContentTool::new(
                Arc::clone(&rt.cache),
                Arc::clone(&rt.vector),
                rt.config.research.max_chunks_per_retrieval,
            )),
        );
    }
    if enabled("get_full_content", &disabled) {
        registry.register(
            get_full_content_spec(),
            Arc::new(GetFullContentTool::new(Arc::clone(&rt.cache))),
        );
    }
    if section_tools_allowed {
        if enabled("list_sections", &disabled) {
            registry.register(
                list_sections_spec(),
                Arc::new(ListSectionsTool::new(Arc::clone(&rt.cache), source_mode.clone())),
            );
        }
        if enabled("summarize_section", &disabled) {
            registry.register(
                summarize_section_spec(),
                Arc::new(SummarizeSectionTool::new(
                    Arc::clone(&rt.cache),
                    Arc::clone(&rt.summarizer),
                    Arc::clone(&summarization_tracker),
                    source_mode.clone(),
                )),
            );
        }
    }
    if enabled("save_finding", &disabled) {
        registry.register(
            save_finding_spec(),
            Arc::new(SaveFindingTool::new(
                Arc::clone(&rt.cache),
                Arc::clone(&rt.vector),
                opts.session_id.clone(),
            )),
        );
    }
    if enabled("query_research_memory", &disabled) {
        registry.register(
            query_research_memory_spec(),
            Arc::new(QueryResearchMemoryTool::new(
                Arc::clone(&rt.cache),
                Arc::clone(&rt.vector),
                opts.session_id.clone(),
                rt.config.research.memory_max_results,
            )),
        );
    }
    if enabled("save_memory", &disabled) {
        registry.register(
            save_memory_spec(),
            Arc::new(SaveMemoryTool::new(
                Arc::clone(&rt.store),
                Arc::clone(&rt.embedder),
                opts.session_row_id,
            )),
        );
    }

    invoke_build_hook(rt, "research", &registry, &disabled);
    registry
}

fn invoke_build_hook(rt: &AskyRuntime, mode: &str, registry: &ToolRegistry, disabled: &HashSet<String>) {
    if rt.hooks.is_empty() {
        return;
    }
    let mut ctx = HookContext::new(
        HookEvent::ToolRegistryBuild,
        serde_json::json!({
            "mode": mode,
            "tools": registry.names(),
            "disabled_tools": disabled.iter().collect::<Vec<_>>(),
        }),
    );
    rt.hooks.invoke(HookEvent::ToolRegistryBuild, &mut ctx);
}

// Tool specs.

fn web_search_spec(research: bool) -> ToolSpec {
    ToolSpec {
        name: "web_search".to_string(),
        description: if research {
            "Search the web and return top results. Use this to find relevant sources \
             for your research."
        } else {
            "Search the web and return top results."
        }
        .to_string(),
        system_prompt_guideline: Some(if research {
            "Use for broad discovery and to refresh candidate sources as research evolves."
                .to_string()
        } else {
            "Use for discovery of relevant sources before deep content fetches.".to_string()
        }),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "q": { "type": "string", "description": "Search query" },
                "count": { "type": "integer", "default": 5, "description": "Number of results" }
            },
            "required": ["q"]
        }),
    }
}

fn get_url_content_spec() -> ToolSpec {
    ToolSpec {
        name: "get_url_content".to_string(),
        description: "Fetch one or more URLs and return extracted main content in lightweight \
                      markdown."
            .to_string(),
        system_prompt_guideline: Some(
            "Use after discovery to read the primary content of selected pages.".to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "urls": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of URLs to fetch content from."
                },
                "url": { "type": "string", "description": "Single URL (deprecated, use 'urls')." },
                "summarize": {
                    "type": "boolean",
                    "description": "If true, summarize the content of each page with an LLM."
                }
            },
            "required": []
        }),
    }
}

fn get_url_details_spec() -> ToolSpec {
    ToolSpec {
        name: "get_url_details".to_string(),
        description: "Fetch extracted main content plus discovered links from a URL.".to_string(),
        system_prompt_guideline: Some(
            "Use when you need both page body and outgoing links from a single URL.".to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        }),
    }
}

fn extract_links_spec() -> ToolSpec {
    ToolSpec {
        name: "extract_links".to_string(),
        description: "Extract and discover links from web pages for research exploration. \
Returns ONLY link labels and URLs - the actual page content is cached for later retrieval. \
Use this to explore what information is available before deciding what to read in depth. \
Optionally provide a research query to rank links by semantic relevance."
            .to_string(),
        system_prompt_guideline: Some(
            "Run early to discover candidate links and cache page data before deeper reads."
                .to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "urls": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "URLs to extract links from"
                },
                "url": { "type": "string", "description": "Single URL (alternative to urls array)" },
                "query": {
                    "type": "string",
                    "description": "Optional: research query to rank links by relevance"
                },
                "max_links": {
                    "type": "integer",
                    "default": 30,
                    "description": "Maximum links to return per URL"
                }
            },
            "required": []
        }),
    }
}

fn get_link_summaries_spec() -> ToolSpec {
    ToolSpec {
        name: "get_link_summaries".to_string(),
        description: "Get AI-generated summaries of previously cached pages. \
Use after extract_links to preview page contents before requesting full content. \
Summaries are generated in the background - status may show 'processing' if not ready yet."
            .to_string(),
        system_prompt_guideline: Some(
            "Use to quickly triage cached pages before spending tokens on long content."
                .to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "urls": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "URLs to get summaries for (must be previously cached)"
                }
            },
            "required": ["urls"]
        }),
    }
}

fn get_relevant_content_spec() -> ToolSpec {
    ToolSpec {
        name: "get_relevant_content".to_string(),
        description: "Retrieve only the most relevant content sections from cached pages using \
semantic search. Much more efficient than full content for extracting specific information."
            .to_string(),
        system_prompt_guideline: Some(
            "Prefer this over full-page reads when you need targeted facts for a specific question."
                .to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "urls": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "URLs to retrieve content from (must be cached)"
                },
                "query": { "type": "string", "description": "What specific information are you looking for?" },
                "max_chunks": { "type": "integer", "default": 5 },
                "dense_weight": { "type": "number", "default": DEFAULT_HYBRID_DENSE_WEIGHT },
                "min_relevance": { "type": "number", "default": DEFAULT_MIN_CHUNK_RELEVANCE },
                "section_id": { "type": "string", "description": "Optional section scope from list_sections output." },
                "section_ref": {
                    "type": "string",
                    "description": "Optional section reference (corpus://cache/<id>#section=<section-id>)."
                }
            },
            "required": ["urls", "query"]
        }),
    }
}

fn get_full_content_spec() -> ToolSpec {
    ToolSpec {
        name: "get_full_content".to_string(),
        description: "Retrieve the complete cached content from pages. More token-intensive than \
get_relevant_content - use sparingly. Content must have been cached previously."
            .to_string(),
        system_prompt_guideline: Some(
            "Reserve for cases where targeted retrieval is insufficient and full context is required."
                .to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "urls": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "URLs to get full content from (must be cached)"
                },
                "section_id": { "type": "string" },
                "section_ref": { "type": "string" }
            },
            "required": ["urls"]
        }),
    }
}

fn list_sections_spec() -> ToolSpec {
    ToolSpec {
        name: "list_sections".to_string(),
        description: "List detected section headings for local corpus sources. \
Use this to inspect available section titles before requesting a deep section summary. \
This tool only supports local corpus handles/sources, not web URLs."
            .to_string(),
        system_prompt_guideline: Some(
            "For local corpus research, call this first to discover exact section titles."
                .to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "source": { "type": "string", "description": "Source selector (prefer corpus://cache/<id>)." },
                "sources": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Source selectors for batch listing."
                },
                "include_toc": { "type": "boolean", "default": false }
            },
            "required": []
        }),
    }
}

fn summarize_section_spec() -> ToolSpec {
    ToolSpec {
        name: "summarize_section".to_string(),
        description: "Summarize one specific section from a local corpus source. \
Use exact section titles from list_sections for reliable matching. \
This tool only supports local corpus handles/sources, not web URLs."
            .to_string(),
        system_prompt_guideline: Some(
            "Use after list_sections to produce deep section-bounded summaries from local corpus \
             sources."
                .to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "source": { "type": "string", "description": "Source selector (prefer corpus://cache/<id>)." },
                "section_query": { "type": "string", "description": "Section title query for strict matching." },
                "section_id": { "type": "string", "description": "Exact section ID from list_sections output." },
                "section_ref": {
                    "type": "string",
                    "description": "Section reference (corpus://cache/<id>#section=<section-id>)."
                },
                "detail": { "type": "string", "description": "Summary detail profile: balanced|max|compact.", "default": "balanced" },
                "max_chunks": { "type": "integer", "description": "Optional chunk limit for section slicing." }
            },
            "required": []
        }),
    }
}

fn save_finding_spec() -> ToolSpec {
    ToolSpec {
        name: "save_finding".to_string(),
        description: "Save a discovered fact or insight to research memory for future reference. \
Findings are stored with embeddings for semantic retrieval. Include source URL and tags."
            .to_string(),
        system_prompt_guideline: Some(
            "Persist high-value findings with source metadata as you validate them.".to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "finding": { "type": "string", "description": "The fact or insight to save" },
                "source_url": { "type": "string" },
                "source_title": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["finding"]
        }),
    }
}

fn query_research_memory_spec() -> ToolSpec {
    ToolSpec {
        name: "query_research_memory".to_string(),
        description: "Search your research memory for previously saved findings using semantic \
search. Useful for recalling facts, statistics, or insights discovered before."
            .to_string(),
        system_prompt_guideline: Some(
            "Use at the start of research to reuse prior findings before collecting new sources."
                .to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to search for in research memory" },
                "limit": { "type": "integer", "default": 10 }
            },
            "required": ["query"]
        }),
    }
}

fn save_memory_spec() -> ToolSpec {
    ToolSpec {
        name: "save_memory".to_string(),
        description: "Persist a durable fact about the user or their preferences. \
Saved memories are recalled by similarity on future turns.".to_string(),
        system_prompt_guideline: Some(
            "Save only durable user facts and preferences, never transient request details."
                .to_string(),
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact to remember" },
                "category": { "type": "string", "description": "Optional category label" },
                "global": {
                    "type": "boolean",
                    "default": false,
                    "description": "Store globally instead of scoping to this session"
                }
            },
            "required": ["content"]
        }),
    }
}
