//! Tool registry: name-keyed specs plus executors, schema exposure, and
//! dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use asky_llm::ToolDefinition;

/// A tool's LLM-facing contract. Opaque to the conversation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Optional line appended under "Enabled Tool Guidelines" in the
    /// system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_guideline: Option<String>,
    /// JSON-schema parameter object.
    pub parameters: serde_json::Value,
}

/// Executes one tool invocation. Executors never raise across this
/// boundary: failures come back as `{"error": ...}` payloads so the model
/// can observe and react.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value;
}

/// Convenience error payload for executors.
pub fn error_payload(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

struct ToolEntry {
    spec: ToolSpec,
    executor: Arc<dyn ToolExecutor>,
}

/// Ordered, name-keyed map of registered tools. Duplicate names
/// overwrite in place, keeping the original position.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn register(&mut self, spec: ToolSpec, executor: Arc<dyn ToolExecutor>) {
        debug!(tool = %spec.name, "tool registered");
        if let Some(existing) = self.entries.iter_mut().find(|e| e.spec.name == spec.name) {
            existing.spec = spec;
            existing.executor = executor;
            return;
        }
        self.entries.push(ToolEntry { spec, executor });
    }

    /// Schemas for the LLM request, in registration order.
    pub fn specs(&self) -> Vec<ToolDefinition> {
        self.entries
            .iter()
            .map(|e| ToolDefinition {
                name: e.spec.name.clone(),
                description: e.spec.description.clone(),
                parameters: e.spec.parameters.clone(),
            })
            .collect()
    }

    /// Non-empty guideline lines, in registration order.
    pub fn system_prompt_guidelines(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|e| e.spec.system_prompt_guideline.clone())
            .filter(|g| !g.trim().is_empty())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.spec.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.spec.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatch a tool invocation. `None` means the tool is unknown; the
    /// engine converts that into an explanatory tool message.
    pub async fn dispatch(&self, name: &str, args: serde_json::Value) -> Option<serde_json::Value> {
        let entry = self.entries.iter().find(|e| e.spec.name == name)?;
        debug!(tool = name, "dispatching tool");
        Some(entry.executor.execute(args).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolExecutor for EchoTool {
        async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
            serde_json::json!({ "echo": args })
        }
    }

    fn spec(name: &str, guideline: Option<&str>) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: format!("{name} tool"),
            system_prompt_guideline: guideline.map(|g| g.to_string()),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    #[tokio::test]
    async fn register_specs_and_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("alpha", Some("use alpha first")), Arc::new(EchoTool));
        registry.register(spec("beta", None), Arc::new(EchoTool));

        let specs = registry.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "alpha");

        assert_eq!(registry.system_prompt_guidelines(), vec!["use alpha first"]);

        let result = registry
            .dispatch("alpha", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(result["echo"]["x"], 1);

        assert!(registry.dispatch("gamma", serde_json::json!({})).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_overwrites_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("alpha", Some("old")), Arc::new(EchoTool));
        registry.register(spec("beta", None), Arc::new(EchoTool));
        registry.register(spec("alpha", Some("new")), Arc::new(EchoTool));

        assert_eq!(registry.names(), vec!["alpha", "beta"]);
        assert_eq!(registry.system_prompt_guidelines(), vec!["new"]);
    }
}
