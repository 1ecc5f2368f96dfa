use serde::{Deserialize, Serialize};

/// Extension points observed during one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    /// Fired after session resolution; payload describes the resolution.
    SessionResolved,
    /// Fired before the preload pipeline with a mutable payload the
    /// handlers may rewrite (query text, corpus paths, toggles).
    PrePreload,
    /// Fired after the preload pipeline with the resolved bundle.
    PostPreload,
    /// Fired after a tool registry is constructed.
    ToolRegistryBuild,
    /// Chain event: the system prompt threads through handlers.
    SystemPromptExtend,
    /// Fired when a turn finishes, including halted turns.
    TurnCompleted,
}

/// The runtime context passed into `invoke` handlers.
///
/// Payload is untyped JSON so the registry stays decoupled from domain
/// structs; handlers mutate it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    pub event: HookEvent,
    pub payload: serde_json::Value,
}

impl HookContext {
    pub fn new(event: HookEvent, payload: serde_json::Value) -> Self {
        Self { event, payload }
    }
}

/// Side-effect handler for `invoke` events. Errors are logged by the
/// registry and never propagated to the turn.
pub trait HookHandler: Send + Sync {
    fn handle(&self, ctx: &mut HookContext) -> Result<(), String>;
}

impl<F> HookHandler for F
where
    F: Fn(&mut HookContext) -> Result<(), String> + Send + Sync,
{
    fn handle(&self, ctx: &mut HookContext) -> Result<(), String> {
        self(ctx)
    }
}

/// Value-threading handler for `invoke_chain` events.
pub trait ChainHandler: Send + Sync {
    fn handle(&self, value: serde_json::Value) -> serde_json::Value;
}

impl<F> ChainHandler for F
where
    F: Fn(serde_json::Value) -> serde_json::Value + Send + Sync,
{
    fn handle(&self, value: serde_json::Value) -> serde_json::Value {
        self(value)
    }
}
