use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, warn};

use crate::types::{ChainHandler, HookContext, HookEvent, HookHandler};

struct HookEntry {
    name: String,
    event: HookEvent,
    handler: Arc<dyn HookHandler>,
}

struct ChainEntry {
    name: String,
    event: HookEvent,
    handler: Arc<dyn ChainHandler>,
}

/// Central registry for hook handlers.
///
/// Two shapes exist and are deliberately kept apart: `invoke` runs
/// side-effect handlers over a mutable context, `invoke_chain` threads a
/// value through handlers and returns the final value. Both run in
/// registration order; handler failures are logged, never propagated.
pub struct HookRegistry {
    hooks: RwLock<Vec<HookEntry>>,
    chains: RwLock<Vec<ChainEntry>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            chains: RwLock::new(Vec::new()),
        }
    }

    pub fn register(
        &self,
        event: HookEvent,
        name: impl Into<String>,
        handler: Arc<dyn HookHandler>,
    ) {
        let mut hooks = self.hooks.write().expect("hook registry poisoned");
        let name = name.into();
        debug!(?event, %name, "hook registered");
        hooks.push(HookEntry { name, event, handler });
    }

    pub fn register_chain(
        &self,
        event: HookEvent,
        name: impl Into<String>,
        handler: Arc<dyn ChainHandler>,
    ) {
        let mut chains = self.chains.write().expect("hook registry poisoned");
        let name = name.into();
        debug!(?event, %name, "chain hook registered");
        chains.push(ChainEntry { name, event, handler });
    }

    /// Remove all handlers registered under `name`. Silent no-op when the
    /// name is unknown.
    pub fn unregister(&self, name: &str) {
        self.hooks
            .write()
            .expect("hook registry poisoned")
            .retain(|h| h.name != name);
        self.chains
            .write()
            .expect("hook registry poisoned")
            .retain(|h| h.name != name);
    }

    /// Run all `invoke` handlers for `event` in registration order,
    /// mutating the context in place.
    pub fn invoke(&self, event: HookEvent, ctx: &mut HookContext) {
        let hooks = self.hooks.read().expect("hook registry poisoned");
        for hook in hooks.iter().filter(|h| h.event == event) {
            let started = Instant::now();
            if let Err(reason) = hook.handler.handle(ctx) {
                warn!(hook = %hook.name, ?event, reason, "hook handler failed");
                continue;
            }
            debug!(
                hook = %hook.name,
                ?event,
                duration_ms = started.elapsed().as_millis() as u64,
                "hook completed"
            );
        }
    }

    /// Thread `value` through all chain handlers for `event` in
    /// registration order and return the final value.
    pub fn invoke_chain(&self, event: HookEvent, mut value: serde_json::Value) -> serde_json::Value {
        let chains = self.chains.read().expect("hook registry poisoned");
        for chain in chains.iter().filter(|h| h.event == event) {
            value = chain.handler.handle(value);
        }
        value
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().expect("hook registry poisoned").is_empty()
            && self.chains.read().expect("hook registry poisoned").is_empty()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_mutates_payload_in_registration_order() {
        let registry = HookRegistry::new();
        registry.register(
            HookEvent::PrePreload,
            "first",
            Arc::new(|ctx: &mut HookContext| -> Result<(), String> {
                ctx.payload["order"] = serde_json::json!("first");
                Ok(())
            }),
        );
        registry.register(
            HookEvent::PrePreload,
            "second",
            Arc::new(|ctx: &mut HookContext| -> Result<(), String> {
                let prev = ctx.payload["order"].as_str().unwrap_or("").to_string();
                ctx.payload["order"] = serde_json::json!(format!("{prev},second"));
                Ok(())
            }),
        );

        let mut ctx = HookContext::new(HookEvent::PrePreload, serde_json::json!({}));
        registry.invoke(HookEvent::PrePreload, &mut ctx);
        assert_eq!(ctx.payload["order"], "first,second");
    }

    #[test]
    fn invoke_skips_other_events() {
        let registry = HookRegistry::new();
        registry.register(
            HookEvent::TurnCompleted,
            "only-turn",
            Arc::new(|ctx: &mut HookContext| -> Result<(), String> {
                ctx.payload = serde_json::json!({"touched": true});
                Ok(())
            }),
        );
        let mut ctx = HookContext::new(HookEvent::PrePreload, serde_json::json!({}));
        registry.invoke(HookEvent::PrePreload, &mut ctx);
        assert_eq!(ctx.payload, serde_json::json!({}));
    }

    #[test]
    fn chain_threads_value_through_handlers() {
        let registry = HookRegistry::new();
        registry.register_chain(
            HookEvent::SystemPromptExtend,
            "suffix-a",
            Arc::new(|value: serde_json::Value| -> serde_json::Value {
                serde_json::json!(format!("{}+a", value.as_str().unwrap_or("")))
            }),
        );
        registry.register_chain(
            HookEvent::SystemPromptExtend,
            "suffix-b",
            Arc::new(|value: serde_json::Value| -> serde_json::Value {
                serde_json::json!(format!("{}+b", value.as_str().unwrap_or("")))
            }),
        );

        let out = registry.invoke_chain(HookEvent::SystemPromptExtend, serde_json::json!("base"));
        assert_eq!(out, "base+a+b");
    }

    #[test]
    fn handler_failure_does_not_stop_the_chain() {
        let registry = HookRegistry::new();
        registry.register(
            HookEvent::PostPreload,
            "broken",
            Arc::new(|_: &mut HookContext| -> Result<(), String> { Err("boom".to_string()) }),
        );
        registry.register(
            HookEvent::PostPreload,
            "working",
            Arc::new(|ctx: &mut HookContext| -> Result<(), String> {
                ctx.payload = serde_json::json!({"ok": true});
                Ok(())
            }),
        );
        let mut ctx = HookContext::new(HookEvent::PostPreload, serde_json::json!({}));
        registry.invoke(HookEvent::PostPreload, &mut ctx);
        assert_eq!(ctx.payload["ok"], true);
    }
}
