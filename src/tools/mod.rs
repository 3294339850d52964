pub mod adapt;
pub mod learn;
pub mod optimize;
pub mod productivity;
pub mod util;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::warn;

use crate::config::ServerConfig;
use crate::mcp::protocol::{Tool, ToolResult};
use crate::state::AgentState;

/// The fixed, stable tool catalog. Only these names are ever tracked in
/// usage metrics; unknown names must not grow the counters.
pub const TOOL_NAMES: [&str; 9] = [
    "echo",
    "system_info",
    "learn_from_interaction",
    "get_learning_insights",
    "adapt_behavior",
    "optimize_performance",
    "auto_optimize",
    "track_productivity",
    "enhance_tool_usage",
];

/// Shared dependencies available to all tool handlers
pub struct ToolContext {
    pub state: Arc<Mutex<AgentState>>,
    pub config: Arc<ServerConfig>,
}

impl ToolContext {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let state = Arc::new(Mutex::new(AgentState::new(&config)));
        Self { state, config }
    }

    /// Lock the shared state, surfacing a poisoned lock as an error
    /// instead of panicking.
    pub fn lock_state(&self) -> Result<MutexGuard<'_, AgentState>> {
        self.state
            .lock()
            .map_err(|e| anyhow!("State lock poisoned: {}", e))
    }
}

pub struct ToolRegistry {
    ctx: Arc<ToolContext>,
}

impl ToolRegistry {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ToolContext> {
        &self.ctx
    }

    pub fn list(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "echo".into(),
                description: "Echo the given message back, prefixed.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "message": { "type": "string", "description": "Text to echo back" }
                    },
                    "required": ["message"]
                }),
            },
            Tool {
                name: "system_info".into(),
                description: "Report server and platform information. Only an allow-listed set of environment values is ever included.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "detailLevel": { "type": "string", "enum": ["basic", "detailed"], "default": "basic" }
                    }
                }),
            },
            Tool {
                name: "learn_from_interaction".into(),
                description: "Record an interaction (input, response, optional feedback) and learn from it.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "interaction": {
                            "type": "object",
                            "properties": {
                                "userInput": { "type": "string", "description": "What the user asked" },
                                "aiResponse": { "type": "string", "description": "What the assistant answered" },
                                "userFeedback": { "type": "string", "description": "Free-text feedback, if any" },
                                "success": { "type": "boolean", "description": "Whether the exchange succeeded" },
                                "context": { "type": "string", "description": "Optional situational context" }
                            },
                            "required": ["userInput", "aiResponse"]
                        }
                    },
                    "required": ["interaction"]
                }),
            },
            Tool {
                name: "get_learning_insights".into(),
                description: "Summarize what has been learned: interaction totals, facts, patterns, preferences.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "adapt_behavior".into(),
                description: "Adjust behavioral preferences. Only fields present in the adaptation are changed.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "adaptation": {
                            "type": "object",
                            "properties": {
                                "communicationStyle": { "type": "string", "enum": ["formal", "casual", "technical", "friendly"] },
                                "responseDetailLevel": { "type": "string", "enum": ["concise", "balanced", "detailed"] },
                                "proactivityLevel": { "type": "string", "enum": ["low", "medium", "high"] },
                                "learningRate": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                                "customPreferences": { "type": "object", "description": "Open-ended preference knobs" }
                            }
                        }
                    },
                    "required": ["adaptation"]
                }),
            },
            Tool {
                name: "optimize_performance".into(),
                description: "Report current performance metrics with rule-based recommendations. Read-only.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "auto_optimize".into(),
                description: "Run the self-optimization pass. Skipped unless forced or the configured interval has elapsed.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "force": { "type": "boolean", "default": false, "description": "Run even if the interval has not elapsed" }
                    }
                }),
            },
            Tool {
                name: "track_productivity".into(),
                description: "Track productivity: add tasks, set and complete goals, read metrics, analyze efficiency.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "action": { "type": "string", "enum": ["add_task", "complete_task", "set_goal", "get_metrics", "analyze_efficiency"] },
                        "task": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "efficiency": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                                "toolsUsed": { "type": "array", "items": { "type": "string" } }
                            }
                        },
                        "goal": {
                            "type": "object",
                            "properties": {
                                "description": { "type": "string" },
                                "priority": { "type": "string", "enum": ["low", "medium", "high"] },
                                "deadline": { "type": "string" }
                            }
                        },
                        "goalId": { "type": "string", "description": "Goal id for complete_task" }
                    },
                    "required": ["action"]
                }),
            },
            Tool {
                name: "enhance_tool_usage".into(),
                description: "Report per-tool usage and effectiveness with suggestions. Read-only.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "toolName": { "type": "string", "description": "Restrict the report to one tool" }
                    }
                }),
            },
        ]
    }

    /// Execute a tool call. Arguments are expected to be sanitized already;
    /// this layer adds the dispatcher-side bookkeeping: response-time
    /// averaging, per-tool usage/success counts, and error metrics.
    pub async fn execute(&self, name: &str, args: Value) -> Result<ToolResult> {
        let known = TOOL_NAMES.contains(&name);
        let started = Instant::now();

        let result = self.dispatch(name, &args);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if known {
            match &result {
                Ok(tool_result) => {
                    let mut state = self.ctx.lock_state()?;
                    state.update_average_response_time(elapsed_ms);
                    state.track_tool_usage(name, !tool_result.is_error());
                }
                Err(e) => {
                    warn!(tool = %name, error = %e, "Tool handler failed");
                    if let Ok(mut state) = self.ctx.lock_state() {
                        state.update_average_response_time(elapsed_ms);
                        state.track_tool_usage(name, false);
                        state.record_tool_error(name, &e.to_string());
                    }
                }
            }
        }

        result
    }

    fn dispatch(&self, name: &str, args: &Value) -> Result<ToolResult> {
        match name {
            "echo" => util::handle_echo(args),
            "system_info" => util::handle_system_info(args),
            "learn_from_interaction" => learn::handle_learn_from_interaction(&self.ctx, args),
            "get_learning_insights" => learn::handle_get_learning_insights(&self.ctx),
            "adapt_behavior" => adapt::handle_adapt_behavior(&self.ctx, args),
            "optimize_performance" => optimize::handle_optimize_performance(&self.ctx),
            "auto_optimize" => optimize::handle_auto_optimize(&self.ctx, args),
            "track_productivity" => productivity::handle_track_productivity(&self.ctx, args),
            "enhance_tool_usage" => optimize::handle_enhance_tool_usage(&self.ctx, args),
            _ => Ok(ToolResult::error(format!("Tool not found: {}", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let config = Arc::new(ServerConfig::default());
        ToolRegistry::new(Arc::new(ToolContext::new(config)))
    }

    #[tokio::test]
    async fn test_catalog_matches_tool_names() {
        let registry = registry();
        let listed: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(listed, TOOL_NAMES.to_vec());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result_and_untracked() {
        let registry = registry();
        let result = registry.execute("defragment", json!({})).await.unwrap();
        assert!(result.is_error());

        let state = registry.context().lock_state().unwrap();
        assert!(state.performance().tool_usage_count.is_empty());
    }

    #[tokio::test]
    async fn test_execute_tracks_usage_and_latency() {
        let registry = registry();
        registry
            .execute("echo", json!({"message": "hi"}))
            .await
            .unwrap();

        let state = registry.context().lock_state().unwrap();
        assert_eq!(state.performance().tool_usage_count["echo"], 1);
        assert_eq!(
            state.productivity().tool_effectiveness["echo"].success,
            1
        );
    }

    #[tokio::test]
    async fn test_error_result_counts_as_unsuccessful_use() {
        let registry = registry();
        registry.execute("echo", json!({})).await.unwrap();

        let state = registry.context().lock_state().unwrap();
        let eff = state.productivity().tool_effectiveness["echo"];
        assert_eq!(eff.uses, 1);
        assert_eq!(eff.success, 0);
    }
}
