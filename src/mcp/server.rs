use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::protocol::*;
use super::transport::Handler;
use crate::sanitize::sanitize;
use crate::tools::{ToolContext, ToolRegistry};

const MCP_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "selftune";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Server {
    registry: ToolRegistry,
    ctx: Arc<ToolContext>,
}

impl Server {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self {
            registry: ToolRegistry::new(ctx.clone()),
            ctx,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if let Some(params) = request.params.clone() {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(params) => debug!(
                    "Client initialized: {} v{}",
                    params.client_info.name, params.client_info.version
                ),
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        INVALID_PARAMS,
                        format!("Invalid initialize params: {}", e),
                    );
                }
            }
        }

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                resources: Some(json!({})),
                prompts: Some(json!({})),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(v) => JsonRpcResponse::success(request.id, v),
            Err(e) => JsonRpcResponse::error(
                request.id,
                INTERNAL_ERROR,
                format!("Serialization failed: {}", e),
            ),
        }
    }

    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(request.id, json!({ "tools": self.registry.list() }))
    }

    async fn handle_tool_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let tool_call: ToolCall = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(call) => call,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        INVALID_PARAMS,
                        format!("Invalid tool call params: {}", e),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    INVALID_PARAMS,
                    "Missing tool call params".to_string(),
                );
            }
        };

        debug!("Tool call: {}", tool_call.name);

        // Sanitization runs once, here, before arguments reach any handler.
        // Rejection is a protocol-level failure, not a tool error.
        let arguments = match sanitize(&tool_call.arguments, self.ctx.config.sanitize.max_depth) {
            Ok(clean) => clean,
            Err(e) => {
                warn!(tool = %tool_call.name, error = %e, "Rejected tool arguments");
                return JsonRpcResponse::error(request.id, INVALID_PARAMS, e.to_string());
            }
        };

        let result = match self.registry.execute(&tool_call.name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Tool execution failed: {}", e);
                ToolResult::error(format!("Tool execution failed: {}", e))
            }
        };

        match serde_json::to_value(result) {
            Ok(v) => JsonRpcResponse::success(request.id, v),
            Err(e) => JsonRpcResponse::error(
                request.id,
                INTERNAL_ERROR,
                format!("Serialization failed: {}", e),
            ),
        }
    }

    fn handle_resources_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let resources = vec![
            Resource {
                uri: "selftune://knowledge-base".into(),
                name: "Knowledge base".into(),
                description: "Accumulated facts, patterns, and preferences".into(),
                mime_type: "application/json".into(),
            },
            Resource {
                uri: "selftune://performance-metrics".into(),
                name: "Performance metrics".into(),
                description: "Interaction totals, response times, tool usage, errors".into(),
                mime_type: "application/json".into(),
            },
            Resource {
                uri: "selftune://productivity-metrics".into(),
                name: "Productivity metrics".into(),
                description: "Tasks, goals, efficiency, and tool effectiveness".into(),
                mime_type: "application/json".into(),
            },
            Resource {
                uri: "selftune://preferences".into(),
                name: "Preferences".into(),
                description: "Current behavioral preference settings".into(),
                mime_type: "application/json".into(),
            },
        ];

        JsonRpcResponse::success(request.id, json!({ "resources": resources }))
    }

    fn handle_resources_read(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let uri = request
            .params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .map(String::from);
        let Some(uri) = uri else {
            return JsonRpcResponse::error(
                request.id,
                INVALID_PARAMS,
                "Missing required parameter: uri".to_string(),
            );
        };

        let snapshot = match self.resource_snapshot(&uri) {
            Ok(Some(value)) => value,
            Ok(None) => {
                return JsonRpcResponse::error(
                    request.id,
                    INVALID_PARAMS,
                    format!("Unknown resource: {}", uri),
                );
            }
            Err(e) => {
                return JsonRpcResponse::error(request.id, INTERNAL_ERROR, e.to_string());
            }
        };

        let text = match serde_json::to_string_pretty(&snapshot) {
            Ok(text) => text,
            Err(e) => {
                return JsonRpcResponse::error(
                    request.id,
                    INTERNAL_ERROR,
                    format!("Serialization failed: {}", e),
                );
            }
        };

        let contents = vec![ResourceContents {
            uri,
            mime_type: "application/json".into(),
            text,
        }];
        JsonRpcResponse::success(request.id, json!({ "contents": contents }))
    }

    fn resource_snapshot(&self, uri: &str) -> anyhow::Result<Option<Value>> {
        let state = self.ctx.lock_state()?;
        let snapshot = match uri {
            "selftune://knowledge-base" => Some(json!({
                "facts": state.facts(),
                "patterns": state.patterns(),
                "preferences": state.preferences(),
            })),
            "selftune://performance-metrics" => Some(json!(state.performance())),
            "selftune://productivity-metrics" => Some(json!(state.productivity())),
            "selftune://preferences" => Some(json!(state.preferences())),
            _ => None,
        };
        Ok(snapshot)
    }

    fn handle_prompts_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let prompts = vec![
            Prompt {
                name: "self-improvement-analysis".into(),
                description: "Analyze accumulated learning and suggest behavior changes".into(),
                arguments: vec![],
            },
            Prompt {
                name: "productivity-review".into(),
                description: "Review productivity metrics and goal progress".into(),
                arguments: vec![PromptArgument {
                    name: "focus".into(),
                    description: "Optional area to concentrate the review on".into(),
                    required: false,
                }],
            },
        ];

        JsonRpcResponse::success(request.id, json!({ "prompts": prompts }))
    }

    fn handle_prompts_get(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params = request.params.as_ref();
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");

        let text = match name {
            "self-improvement-analysis" => match self.render_improvement_prompt() {
                Ok(text) => text,
                Err(e) => {
                    return JsonRpcResponse::error(request.id, INTERNAL_ERROR, e.to_string());
                }
            },
            "productivity-review" => {
                let focus = params
                    .and_then(|p| p.get("arguments"))
                    .and_then(|a| a.get("focus"))
                    .and_then(Value::as_str);
                match self.render_productivity_prompt(focus) {
                    Ok(text) => text,
                    Err(e) => {
                        return JsonRpcResponse::error(request.id, INTERNAL_ERROR, e.to_string());
                    }
                }
            }
            other => {
                return JsonRpcResponse::error(
                    request.id,
                    INVALID_PARAMS,
                    format!("Unknown prompt: {}", other),
                );
            }
        };

        let messages = vec![PromptMessage {
            role: "user".into(),
            content: Content::Text { text },
        }];
        JsonRpcResponse::success(request.id, json!({ "messages": messages }))
    }

    fn render_improvement_prompt(&self) -> anyhow::Result<String> {
        let state = self.ctx.lock_state()?;
        let success = match state.success_rate() {
            Some(rate) => format!("{:.1}%", rate * 100.0),
            None => "N/A".to_string(),
        };
        Ok(format!(
            "Review this assistant's accumulated learning and propose concrete behavior \
             changes.\n\nInteractions: {} (success rate {})\nFacts: {}\nPatterns: {}\n\
             Preferences: {:?} style, {:?} detail\n\nSuggest adjustments to preferences \
             and call out patterns worth reinforcing or retiring.",
            state.performance().total_interactions,
            success,
            state.facts().len(),
            state.patterns().len(),
            state.preferences().communication_style,
            state.preferences().response_detail_level,
        ))
    }

    fn render_productivity_prompt(&self, focus: Option<&str>) -> anyhow::Result<String> {
        let state = self.ctx.lock_state()?;
        let productivity = state.productivity();
        let mut text = format!(
            "Review productivity to date.\n\nTasks completed: {}\nEfficiency score: {:.2}\n\
             Goals: {} active, {} completed.",
            productivity.tasks_completed,
            productivity.efficiency_score,
            productivity.user_goals.len(),
            productivity.completed_goals.len(),
        );
        if let Some(focus) = focus {
            text.push_str(&format!("\n\nConcentrate on: {}", focus));
        }
        Ok(text)
    }

    fn handle_initialized(&self, _request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Received initialized notification");
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: None,
            result: None,
            error: None,
        }
    }
}

impl Handler for Server {
    async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "notifications/initialized" => self.handle_initialized(request),
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            "tools/list" => self.handle_tools_list(request),
            "tools/call" => self.handle_tool_call(request).await,
            "resources/list" => self.handle_resources_list(request),
            "resources/read" => self.handle_resources_read(request),
            "prompts/list" => self.handle_prompts_list(request),
            "prompts/get" => self.handle_prompts_get(request),
            _ => {
                warn!("Unknown method: {}", request.method);
                JsonRpcResponse::error(
                    request.id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn server() -> Server {
        let config = Arc::new(ServerConfig::default());
        Server::new(Arc::new(ToolContext::new(config)))
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(1)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_initialize() {
        let server = server();
        let response = server
            .handle(request(
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0.0"}
                })),
            ))
            .await;

        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "selftune");
    }

    #[tokio::test]
    async fn test_tools_list_has_nine_tools() {
        let server = server();
        let response = server.handle(request("tools/list", None)).await;

        let result = response.result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 9);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = server();
        let response = server.handle(request("unknown/method", None)).await;

        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tool_call_echo() {
        let server = server();
        let response = server
            .handle(request(
                "tools/call",
                Some(json!({"name": "echo", "arguments": {"message": "hi"}})),
            ))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["text"], "Echo: hi");
    }

    #[tokio::test]
    async fn test_dangerous_keys_are_stripped_before_handlers() {
        let server = server();
        let response = server
            .handle(request(
                "tools/call",
                Some(json!({
                    "name": "echo",
                    "arguments": {"message": "hi", "__proto__": {"polluted": true}}
                })),
            ))
            .await;

        // The call still succeeds; the key simply never reaches the handler.
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_overdeep_arguments_rejected_at_protocol_level() {
        let server = server();
        let mut nested = json!("leaf");
        for _ in 0..12 {
            nested = json!({ "inner": nested });
        }

        let response = server
            .handle(request(
                "tools/call",
                Some(json!({"name": "echo", "arguments": nested})),
            ))
            .await;

        let error = response.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert!(error.message.contains("depth"));
    }

    #[tokio::test]
    async fn test_resources_roundtrip() {
        let server = server();
        let response = server.handle(request("resources/list", None)).await;
        let result = response.result.unwrap();
        let resources = result["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 4);

        for resource in resources {
            let uri = resource["uri"].as_str().unwrap();
            let response = server
                .handle(request("resources/read", Some(json!({"uri": uri}))))
                .await;
            assert!(response.error.is_none(), "failed reading {}", uri);
        }
    }

    #[tokio::test]
    async fn test_resources_read_unknown_uri() {
        let server = server();
        let response = server
            .handle(request(
                "resources/read",
                Some(json!({"uri": "selftune://nope"})),
            ))
            .await;

        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_prompts_list_and_get() {
        let server = server();
        let response = server.handle(request("prompts/list", None)).await;
        let result = response.result.unwrap();
        assert_eq!(result["prompts"].as_array().unwrap().len(), 2);

        let response = server
            .handle(request(
                "prompts/get",
                Some(json!({
                    "name": "productivity-review",
                    "arguments": {"focus": "goal backlog"}
                })),
            ))
            .await;
        let result = response.result.unwrap();
        let text = result["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("goal backlog"));
    }

    #[tokio::test]
    async fn test_prompts_get_unknown_name() {
        let server = server();
        let response = server
            .handle(request("prompts/get", Some(json!({"name": "nope"}))))
            .await;

        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_ping() {
        let server = server();
        let response = server.handle(request("ping", None)).await;
        assert!(response.error.is_none());
    }
}
