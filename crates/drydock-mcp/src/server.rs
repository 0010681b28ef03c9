// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! [`ToolServerHandler`] — the rmcp [`ServerHandler`] implementation.
//!
//! Implements `tools/list`, `tools/call`, `prompts/list`, and `prompts/get`.
//! Every `tools/call` must arrive with an `x-user-id` HTTP header; the
//! handler reads it from the request parts the streamable-HTTP transport
//! attaches to the request context.  User ids embedded in the argument
//! payload are never consulted.

use std::sync::Arc;

use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, Content, GetPromptRequestParams, GetPromptResult,
        ListPromptsResult, ListToolsResult, PaginatedRequestParams, Prompt, PromptMessage,
        PromptMessageContent, PromptMessageRole, ServerCapabilities, ServerInfo, Tool as McpTool,
    },
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use tracing::debug;
use uuid::Uuid;

use drydock_skills::{render_system_prompt, SkillRegistry};

use crate::registry::{ToolRegistry, ToolSchema};
use crate::tool::{ToolCall, ToolOutput};

/// Name of the single dynamic prompt this server exposes.
pub const AGENT_PROMPT_NAME: &str = "agent_system_prompt";

/// Header carrying the caller's user id on every MCP request.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Tool & prompt server — wraps a [`ToolRegistry`] and a [`SkillRegistry`]
/// and speaks the MCP protocol.
#[derive(Clone)]
pub struct ToolServerHandler {
    registry: Arc<ToolRegistry>,
    skills: Arc<SkillRegistry>,
}

impl ToolServerHandler {
    pub fn new(registry: Arc<ToolRegistry>, skills: Arc<SkillRegistry>) -> Self {
        Self { registry, skills }
    }

    /// Render the agent system prompt for the current skill set.
    pub fn render_prompt(&self) -> String {
        render_system_prompt(&self.skills.skills())
    }
}

/// Pull the user id out of the HTTP request parts the transport stored in
/// the context extensions.
fn user_id_from_context(context: &RequestContext<RoleServer>) -> Option<String> {
    let parts = context.extensions.get::<http::request::Parts>()?;
    parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Convert a [`ToolSchema`] into an rmcp tool descriptor.
fn schema_to_mcp_tool(schema: ToolSchema) -> McpTool {
    let input_schema = match schema.parameters {
        serde_json::Value::Object(m) => m,
        other => {
            let mut m = serde_json::Map::new();
            m.insert("type".to_string(), serde_json::Value::String("object".into()));
            m.insert("value".to_string(), other);
            m
        }
    };
    McpTool::new(
        std::borrow::Cow::Owned(schema.name),
        std::borrow::Cow::Owned(schema.description),
        Arc::new(input_schema),
    )
}

/// Convert a [`ToolOutput`] into an rmcp [`CallToolResult`].
fn output_to_call_result(output: ToolOutput) -> CallToolResult {
    let content = vec![Content::text(output.content)];
    if output.is_error {
        CallToolResult {
            content,
            is_error: Some(true),
            structured_content: None,
            meta: None,
        }
    } else {
        CallToolResult::success(content)
    }
}

impl ServerHandler for ToolServerHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let registry = self.registry.clone();
        async move {
            let tools = registry
                .schemas()
                .into_iter()
                .map(schema_to_mcp_tool)
                .collect();
            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                meta: None,
            })
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let Some(user_id) = user_id_from_context(&context) else {
            return Err(McpError::invalid_params(
                "missing x-user-id header on tool call",
                None,
            ));
        };

        let args = request
            .arguments
            .map(|m| serde_json::Value::Object(m.into_iter().collect()))
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let call = ToolCall {
            id: Uuid::new_v4().to_string(),
            name: request.name.to_string(),
            args,
        };

        debug!(user = %user_id, tool = %call.name, "tool call");
        let output = self.registry.execute(&user_id, &call).await;
        Ok(output_to_call_result(output))
    }

    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListPromptsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListPromptsResult {
                prompts: vec![Prompt::new(
                    AGENT_PROMPT_NAME,
                    Some("System prompt for the code-execution agent, rendered from the installed skills."),
                    None,
                )],
                next_cursor: None,
                meta: None,
            })
        }
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        if request.name != AGENT_PROMPT_NAME {
            return Err(McpError::invalid_params(
                format!("unknown prompt: {}", request.name),
                None,
            ));
        }
        let prompt = self.render_prompt();
        Ok(GetPromptResult {
            description: Some("Agent system prompt".to_string()),
            messages: vec![PromptMessage {
                role: PromptMessageRole::User,
                content: PromptMessageContent::Text { text: prompt },
            }],
        })
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
//
// These cover the parts of the handler that can be tested without an active
// transport or RequestContext; the call_tool round-trip over real HTTP is in
// tests/http_api.rs.

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_handler() -> ToolServerHandler {
        // A nonexistent skills root scans to an empty collection.
        ToolServerHandler::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(SkillRegistry::new("/nonexistent/drydock-test-skills")),
        )
    }

    #[test]
    fn get_info_enables_tools_and_prompts() {
        let info = make_handler().get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.prompts.is_some());
    }

    #[test]
    fn schema_to_mcp_tool_preserves_name_and_description() {
        let tool = schema_to_mcp_tool(ToolSchema {
            name: "read_file".into(),
            description: "Reads a file".into(),
            parameters: json!({"type": "object"}),
        });
        assert_eq!(tool.name.as_ref(), "read_file");
        assert_eq!(tool.description.as_deref(), Some("Reads a file"));
        assert!(tool.input_schema.contains_key("type"));
    }

    #[test]
    fn schema_to_mcp_tool_wraps_non_object() {
        let tool = schema_to_mcp_tool(ToolSchema {
            name: "odd".into(),
            description: "odd".into(),
            parameters: json!("not an object"),
        });
        assert_eq!(
            tool.input_schema.get("type"),
            Some(&serde_json::Value::String("object".into()))
        );
    }

    #[test]
    fn output_to_call_result_maps_error_flag() {
        let ok = output_to_call_result(ToolOutput::ok("1", "fine"));
        assert_eq!(ok.is_error, Some(false));
        let err = output_to_call_result(ToolOutput::err("2", "bad"));
        assert_eq!(err.is_error, Some(true));
    }

    #[test]
    fn rendered_prompt_is_deterministic() {
        let handler = make_handler();
        assert_eq!(handler.render_prompt(), handler.render_prompt());
    }
}
