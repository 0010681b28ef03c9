// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `drydock-mcp-client` — a minimal MCP client over streamable HTTP.
//!
//! Speaks exactly the subset of MCP the agent bridge needs: the initialize
//! handshake, `tools/list`, `tools/call`, and `prompts/get`.  Every request
//! carries the `x-user-id` header the tool server routes containers by, and
//! echoes the `mcp-session-id` header once the server assigns one.
//!
//! Responses may arrive as plain JSON or as a short SSE body (the streamable
//! HTTP transport uses either depending on the method); both are handled.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Protocol revision sent during the handshake.
const PROTOCOL_VERSION: &str = "2025-03-26";

/// Hard cap on prompt/tool response bodies read into memory.
const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum McpClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result of one `tools/call`.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    /// Concatenated text content items.
    pub content: String,
    /// Mirrors MCP's `isError` flag.
    pub is_error: bool,
}

/// A tool descriptor from `tools/list`.
#[derive(Debug, Clone)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// MCP client bound to one endpoint and (optionally) one user id.
pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    user_id: Option<String>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    initialized: Mutex<bool>,
}

impl McpClient {
    /// Build a client for `endpoint` (e.g. `http://localhost:8989/mcp`).
    /// When `user_id` is set it is attached to every request as `x-user-id`.
    pub fn new(endpoint: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            user_id,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            initialized: Mutex::new(false),
        }
    }

    /// Run the initialize handshake once; later calls are no-ops.
    pub async fn ensure_initialized(&self) -> Result<(), McpClientError> {
        let mut done = self.initialized.lock().await;
        if *done {
            return Ok(());
        }
        self.rpc(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "drydock-bridge", "version": env!("CARGO_PKG_VERSION") },
            }),
        )
        .await?;
        self.notify("notifications/initialized", json!({})).await?;
        *done = true;
        Ok(())
    }

    /// List the tools the server exposes.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpClientError> {
        self.ensure_initialized().await?;
        let result = self.rpc("tools/list", json!({})).await?;
        let tools = result["tools"]
            .as_array()
            .ok_or_else(|| McpClientError::Protocol("tools/list result has no tools".into()))?
            .iter()
            .map(|t| RemoteTool {
                name: t["name"].as_str().unwrap_or_default().to_string(),
                description: t["description"].as_str().unwrap_or_default().to_string(),
                input_schema: t
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
            .collect();
        Ok(tools)
    }

    /// Invoke one tool with JSON object arguments.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallOutcome, McpClientError> {
        self.ensure_initialized().await?;
        debug!(tool = %name, "mcp tool call");
        let result = self
            .rpc("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(parse_tool_result(&result))
    }

    /// Fetch a prompt and concatenate its text message contents.
    pub async fn get_prompt(&self, name: &str) -> Result<String, McpClientError> {
        self.ensure_initialized().await?;
        let result = self.rpc("prompts/get", json!({ "name": name })).await?;
        let text = extract_prompt_text(&result);
        if text.is_empty() {
            return Err(McpClientError::Protocol(format!("prompt {name} came back empty")));
        }
        Ok(text)
    }

    // ── JSON-RPC plumbing ─────────────────────────────────────────────────────

    async fn post(&self, body: &Value) -> Result<reqwest::Response, McpClientError> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .json(body)
            .header("accept", "application/json, text/event-stream");
        if let Some(uid) = &self.user_id {
            req = req.header("x-user-id", uid);
        }
        if let Some(sid) = self.session_id.lock().await.as_ref() {
            req = req.header("mcp-session-id", sid);
        }
        let resp = req.send().await?;

        // The server assigns a session on initialize; echo it from then on.
        if let Some(sid) = resp
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(sid.to_string());
        }

        if !resp.status().is_success() {
            return Err(McpClientError::Status(resp.status().as_u16()));
        }
        Ok(resp)
    }

    /// Send a request and return its `result` value.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, McpClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let resp = self.post(&body).await?;

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = resp.text().await?;
        if text.len() > MAX_RESPONSE_BYTES {
            return Err(McpClientError::Protocol("response too large".into()));
        }

        let message = if content_type.starts_with("text/event-stream") {
            find_response_in_sse(&text, id)
                .ok_or_else(|| McpClientError::Protocol(format!("no response for id {id} in SSE body")))?
        } else {
            serde_json::from_str::<Value>(&text)
                .map_err(|e| McpClientError::Protocol(format!("invalid JSON response: {e}")))?
        };

        if let Some(err) = message.get("error") {
            return Err(McpClientError::Rpc {
                code: err["code"].as_i64().unwrap_or(0),
                message: err["message"].as_str().unwrap_or("unknown").to_string(),
            });
        }
        message
            .get("result")
            .cloned()
            .ok_or_else(|| McpClientError::Protocol("response has no result".into()))
    }

    /// Send a notification (no id, no response body expected).
    async fn notify(&self, method: &str, params: Value) -> Result<(), McpClientError> {
        let body = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.post(&body).await?;
        Ok(())
    }
}

// ── Response parsing helpers ──────────────────────────────────────────────────

/// Scan an SSE body for the JSON-RPC response whose `id` matches.
fn find_response_in_sse(body: &str, id: u64) -> Option<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
        .find(|v| v["id"].as_u64() == Some(id))
}

/// Flatten an MCP `tools/call` result into text + error flag.
fn parse_tool_result(result: &Value) -> ToolCallOutcome {
    let content = result["content"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    ToolCallOutcome {
        content,
        is_error: result["isError"].as_bool().unwrap_or(false),
    }
}

/// Concatenate the text contents of a `prompts/get` result.
fn extract_prompt_text(result: &Value) -> String {
    result["messages"]
        .as_array()
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m["content"]["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
