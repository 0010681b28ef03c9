// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned per invocation (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text payload returned to the caller.  Tools with structured
    /// results (e.g. `execute_bash`) serialize them as JSON text.
    pub content: String,
    /// True when the tool execution failed non-fatally.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result containing a plain-text message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Trait implemented by every tool on the server.
///
/// `user_id` arrives from the transport layer (the `x-user-id` header), not
/// from the argument payload — tools scope every container operation by it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, user_id: &str, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_output_is_not_error() {
        let out = ToolOutput::ok("1", "fine");
        assert!(!out.is_error);
        assert_eq!(out.call_id, "1");
        assert_eq!(out.content, "fine");
    }

    #[test]
    fn err_output_sets_flag() {
        let out = ToolOutput::err("2", "boom");
        assert!(out.is_error);
        assert_eq!(out.content, "boom");
    }
}
