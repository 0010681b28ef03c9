// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use drydock_sandbox::ContainerFs;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Reads a text file (optionally a line window) from the caller's container.
pub struct ReadFileTool {
    fs: Arc<ContainerFs>,
}

impl ReadFileTool {
    pub fn new(fs: Arc<ContainerFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from your container. For large files pass 'offset' \
         (0-indexed first line) and 'line_count' to read a window; omitting \
         line_count reads to the end of the file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute path inside the container."
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to return, 0-indexed.",
                    "default": 0
                },
                "line_count": {
                    "type": ["integer", "null"],
                    "description": "Number of lines to return; null reads to EOF.",
                    "default": null
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, user_id: &str, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("file_path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing 'file_path' parameter"),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let line_count = call
            .args
            .get("line_count")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);

        debug!(user = %user_id, path, offset, ?line_count, "read_file tool");

        match self.fs.read_file(user_id, path, offset, line_count).await {
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
