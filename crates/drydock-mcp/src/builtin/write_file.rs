// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use drydock_sandbox::ContainerFs;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Creates or overwrites a file inside the caller's container.
pub struct WriteFileTool {
    fs: Arc<ContainerFs>,
}

impl WriteFileTool {
    pub fn new(fs: Arc<ContainerFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside your container, overwriting it if it \
         exists and creating parent directories as needed. Paths must be \
         absolute; use /workspace for working files and /artifacts for \
         outputs to publish."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute path inside the container."
                },
                "content": {
                    "type": "string",
                    "description": "Full file content to write."
                }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, user_id: &str, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("file_path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing 'file_path' parameter"),
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutput::err(&call.id, "missing 'content' parameter"),
        };

        debug!(user = %user_id, path, "write_file tool");

        match self.fs.write_file(user_id, path, content.as_bytes()).await {
            Ok(n) => ToolOutput::ok(&call.id, format!("Wrote {n} bytes to {path}")),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_config::ExecutorConfig;
    use drydock_sandbox::ContainerManager;

    fn make_tool() -> WriteFileTool {
        let docker = bollard::Docker::connect_with_local_defaults().unwrap();
        let manager = Arc::new(ContainerManager::new(docker, ExecutorConfig::default()));
        WriteFileTool::new(Arc::new(ContainerFs::new(manager)))
    }

    #[test]
    fn schema_requires_path_and_content() {
        let schema = make_tool().parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "file_path"));
        assert!(required.iter().any(|v| v == "content"));
    }

    #[tokio::test]
    async fn missing_arguments_are_errors() {
        let tool = make_tool();
        let out = tool
            .execute(
                "u1",
                &ToolCall {
                    id: "1".into(),
                    name: "write_file".into(),
                    args: json!({"file_path": "/workspace/a.txt"}),
                },
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("content"));
    }
}
