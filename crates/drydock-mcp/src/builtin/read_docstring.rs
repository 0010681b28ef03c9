// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use drydock_sandbox::ContainerFs;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Extracts the docstring of a top-level Python function inside the caller's
/// container.
pub struct ReadDocstringTool {
    fs: Arc<ContainerFs>,
}

impl ReadDocstringTool {
    pub fn new(fs: Arc<ContainerFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadDocstringTool {
    fn name(&self) -> &str {
        "read_docstring"
    }

    fn description(&self) -> &str {
        "Return the docstring of a top-level function in a Python file inside \
         your container, without executing the module. Returns an empty string \
         when the function has no docstring."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute path of the Python file."
                },
                "function_name": {
                    "type": "string",
                    "description": "Name of the top-level function."
                }
            },
            "required": ["file_path", "function_name"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, user_id: &str, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("file_path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing 'file_path' parameter"),
        };
        let function = match call.args.get("function_name").and_then(|v| v.as_str()) {
            Some(f) => f,
            None => return ToolOutput::err(&call.id, "missing 'function_name' parameter"),
        };

        debug!(user = %user_id, path, function, "read_docstring tool");

        match self.fs.read_docstring(user_id, path, function).await {
            Ok(doc) => ToolOutput::ok(&call.id, doc),
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

    fn make_tool() -> ReadDocstringTool {
        let docker = bollard::Docker::connect_with_local_defaults().unwrap();
        let manager = Arc::new(ContainerManager::new(docker, ExecutorConfig::default()));
        ReadDocstringTool::new(Arc::new(ContainerFs::new(manager)))
    }

    #[test]
    fn schema_requires_both_arguments() {
        let schema = make_tool().parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[tokio::test]
    async fn missing_function_name_is_error() {
        let tool = make_tool();
        let out = tool
            .execute(
                "u1",
                &ToolCall {
                    id: "1".into(),
                    name: "read_docstring".into(),
                    args: json!({"file_path": "/workspace/m.py"}),
                },
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("function_name"));
    }
}
