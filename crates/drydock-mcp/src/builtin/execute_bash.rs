// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use drydock_sandbox::Executor;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Runs a shell command inside the caller's container.
pub struct ExecuteBashTool {
    executor: Arc<Executor>,
}

impl ExecuteBashTool {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for ExecuteBashTool {
    fn name(&self) -> &str {
        "execute_bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command inside your container and return its exit code, \
         stdout, and stderr as JSON. The working directory is /workspace. \
         Commands are cut off after the timeout (default 30 s) with partial \
         output and exit_code 124. Prefer non-interactive commands."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute."
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 30).",
                    "default": 30
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, user_id: &str, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutput::err(&call.id, "missing 'command' parameter"),
        };
        let timeout = call
            .args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs);

        debug!(user = %user_id, "execute_bash tool");

        match self.executor.execute(user_id, command, timeout).await {
            Ok(outcome) => {
                let mut result = json!({
                    "exit_code": outcome.exit_code,
                    "stdout": outcome.stdout,
                    "stderr": outcome.stderr,
                });
                if outcome.timed_out {
                    result["error_kind"] = json!("timeout");
                }
                ToolOutput::ok(&call.id, result.to_string())
            }
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

    fn make_tool() -> ExecuteBashTool {
        // Constructing a daemon handle is lazy — nothing talks to Docker
        // until a command actually runs.
        let docker = bollard::Docker::connect_with_local_defaults().unwrap();
        let manager = Arc::new(ContainerManager::new(docker, ExecutorConfig::default()));
        ExecuteBashTool::new(Arc::new(Executor::new(manager)))
    }

    #[test]
    fn name_is_contract() {
        assert_eq!(make_tool().name(), "execute_bash");
    }

    #[test]
    fn schema_requires_command_only() {
        let schema = make_tool().parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "command");
        assert_eq!(schema["properties"]["timeout"]["default"], 30);
    }

    #[tokio::test]
    async fn missing_command_is_error_without_touching_docker() {
        let tool = make_tool();
        let out = tool
            .execute(
                "u1",
                &ToolCall {
                    id: "1".into(),
                    name: "execute_bash".into(),
                    args: json!({}),
                },
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("command"));
    }
}
