// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI chat-completions wire shapes and the event → chunk conversion.

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::events::AgentEvent;

/// Incoming `POST /v1/chat/completions` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    /// Caller-supplied user id; scopes the container, session, and runtime.
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatCompletionRequest {
    /// Validate the request per the streaming contract.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if !self.stream {
            return Err(BridgeError::InvalidRequest(
                "this endpoint only supports stream=true".into(),
            ));
        }
        if self.messages.is_empty() {
            return Err(BridgeError::InvalidRequest("messages must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("model must be set".into()));
        }
        Ok(())
    }

    /// The newest user-role message — the text submitted to the agent.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

/// Stamps every chunk of one response with a shared id / model / created.
pub struct ChunkFactory {
    id: String,
    model: String,
    created: i64,
}

impl ChunkFactory {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }]
        })
    }

    /// Total conversion from an agent event to an SSE frame payload.
    ///
    /// `None` means the event produces no frame (tool results are internal;
    /// the caller sees the model's reaction instead).
    pub fn frame_for(&self, event: &AgentEvent) -> Option<Value> {
        match event {
            AgentEvent::TextDelta(text) => Some(self.chunk(json!({ "content": text }), None)),
            AgentEvent::ToolCallStarted { id, name, arguments } => Some(self.chunk(
                json!({
                    "tool_calls": [{
                        "index": 0,
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": arguments },
                    }]
                }),
                None,
            )),
            AgentEvent::ToolCallFinished { .. } => None,
            AgentEvent::Finished => Some(self.chunk(json!({}), Some("stop"))),
            AgentEvent::Failed { kind, message } => Some(json!({
                "error": { "message": message, "type": kind }
            })),
        }
    }
}

/// Body of `GET /v1/models`.
pub fn models_response(model_id: &str, owned_by: &str) -> Value {
    json!({
        "object": "list",
        "data": [{
            "id": model_id,
            "object": "model",
            "created": chrono::Utc::now().timestamp(),
            "owned_by": owned_by,
        }]
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
