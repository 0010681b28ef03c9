// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-user agent runtimes and the completion ⇄ tool loop.
//!
//! A runtime bundles everything one user's turns need: the model provider,
//! an MCP client carrying that user's `x-user-id`, the system prompt
//! captured at construction time, and the conversation history.  Runtimes
//! are cached for the process lifetime; a prompt-cache expiry only becomes
//! visible to runtimes built after it, which is an accepted approximation.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use drydock_mcp_client::McpClient;
use drydock_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, ToolSchema};

use crate::error::BridgeError;
use crate::events::AgentEvent;
use crate::prompt_cache::PromptCache;

/// One accumulating tool call, keyed by stream index.
#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Everything one user's agent turns run against.
pub struct AgentRuntime {
    model: Arc<dyn ModelProvider>,
    mcp: Arc<McpClient>,
    system_prompt: String,
    tools: Vec<ToolSchema>,
    history: Mutex<Vec<Message>>,
    max_turns: usize,
}

impl AgentRuntime {
    /// Submit one user message and stream the resulting events through `tx`.
    ///
    /// The loop alternates model completions and tool dispatch until the
    /// model answers without tool calls or `max_turns` is reached.  A closed
    /// receiver (client disconnect) aborts the run at the next send.
    pub async fn run_turn(
        &self,
        user_text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), BridgeError> {
        // Holding the history lock for the whole turn serializes concurrent
        // turns of the same user, which keeps the transcript consistent.
        let mut history = self.history.lock().await;
        if history.is_empty() {
            history.push(Message::system(&self.system_prompt));
        }
        history.push(Message::user(user_text));

        for round in 0..self.max_turns {
            let request = CompletionRequest {
                messages: history.clone(),
                tools: self.tools.clone(),
                stream: true,
            };

            let mut stream = self
                .model
                .complete(request)
                .await
                .map_err(|e| BridgeError::ModelCallFailed(e.to_string()))?;

            let mut text = String::new();
            let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();

            while let Some(event) = stream.next().await {
                match event.map_err(|e| BridgeError::ModelCallFailed(e.to_string()))? {
                    ResponseEvent::TextDelta(delta) => {
                        text.push_str(&delta);
                        send(&tx, AgentEvent::TextDelta(delta)).await?;
                    }
                    ResponseEvent::ToolCall { index, id, name, arguments } => {
                        let slot = pending.entry(index).or_default();
                        if slot.id.is_empty() && !id.is_empty() {
                            slot.id = id;
                        }
                        if slot.name.is_empty() && !name.is_empty() {
                            slot.name = name;
                        }
                        slot.arguments.push_str(&arguments);
                    }
                    ResponseEvent::MaxTokens => {
                        warn!(round, "model hit its output token limit");
                    }
                    ResponseEvent::Done => break,
                }
            }

            if !text.is_empty() {
                history.push(Message::assistant(&text));
            }

            if pending.is_empty() {
                send(&tx, AgentEvent::Finished).await?;
                return Ok(());
            }

            for (_, mut call) in pending {
                if call.id.is_empty() {
                    call.id = Uuid::new_v4().to_string();
                }
                debug!(tool = %call.name, call_id = %call.id, "dispatching tool call");
                send(
                    &tx,
                    AgentEvent::ToolCallStarted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                )
                .await?;
                history.push(Message::tool_call(&call.id, &call.name, &call.arguments));

                let args: Value =
                    serde_json::from_str(&call.arguments).unwrap_or(Value::Object(Default::default()));
                let (output, is_error) = match self.mcp.call_tool(&call.name, args).await {
                    Ok(outcome) => (outcome.content, outcome.is_error),
                    Err(e) => {
                        // Transport failures become structured tool results
                        // so the model can react instead of the turn dying.
                        warn!(tool = %call.name, error = %e, "tool call transport failure");
                        (format!("tool call failed: {e}"), true)
                    }
                };

                send(
                    &tx,
                    AgentEvent::ToolCallFinished {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        output: output.clone(),
                        is_error,
                    },
                )
                .await?;
                history.push(Message::tool_result(&call.id, output));
            }
        }

        warn!(max_turns = self.max_turns, "turn limit reached; finishing stream");
        send(&tx, AgentEvent::Finished).await?;
        Ok(())
    }
}

/// Send an event, translating a closed channel into a cancellation.
async fn send(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), BridgeError> {
    tx.send(event).await.map_err(|_| BridgeError::Cancelled)
}

/// Per-user runtime cache with per-key construction serialization.
pub struct RuntimeCache {
    model: Arc<dyn ModelProvider>,
    prompt_cache: Arc<PromptCache>,
    mcp_url: String,
    max_turns: usize,
    runtimes: DashMap<String, Arc<AgentRuntime>>,
    build_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RuntimeCache {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        prompt_cache: Arc<PromptCache>,
        mcp_url: String,
        max_turns: usize,
    ) -> Self {
        Self {
            model,
            prompt_cache,
            mcp_url,
            max_turns,
            runtimes: DashMap::new(),
            build_locks: DashMap::new(),
        }
    }

    /// Return the user's runtime, building it on first use.  Construction is
    /// serialized per user id so two racing requests share one runtime.
    pub async fn get_or_build(&self, user_id: &str) -> Arc<AgentRuntime> {
        if let Some(existing) = self.runtimes.get(user_id) {
            return existing.clone();
        }

        let lock = self
            .build_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Double-check under the key lock.
        if let Some(existing) = self.runtimes.get(user_id) {
            return existing.clone();
        }

        let runtime = Arc::new(self.build(user_id).await);
        self.runtimes.insert(user_id.to_string(), runtime.clone());
        runtime
    }

    async fn build(&self, user_id: &str) -> AgentRuntime {
        let mcp = Arc::new(McpClient::new(self.mcp_url.clone(), Some(user_id.to_string())));
        let system_prompt = self.prompt_cache.get().await;

        // A tool server outage degrades the runtime to plain chat; the
        // cached runtime still routes any later tool calls normally because
        // the MCP client retries its handshake per call.
        let tools = match mcp.list_tools().await {
            Ok(remote) => remote
                .into_iter()
                .map(|t| ToolSchema {
                    name: t.name,
                    description: t.description,
                    parameters: t.input_schema,
                })
                .collect(),
            Err(e) => {
                warn!(user = %user_id, error = %e, "tool listing failed; building runtime without tools");
                Vec::new()
            }
        };

        debug!(user = %user_id, tool_count = tools.len(), "built agent runtime");
        AgentRuntime {
            model: self.model.clone(),
            mcp,
            system_prompt,
            tools,
            history: Mutex::new(Vec::new()),
            max_turns: self.max_turns,
        }
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_model::ScriptedMockProvider;

    fn runtime_with(model: Arc<dyn ModelProvider>, tools: Vec<ToolSchema>) -> AgentRuntime {
        AgentRuntime {
            model,
            mcp: Arc::new(McpClient::new("http://127.0.0.1:1/mcp", Some("u1".into()))),
            system_prompt: "SYSTEM".into(),
            tools,
            history: Mutex::new(Vec::new()),
            max_turns: 4,
        }
    }

    async fn collect_events(runtime: &AgentRuntime, input: &str) -> Vec<AgentEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        let _ = runtime.run_turn(input, tx).await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn plain_text_turn_emits_deltas_then_finished() {
        let model = Arc::new(ScriptedMockProvider::always_text("hello there"));
        let runtime = runtime_with(model, Vec::new());

        let events = collect_events(&runtime, "hi").await;
        assert!(matches!(&events[0], AgentEvent::TextDelta(t) if t == "hello there"));
        assert!(matches!(events.last(), Some(AgentEvent::Finished)));
    }

    #[tokio::test]
    async fn system_prompt_installed_on_first_turn() {
        let model = Arc::new(ScriptedMockProvider::always_text("ok"));
        let last_request = model.last_request.clone();
        let runtime = runtime_with(model, Vec::new());

        collect_events(&runtime, "hi").await;
        let req = last_request.lock().unwrap().clone().unwrap();
        assert!(matches!(req.messages[0].role, drydock_model::Role::System));
        assert_eq!(req.messages[0].as_text(), Some("SYSTEM"));
    }

    #[tokio::test]
    async fn tool_call_round_announces_and_reports_result() {
        // MCP endpoint is unreachable, so the tool result is the structured
        // transport-failure text — the loop must still complete both rounds.
        let model = Arc::new(ScriptedMockProvider::tool_then_text(
            "call-1",
            "execute_bash",
            r#"{"command":"echo hi"}"#,
            "all done",
        ));
        let runtime = runtime_with(model, Vec::new());

        let events = collect_events(&runtime, "run echo").await;

        let started = events.iter().any(|e| {
            matches!(e, AgentEvent::ToolCallStarted { id, name, .. }
                if id == "call-1" && name == "execute_bash")
        });
        assert!(started, "tool call must be announced");

        let finished_with_error = events.iter().any(|e| {
            matches!(e, AgentEvent::ToolCallFinished { is_error: true, .. })
        });
        assert!(finished_with_error, "unreachable MCP maps to an error result");

        assert!(events.iter().any(|e| matches!(e, AgentEvent::TextDelta(t) if t == "all done")));
        assert!(matches!(events.last(), Some(AgentEvent::Finished)));
    }

    #[tokio::test]
    async fn history_grows_across_turns() {
        let model = Arc::new(ScriptedMockProvider::new(vec![
            vec![ResponseEvent::TextDelta("first".into()), ResponseEvent::Done],
            vec![ResponseEvent::TextDelta("second".into()), ResponseEvent::Done],
        ]));
        let last_request = model.last_request.clone();
        let runtime = runtime_with(model, Vec::new());

        collect_events(&runtime, "one").await;
        collect_events(&runtime, "two").await;

        let req = last_request.lock().unwrap().clone().unwrap();
        // system + user one + assistant first + user two
        assert_eq!(req.messages.len(), 4);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_turn() {
        let model = Arc::new(ScriptedMockProvider::always_text("unheard"));
        let runtime = runtime_with(model, Vec::new());

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = runtime.run_turn("hi", tx).await.unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
    }
}
