// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming driver for OpenAI-compatible chat completion APIs.
//!
//! Any endpoint that speaks the `/chat/completions` SSE wire format works:
//! the hosted OpenAI API, gateways, and local servers (Ollama, vLLM,
//! llama.cpp).  Authentication is `Authorization: Bearer <key>` when a key
//! is configured and nothing otherwise (local servers).

use anyhow::{bail, Context};
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    provider::ResponseStream, CompletionRequest, Message, MessageContent, ResponseEvent, Role,
};

/// OpenAI-compatible chat completion provider.
pub struct OpenAICompatProvider {
    model: String,
    /// API key; `None` for unauthenticated local servers.
    api_key: Option<String>,
    /// Full chat completions URL.
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    /// `base_url` ends **before** `/chat/completions`, e.g.
    /// `https://api.openai.com/v1` or `http://localhost:11434/v1`.
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl crate::ModelProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_openai_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.model,
            tool_count = tools.len(),
            message_count = messages.len(),
            "sending completion request"
        );

        let mut http_req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            http_req = http_req.bearer_auth(key);
        }

        let resp = http_req
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.chat_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("model endpoint error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across TCP packets.  Maintain a line buffer
        // across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v).map(Ok)
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by the
/// next TCP chunk.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

fn parse_sse_chunk(v: &Value) -> Option<ResponseEvent> {
    let choice = &v["choices"][0];

    // finish_reason=length means the model hit its output-token limit —
    // pending tool-call arguments may be truncated.
    if choice["finish_reason"].as_str() == Some("length") {
        return Some(ResponseEvent::MaxTokens);
    }

    let delta = &choice["delta"];

    // Tool call delta.  Each SSE chunk carries at most one tool-call delta in
    // practice; the index routes accumulation in the agent loop.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        let index = tc["index"].as_u64().unwrap_or(0) as u32;
        let id = tc["id"].as_str().unwrap_or("").to_string();
        let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
        let args = tc["function"]["arguments"].as_str().unwrap_or("").to_string();
        return Some(ResponseEvent::ToolCall {
            index,
            id,
            name,
            arguments: args,
        });
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return Some(ResponseEvent::TextDelta(text.to_string()));
        }
    }

    None
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert messages into the OpenAI wire-format JSON array.
///
/// **Parallel tool call coalescing**: OpenAI requires all tool calls from one
/// assistant turn inside a single assistant message as a `tool_calls` array.
/// Internally each tool call is a separate message, so consecutive `ToolCall`
/// messages are merged into one JSON object here.
pub(crate) fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    fn tool_call_to_json(tool_call_id: &str, function: &crate::FunctionCall) -> Value {
        json!({
            "id": tool_call_id,
            "type": "function",
            "function": {
                "name": function.name,
                "arguments": function.arguments,
            }
        })
    }

    let mut result: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];

        if let MessageContent::ToolCall { tool_call_id, function } = &m.content {
            let mut calls = vec![tool_call_to_json(tool_call_id, function)];
            i += 1;
            while i < messages.len() {
                if let MessageContent::ToolCall { tool_call_id, function } = &messages[i].content {
                    calls.push(tool_call_to_json(tool_call_id, function));
                    i += 1;
                } else {
                    break;
                }
            }
            result.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": calls,
            }));
            continue;
        }

        let entry = match &m.content {
            MessageContent::Text(t) => json!({ "role": role_str(&m.role), "content": t }),
            MessageContent::ToolResult { tool_call_id, content } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
            MessageContent::ToolCall { .. } => unreachable!("handled above"),
        };
        result.push(entry);
        i += 1;
    }

    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_chunk_parses() {
        let line = r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#;
        let ev = parse_sse_data_line(line).unwrap().unwrap();
        assert_eq!(ev, ResponseEvent::TextDelta("hi".into()));
    }

    #[test]
    fn done_sentinel_parses() {
        let ev = parse_sse_data_line("data: [DONE]").unwrap().unwrap();
        assert_eq!(ev, ResponseEvent::Done);
    }

    #[test]
    fn tool_call_delta_parses() {
        let line = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"execute_bash","arguments":"{\"comm"}}]}}]}"#;
        let ev = parse_sse_data_line(line).unwrap().unwrap();
        match ev {
            ResponseEvent::ToolCall { index, id, name, arguments } => {
                assert_eq!(index, 0);
                assert_eq!(id, "c1");
                assert_eq!(name, "execute_bash");
                assert!(arguments.starts_with("{\"comm"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn finish_reason_length_yields_max_tokens() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"length"}]}"#;
        let ev = parse_sse_data_line(line).unwrap().unwrap();
        assert_eq!(ev, ResponseEvent::MaxTokens);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        assert!(parse_sse_data_line(": keepalive").is_none());
        assert!(parse_sse_data_line("").is_none());
        assert!(parse_sse_data_line("event: ping").is_none());
    }

    #[test]
    fn drain_keeps_partial_line_in_buffer() {
        let mut buf = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: {\"choi",
        );
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(buf, "data: {\"choi");
    }

    #[test]
    fn build_messages_text_roles() {
        let msgs = vec![Message::system("s"), Message::user("u")];
        let wire = build_openai_messages(&msgs);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["content"], "u");
    }

    #[test]
    fn build_messages_coalesces_consecutive_tool_calls() {
        let msgs = vec![
            Message::tool_call("c1", "execute_bash", "{}"),
            Message::tool_call("c2", "read_file", "{}"),
            Message::tool_result("c1", "out1"),
        ];
        let wire = build_openai_messages(&msgs);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "c1");
    }
}
