// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `drydock-bridge` — the agent runtime bridge.
//!
//! Accepts OpenAI-shaped streaming chat requests, drives the agent loop for
//! the caller's user id, routes tool calls to the tool server over MCP, and
//! streams the loop's events back as `chat.completion.chunk` SSE frames.
//!
//! ```text
//! POST /v1/chat/completions
//!        │ validate, resolve user id, ensure session
//!        ▼
//! RuntimeCache ── per-user AgentRuntime { model, MCP client, prompt, history }
//!        │
//!        ▼
//! agent loop ── completions ⇄ tool calls ──► tool server (/mcp, x-user-id)
//!        │
//!        ▼
//! SSE: data: {chunk}\n\n … data: [DONE]\n\n
//! ```

pub mod agent;
pub mod error;
pub mod events;
pub mod openai;
pub mod prompt_cache;
pub mod server;
pub mod sessions;

pub use agent::{AgentRuntime, RuntimeCache};
pub use error::BridgeError;
pub use events::AgentEvent;
pub use prompt_cache::{McpPromptFetcher, PromptCache, PromptFetcher, FALLBACK_PROMPT};
pub use sessions::SessionStore;
