// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
/// Events emitted by the agent loop during a single request.
///
/// The SSE layer converts these into OpenAI-shaped chunks with a total
/// function over the variants — no stringly-typed event parts.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text fragment streamed from the model.
    TextDelta(String),
    /// The model requested a tool call (announced before execution).
    ToolCallStarted {
        id: String,
        name: String,
        /// Raw JSON argument string as the model produced it.
        arguments: String,
    },
    /// A tool call finished executing on the tool server.
    ToolCallFinished {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// The agent finished this turn normally.
    Finished,
    /// The turn failed; one error frame is emitted, then the stream ends.
    Failed { kind: String, message: String },
}
