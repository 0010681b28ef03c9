// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Typed errors raised while serving a chat request.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed request: non-streaming, empty messages, missing model.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The tool server's prompt endpoint was unreachable or returned an
    /// empty prompt.  Always swallowed in favour of the fallback prompt.
    #[error("prompt fetch failed: {0}")]
    PromptFetchFailed(String),

    /// The upstream model client failed.
    #[error("model call failed: {0}")]
    ModelCallFailed(String),

    /// The client went away; the agent run stops at the next await point.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all; reported but not elaborated to callers.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Stable machine-readable kind used in error SSE frames.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::InvalidRequest(_) => "invalid_request",
            BridgeError::PromptFetchFailed(_) => "prompt_fetch_failed",
            BridgeError::ModelCallFailed(_) => "model_call_failed",
            BridgeError::Cancelled => "cancelled",
            BridgeError::Internal(_) => "internal",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
