// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod mock;
mod openai_compat;
mod provider;
mod types;

pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai_compat::OpenAICompatProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use types::*;

use anyhow::bail;
use drydock_config::ModelConfig;

/// Construct a boxed [`ModelProvider`] from configuration.
///
/// `"openai"` selects the OpenAI-compatible streaming driver (works for any
/// endpoint speaking the `/v1/chat/completions` SSE wire format, including
/// local servers).  `"mock"` selects the deterministic echo provider used in
/// tests and demos.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "openai" => Ok(Box::new(OpenAICompatProvider::new(
            cfg.name.clone(),
            cfg.resolve_api_key(),
            cfg.base_url.as_deref().unwrap_or("https://api.openai.com/v1"),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "mock" => Ok(Box::new(MockProvider)),
        other => bail!("unknown model provider: {other}"),
    }
}
