// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Listen addresses and the URL the bridge uses to reach the tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the tool/prompt server binds to.
    #[serde(default = "default_tools_listen")]
    pub tools_listen: String,
    /// Address the OpenAI-compatible bridge binds to.
    #[serde(default = "default_bridge_listen")]
    pub bridge_listen: String,
    /// URL of the MCP endpoint as seen from the bridge.
    ///
    /// Points at the tool server's `/mcp` mount.  Change this when the two
    /// services run on different hosts or behind a gateway.
    #[serde(default = "default_mcp_url")]
    pub mcp_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tools_listen: default_tools_listen(),
            bridge_listen: default_bridge_listen(),
            mcp_url: default_mcp_url(),
        }
    }
}

fn default_tools_listen() -> String {
    "0.0.0.0:8989".into()
}

fn default_bridge_listen() -> String {
    "0.0.0.0:8080".into()
}

fn default_mcp_url() -> String {
    "http://localhost:8989/mcp".into()
}

/// Settings for the per-user executor containers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Image every user container is created from.  The image must provide
    /// `/bin/bash`, `timeout(1)`, a Python 3 interpreter on PATH, and a
    /// non-root user with write access to `/workspace` and `/artifacts`.
    #[serde(default = "default_image")]
    pub image: String,
    /// Host directory bound read-only at `/tools` in every container.
    #[serde(default)]
    pub tools_path: Option<String>,
    /// Host directory bound read-only at `/skills` in every container.
    /// Also the root the skill registry scans.
    #[serde(default)]
    pub skills_path: Option<String>,
    /// Per-fetch artifact size ceiling in bytes.
    #[serde(default = "default_artifact_size_limit")]
    pub artifact_size_limit: u64,
    /// Default command timeout in seconds (overridable per call).
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            tools_path: None,
            skills_path: None,
            artifact_size_limit: default_artifact_size_limit(),
            exec_timeout_secs: default_exec_timeout(),
        }
    }
}

fn default_image() -> String {
    "drydock-executor:latest".into()
}

fn default_artifact_size_limit() -> u64 {
    50 * 1024 * 1024
}

fn default_exec_timeout() -> u64 {
    30
}

/// Bridge-side agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name reported in health responses and used as the session app name.
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Model id advertised by `GET /v1/models` and accepted in chat requests.
    #[serde(default = "default_model_id")]
    pub default_model: String,
    /// Idle TTL for conversation sessions, seconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// TTL of the cached system prompt, seconds.
    #[serde(default = "default_prompt_cache_ttl")]
    pub prompt_cache_ttl_secs: u64,
    /// Upper bound on model⇄tool rounds within one user turn.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            default_model: default_model_id(),
            session_timeout_secs: default_session_timeout(),
            prompt_cache_ttl_secs: default_prompt_cache_ttl(),
            max_turns: default_max_turns(),
        }
    }
}

fn default_agent_name() -> String {
    "drydock".into()
}

fn default_model_id() -> String {
    "drydock-agent".into()
}

fn default_session_timeout() -> u64 {
    3600
}

fn default_prompt_cache_ttl() -> u64 {
    3600
}

fn default_max_turns() -> usize {
    16
}

/// Upstream LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" for any OpenAI-compatible endpoint,
    /// "mock" for the deterministic test provider.
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Required for local servers (Ollama, vLLM, llama.cpp).
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: explicit value first, then the named env var,
    /// then the conventional `OPENAI_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            if !k.is_empty() {
                return Some(k.clone());
            }
        }
        if let Some(var) = &self.api_key_env {
            if let Ok(v) = std::env::var(var) {
                if !v.is_empty() {
                    return Some(v);
                }
            }
        }
        std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.mcp_url, "http://localhost:8989/mcp");
        assert_eq!(cfg.executor.artifact_size_limit, 50 * 1024 * 1024);
        assert_eq!(cfg.executor.exec_timeout_secs, 30);
        assert_eq!(cfg.agent.session_timeout_secs, 3600);
        assert_eq!(cfg.agent.prompt_cache_ttl_secs, 3600);
    }

    #[test]
    fn empty_yaml_deserializes_to_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.executor.image, "drydock-executor:latest");
        assert_eq!(cfg.agent.name, "drydock");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: Config =
            serde_yaml::from_str("executor:\n  image: custom:dev\n").unwrap();
        assert_eq!(cfg.executor.image, "custom:dev");
        assert_eq!(cfg.executor.exec_timeout_secs, 30);
    }

    #[test]
    fn explicit_api_key_wins_over_env() {
        let cfg = ModelConfig {
            api_key: Some("inline-key".into()),
            api_key_env: Some("DRYDOCK_TEST_NO_SUCH_VAR".into()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("inline-key"));
    }

    #[test]
    fn config_roundtrips_through_yaml() {
        let cfg = Config::default();
        let text = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.server.bridge_listen, cfg.server.bridge_listen);
        assert_eq!(back.agent.max_turns, cfg.agent.max_turns);
    }
}
