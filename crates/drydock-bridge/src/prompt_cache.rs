// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! TTL-bound cache of the rendered system prompt.
//!
//! One slot, process-wide.  A fresh value is served for `ttl`; after expiry
//! the next call re-fetches through the narrow [`PromptFetcher`] seam.  A
//! failed or slow fetch degrades to the static fallback prompt without
//! caching it, so the next call tries the server again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Ceiling on one prompt fetch; past it the fallback path is taken.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Served when the tool server cannot provide the skill-aware prompt.
pub const FALLBACK_PROMPT: &str = "You are a coding agent operating inside a dedicated Linux \
container. Your working directory is /workspace; files saved under /artifacts are published to \
the user. Use the execute_bash, write_file, read_file, and read_docstring tools to do your work.";

/// The one thing the cache needs from the MCP client.
#[async_trait]
pub trait PromptFetcher: Send + Sync {
    async fn fetch_prompt(&self) -> anyhow::Result<String>;
}

/// Single-slot prompt cache.
pub struct PromptCache {
    fetcher: Box<dyn PromptFetcher>,
    ttl: Duration,
    slot: Mutex<Option<(String, Instant)>>,
    /// True once any fetch has succeeded — reported by the health endpoint.
    primed: AtomicBool,
}

impl PromptCache {
    pub fn new(fetcher: Box<dyn PromptFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            slot: Mutex::new(None),
            primed: AtomicBool::new(false),
        }
    }

    /// The current system prompt.  Never fails: a broken fetch yields the
    /// static fallback (uncached, with a warning).
    pub async fn get(&self) -> String {
        // Holding the slot lock across the fetch also collapses concurrent
        // refreshes into a single in-flight request.
        let mut slot = self.slot.lock().await;

        if let Some((value, fetched_at)) = slot.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return value.clone();
            }
            debug!("prompt cache expired; refreshing");
        }

        match tokio::time::timeout(FETCH_TIMEOUT, self.fetcher.fetch_prompt()).await {
            Ok(Ok(prompt)) if !prompt.trim().is_empty() => {
                *slot = Some((prompt.clone(), Instant::now()));
                self.primed.store(true, Ordering::Relaxed);
                prompt
            }
            Ok(Ok(_)) => {
                warn!("prompt endpoint returned an empty prompt; using fallback");
                FALLBACK_PROMPT.to_string()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "prompt fetch failed; using fallback");
                FALLBACK_PROMPT.to_string()
            }
            Err(_) => {
                warn!("prompt fetch timed out; using fallback");
                FALLBACK_PROMPT.to_string()
            }
        }
    }

    /// Whether any fetch has ever succeeded.
    pub fn is_primed(&self) -> bool {
        self.primed.load(Ordering::Relaxed)
    }
}

/// Production fetcher: asks the tool server for the rendered prompt over MCP.
pub struct McpPromptFetcher {
    client: drydock_mcp_client::McpClient,
}

impl McpPromptFetcher {
    /// `mcp_url` points at the tool server's `/mcp` mount.  The prompt is
    /// user-independent, so the underlying client carries no user id.
    pub fn new(mcp_url: impl Into<String>) -> Self {
        Self {
            client: drydock_mcp_client::McpClient::new(mcp_url, None),
        }
    }
}

#[async_trait]
impl PromptFetcher for McpPromptFetcher {
    async fn fetch_prompt(&self) -> anyhow::Result<String> {
        Ok(self.client.get_prompt("agent_system_prompt").await?)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Fetcher that counts calls and can be told to fail.
    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PromptFetcher for CountingFetcher {
        async fn fetch_prompt(&self) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                anyhow::bail!("server down");
            }
            Ok(format!("PROMPT v{n}"))
        }
    }

    fn cache(fail: bool, ttl: Duration) -> (PromptCache, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = PromptCache::new(
            Box::new(CountingFetcher { calls: calls.clone(), fail }),
            ttl,
        );
        (cache, calls)
    }

    #[tokio::test]
    async fn fresh_value_served_without_refetch() {
        let (cache, calls) = cache(false, Duration::from_secs(60));
        assert_eq!(cache.get().await, "PROMPT v1");
        assert_eq!(cache.get().await, "PROMPT v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_primed());
    }

    #[tokio::test]
    async fn expiry_triggers_refresh() {
        let (cache, calls) = cache(false, Duration::from_millis(20));
        assert_eq!(cache.get().await, "PROMPT v1");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get().await, "PROMPT v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_yields_fallback_and_is_not_cached() {
        let (cache, calls) = cache(true, Duration::from_secs(60));
        assert_eq!(cache.get().await, FALLBACK_PROMPT);
        assert_eq!(cache.get().await, FALLBACK_PROMPT);
        // Both calls hit the fetcher — failures must not populate the slot.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_primed());
    }

    /// Fetcher returning empty text — treated like a failure.
    struct EmptyFetcher;

    #[async_trait]
    impl PromptFetcher for EmptyFetcher {
        async fn fetch_prompt(&self) -> anyhow::Result<String> {
            Ok("   ".to_string())
        }
    }

    #[tokio::test]
    async fn empty_prompt_falls_back() {
        let cache = PromptCache::new(Box::new(EmptyFetcher), Duration::from_secs(60));
        assert_eq!(cache.get().await, FALLBACK_PROMPT);
        assert!(!cache.is_primed());
    }
}
