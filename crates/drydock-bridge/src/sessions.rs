// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-user conversation sessions with an idle TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

struct SessionEntry {
    id: String,
    last_access: Instant,
}

/// user id → session id mapping.  A session is live while its last access
/// is within the timeout; a stale session is replaced by a fresh id on the
/// next `ensure_session`.
pub struct SessionStore {
    timeout: Duration,
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Return the live session id for `user_id`, minting a new one when the
    /// user has no session or the existing one went stale.  Touches the
    /// last-access timestamp either way.
    pub async fn ensure_session(&self, user_id: &str) -> String {
        let mut map = self.inner.lock().await;
        let now = Instant::now();

        if let Some(entry) = map.get_mut(user_id) {
            if now.duration_since(entry.last_access) < self.timeout {
                entry.last_access = now;
                return entry.id.clone();
            }
            debug!(user = %user_id, "session expired; replacing");
        }

        let id = Uuid::new_v4().to_string();
        map.insert(
            user_id.to_string(),
            SessionEntry {
                id: id.clone(),
                last_access: now,
            },
        );
        id
    }

    /// Drop sessions idle for longer than the timeout.  Correctness does not
    /// depend on this — `ensure_session` replaces stale entries on its own —
    /// it only bounds memory.
    pub async fn cleanup_expired(&self) {
        let mut map = self.inner.lock().await;
        let now = Instant::now();
        let timeout = self.timeout;
        let before = map.len();
        map.retain(|_, entry| now.duration_since(entry.last_access) < timeout);
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "cleaned up expired sessions");
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
