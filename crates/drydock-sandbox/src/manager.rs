// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-user container lifecycle.
//!
//! The manager owns the full set of container records for this process.
//! Records never survive a restart; orphans left by a crashed process are
//! swept by name prefix on startup.
//!
//! All state transitions for one user id happen inside that id's critical
//! section, so concurrent `acquire` calls for the same user can never create
//! two containers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use drydock_config::ExecutorConfig;

use crate::error::SandboxError;

/// Name prefix every executor container carries.  The orphan sweep removes
/// anything matching it, so the prefix must stay unique to this service.
const CONTAINER_NAME_PREFIX: &str = "drydock-exec-";

/// Maximum attempts for transient daemon errors (1 initial + 2 retries).
const MAX_ATTEMPTS: u32 = 3;

/// Lifecycle state of a user's container record.  The absence of a record is
/// the implicit `Absent` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Starting,
    Running,
    Stopped,
    Removing,
}

/// One record per user id.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub container_id: String,
    pub image: String,
    pub created_at: Instant,
    pub last_used: Instant,
    pub state: ContainerState,
}

/// Owns every executor container of this process.
pub struct ContainerManager {
    docker: Docker,
    config: ExecutorConfig,
    records: Mutex<HashMap<String, ContainerRecord>>,
    /// Per-user-id critical sections.  The outer mutex only guards the map;
    /// the inner mutexes serialize lifecycle transitions per user.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerManager {
    /// Connect to the local Docker daemon and verify it responds.
    pub async fn connect(config: ExecutorConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxError::ContainerUnavailable(format!("docker ping failed: {e}")))?;
        info!(image = %config.image, "container manager connected to docker daemon");
        Ok(Self::new(docker, config))
    }

    /// Build a manager around an existing daemon handle (used by tests).
    pub fn new(docker: Docker, config: ExecutorConfig) -> Self {
        Self {
            docker,
            config,
            records: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying daemon handle, shared with the exec and file layers.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn artifact_size_limit(&self) -> u64 {
        self.config.artifact_size_limit
    }

    pub fn default_exec_timeout(&self) -> Duration {
        Duration::from_secs(self.config.exec_timeout_secs)
    }

    /// Return a Running container id for `user_id`, creating or restarting
    /// the container as needed.  Updates the record's last-use timestamp.
    pub async fn acquire(&self, user_id: &str) -> Result<String, SandboxError> {
        if user_id.is_empty() {
            return Err(SandboxError::InvalidUserId);
        }

        let key_lock = self.key_lock(user_id).await;
        let _guard = key_lock.lock().await;

        // Fast path: a live record we can reuse or restart.
        if let Some(mut record) = self.record_snapshot(user_id).await {
            match record.state {
                ContainerState::Running => {
                    if self.is_running(&record.container_id).await {
                        record.last_used = Instant::now();
                        self.store_record(user_id, record.clone()).await;
                        return Ok(record.container_id);
                    }
                    // The container died underneath us; fall through to a
                    // restart attempt before recreating.
                    record.state = ContainerState::Stopped;
                }
                ContainerState::Stopped => {}
                ContainerState::Starting | ContainerState::Removing => {
                    // Stale transitional state from a failed operation —
                    // drop the record and recreate below.
                    self.drop_record(user_id).await;
                    record.state = ContainerState::Removing;
                }
            }

            if record.state == ContainerState::Stopped {
                match self
                    .docker
                    .start_container(&record.container_id, None::<StartContainerOptions<String>>)
                    .await
                {
                    Ok(()) => {
                        debug!(user = %user_id, container = %short_id(&record.container_id), "restarted stopped container");
                        record.state = ContainerState::Running;
                        record.last_used = Instant::now();
                        self.store_record(user_id, record.clone()).await;
                        return Ok(record.container_id);
                    }
                    Err(e) => {
                        warn!(user = %user_id, error = %e, "restart failed; recreating container");
                        self.force_remove(&record.container_id).await;
                        self.drop_record(user_id).await;
                    }
                }
            }
        }

        // Slow path: create a fresh container.
        let container_id = self.create_and_start(user_id).await?;
        let now = Instant::now();
        self.store_record(
            user_id,
            ContainerRecord {
                container_id: container_id.clone(),
                image: self.config.image.clone(),
                created_at: now,
                last_used: now,
                state: ContainerState::Running,
            },
        )
        .await;
        Ok(container_id)
    }

    /// Best-effort stop + remove for one user.  The record becomes Absent.
    pub async fn remove(&self, user_id: &str) {
        let key_lock = self.key_lock(user_id).await;
        let _guard = key_lock.lock().await;

        let Some(mut record) = self.record_snapshot(user_id).await else {
            return;
        };
        record.state = ContainerState::Removing;
        self.store_record(user_id, record.clone()).await;
        self.force_remove(&record.container_id).await;
        self.drop_record(user_id).await;
        info!(user = %user_id, container = %short_id(&record.container_id), "removed container");
    }

    /// Stop and remove every known container.  Idempotent; called at
    /// process shutdown.
    pub async fn release_all(&self) {
        let drained: Vec<(String, ContainerRecord)> = {
            let mut records = self.records.lock().await;
            records.drain().collect()
        };
        for (user_id, record) in drained {
            self.force_remove(&record.container_id).await;
            debug!(user = %user_id, "released container at shutdown");
        }
    }

    /// Remove containers left behind by a previous process, identified by
    /// the shared name prefix.  Called once at startup.
    pub async fn sweep_orphans(&self) {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![CONTAINER_NAME_PREFIX.to_string()]);
        let opts = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let list = match self.docker.list_containers(Some(opts)).await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "orphan sweep: listing containers failed");
                return;
            }
        };
        for summary in list {
            if let Some(id) = summary.id {
                info!(container = %short_id(&id), "removing orphaned executor container");
                self.force_remove(&id).await;
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn key_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn record_snapshot(&self, user_id: &str) -> Option<ContainerRecord> {
        self.records.lock().await.get(user_id).cloned()
    }

    async fn store_record(&self, user_id: &str, record: ContainerRecord) {
        self.records.lock().await.insert(user_id.to_string(), record);
    }

    async fn drop_record(&self, user_id: &str) {
        self.records.lock().await.remove(user_id);
    }

    async fn is_running(&self, container_id: &str) -> bool {
        match self
            .docker
            .inspect_container(container_id, None::<bollard::container::InspectContainerOptions>)
            .await
        {
            Ok(info) => info
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Create and start a container for `user_id`, retrying transient daemon
    /// errors with exponential backoff.  A missing image fails immediately.
    async fn create_and_start(&self, user_id: &str) -> Result<String, SandboxError> {
        // Missing image is a configuration problem, not a transient fault.
        if let Err(e) = self.docker.inspect_image(&self.config.image).await {
            if is_not_found(&e) {
                return Err(SandboxError::ImageUnavailable(self.config.image.clone()));
            }
            return Err(SandboxError::ContainerUnavailable(format!(
                "docker daemon unreachable: {e}"
            )));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_create_and_start(user_id).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < MAX_ATTEMPTS && is_transient(&e) => {
                    let backoff = Duration::from_millis(250 * 2u64.pow(attempt));
                    warn!(
                        user = %user_id,
                        attempt,
                        error = %e,
                        "container create failed; retrying in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(SandboxError::ContainerUnavailable(format!(
                        "create/start for user {user_id} failed: {e}"
                    )))
                }
            }
        }
    }

    async fn try_create_and_start(&self, user_id: &str) -> Result<String, bollard::errors::Error> {
        let name = container_name(user_id);
        let hostname = sanitize_user_id(user_id);

        let mut binds = Vec::new();
        if let Some(tools) = &self.config.tools_path {
            binds.push(format!("{tools}:/tools:ro"));
        }
        if let Some(skills) = &self.config.skills_path {
            binds.push(format!("{skills}:/skills:ro"));
        }

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            ..Default::default()
        };

        let container_config = Config {
            image: Some(self.config.image.clone()),
            hostname: Some(hostname),
            working_dir: Some("/workspace".to_string()),
            // The image's own entrypoint may exit immediately; an explicit
            // keepalive makes the container long-lived for exec sessions.
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_opts = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let created = match self
            .docker
            .create_container(Some(create_opts), container_config.clone())
            .await
        {
            Ok(c) => c,
            Err(e) if is_conflict(&e) => {
                // A container with this name already exists (earlier partial
                // failure).  Remove it and create again.
                self.remove_by_name(&name).await;
                self.docker
                    .create_container(
                        Some(CreateContainerOptions {
                            name: name.as_str(),
                            platform: None,
                        }),
                        container_config,
                    )
                    .await?
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Start failure leaves the record Absent — clean up the half-made
            // container so the name is free for the next attempt.
            self.force_remove(&created.id).await;
            return Err(e);
        }

        info!(user = %user_id, container = %short_id(&created.id), "created executor container");
        Ok(created.id)
    }

    async fn remove_by_name(&self, name: &str) {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(name, Some(opts)).await {
            debug!(container = %name, error = %e, "remove by name failed");
        }
    }

    async fn force_remove(&self, container_id: &str) {
        let _ = self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: 2 }))
            .await;
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(container_id, Some(opts)).await {
            debug!(container = %short_id(container_id), error = %e, "container remove failed");
        }
    }
}

// ── Naming helpers ────────────────────────────────────────────────────────────

/// Reduce a raw user id to lowercase `[a-z0-9-]` for container/hostname use.
pub(crate) fn sanitize_user_id(user_id: &str) -> String {
    let mut out: String = user_id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    out.truncate(40);
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "user".to_string()
    } else {
        trimmed
    }
}

/// Derive the container name for a user id.
///
/// The sanitized id is readable but lossy, so a short hash of the raw id is
/// appended to keep names collision-free across distinct user ids.
pub(crate) fn container_name(user_id: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    format!(
        "{}{}-{:08x}",
        CONTAINER_NAME_PREFIX,
        sanitize_user_id(user_id),
        hasher.finish() as u32
    )
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

// ── Docker error classification ───────────────────────────────────────────────

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

fn is_conflict(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }
    )
}

/// Server 5xx and plain I/O failures are worth a retry; everything else
/// (bad request, conflict, not found) is deterministic.
fn is_transient(e: &bollard::errors::Error) -> bool {
    match e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => *status_code >= 500,
        bollard::errors::Error::IOError { .. } => true,
        bollard::errors::Error::RequestTimeoutError => true,
        _ => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── sanitize_user_id ──────────────────────────────────────────────────────

    #[test]
    fn sanitize_keeps_alnum_lowercase() {
        assert_eq!(sanitize_user_id("Alice42"), "alice42");
    }

    #[test]
    fn sanitize_replaces_specials_with_dashes() {
        assert_eq!(sanitize_user_id("bob@example.com"), "bob-example-com");
    }

    #[test]
    fn sanitize_trims_edge_dashes() {
        assert_eq!(sanitize_user_id("__bob__"), "bob");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_user_id(""), "user");
        assert_eq!(sanitize_user_id("///"), "user");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(100);
        assert!(sanitize_user_id(&long).len() <= 40);
    }

    // ── container_name ────────────────────────────────────────────────────────

    #[test]
    fn container_name_has_prefix() {
        assert!(container_name("u1").starts_with(CONTAINER_NAME_PREFIX));
    }

    #[test]
    fn container_name_stable_for_same_user() {
        assert_eq!(container_name("u1"), container_name("u1"));
    }

    #[test]
    fn container_name_distinct_for_collapsing_ids() {
        // Both sanitize to "a-b" — the hash suffix must keep them apart.
        assert_ne!(container_name("a.b"), container_name("a_b"));
    }

    // ── error classification ──────────────────────────────────────────────────

    #[test]
    fn server_500_is_transient() {
        let e = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".into(),
        };
        assert!(is_transient(&e));
    }

    #[test]
    fn not_found_is_not_transient() {
        let e = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "no such image".into(),
        };
        assert!(!is_transient(&e));
        assert!(is_not_found(&e));
    }
}
