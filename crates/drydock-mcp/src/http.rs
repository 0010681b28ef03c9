// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Axum app: MCP mount plus the plain-HTTP side-endpoints.
//!
//! ```text
//! POST /mcp                          MCP streamable-HTTP (tools + prompt)
//! GET  /health                       service health
//! GET  /skills                       skill index (metadata only)
//! GET  /skills/{id}                  full skill including body
//! GET  /{user_id}/artifacts          artifact name listing
//! GET  /{user_id}/artifacts/{name}   artifact content, base64
//! ```
//!
//! The artifact path bypasses the agent entirely: UI code downloads
//! generated files straight from the user's container.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use base64::Engine;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use drydock_sandbox::{ContainerFs, ContainerManager, SandboxError};
use drydock_skills::SkillRegistry;

use crate::server::ToolServerHandler;

/// Shared state for the side-endpoints.
#[derive(Clone)]
pub struct HttpState {
    pub manager: Arc<ContainerManager>,
    pub fs: Arc<ContainerFs>,
    pub skills: Arc<SkillRegistry>,
    pub service_name: String,
}

/// Build the full router: side-endpoints plus the `/mcp` service.
pub fn app(state: HttpState, handler: ToolServerHandler) -> Router {
    let mcp_service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    side_router(state)
        .nest_service("/mcp", mcp_service)
        .layer(TraceLayer::new_for_http())
}

/// The side-endpoints alone (separated for in-process tests).
pub fn side_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/skills", get(skills_index))
        .route("/skills/:id", get(skill_detail))
        .route("/:user_id/artifacts", get(artifacts_index))
        .route("/:user_id/artifacts/:name", get(artifact_get))
        .with_state(state)
}

/// Bind and serve until the task is cancelled.
pub async fn serve(
    listen: &str,
    state: HttpState,
    handler: ToolServerHandler,
) -> anyhow::Result<()> {
    let router = app(state, handler);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "tool server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health(State(state): State<HttpState>) -> Response {
    let daemon_ok = state.manager.docker().ping().await.is_ok();
    let status = if daemon_ok { "healthy" } else { "unhealthy" };
    let body = json!({
        "status": status,
        "service": state.service_name,
        "client_initialized": daemon_ok,
    });
    let code = if daemon_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

async fn skills_index(State(state): State<HttpState>) -> Response {
    let skills = state.skills.skills();
    let entries: Vec<_> = skills
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "name": s.name,
                "description": s.description,
                "version": s.version,
            })
        })
        .collect();
    Json(json!({ "count": entries.len(), "skills": entries })).into_response()
}

async fn skill_detail(State(state): State<HttpState>, Path(id): Path<String>) -> Response {
    match state.skills.get(&id) {
        Some(s) => Json(json!({
            "id": s.id,
            "name": s.name,
            "description": s.description,
            "version": s.version,
            "dependencies": s.dependencies,
            "body": s.body,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("skill not found: {id}") })),
        )
            .into_response(),
    }
}

async fn artifacts_index(
    State(state): State<HttpState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.fs.list_artifacts(&user_id).await {
        Ok(names) => {
            let count = names.len();
            Json(json!({ "artifacts": names, "count": count })).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn artifact_get(
    State(state): State<HttpState>,
    Path((user_id, name)): Path<(String, String)>,
) -> Response {
    match state.fs.get_artifact(&user_id, &name).await {
        Ok(bytes) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Json(json!({
                "artifact_id": name,
                "data": encoded,
                "encoding": "base64",
            }))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Map a sandbox error to the documented HTTP status.
fn error_response(e: SandboxError) -> Response {
    let code = match &e {
        SandboxError::FileNotFound(_) => StatusCode::NOT_FOUND,
        SandboxError::PathViolation(_)
        | SandboxError::ArtifactTooLarge { .. }
        | SandboxError::InvalidUserId => StatusCode::BAD_REQUEST,
        SandboxError::ImageUnavailable(_) | SandboxError::ContainerUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SandboxError::DocstringExtractionFailed(_)
        | SandboxError::Docker(_)
        | SandboxError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(json!({ "error": e.to_string() }))).into_response()
}
