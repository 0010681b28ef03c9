// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Axum server for the OpenAI-compatible surface.
//!
//! `POST /v1/chat/completions` drives an agent turn and streams its events
//! as SSE frames; chunks are delivered strictly in production order and the
//! stream always ends with a literal `data: [DONE]` frame.  A client
//! disconnect drops the stream, which closes the event channel and cancels
//! the agent run at its next suspension point.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::agent::RuntimeCache;
use crate::events::AgentEvent;
use crate::openai::{models_response, ChatCompletionRequest, ChunkFactory};
use crate::prompt_cache::PromptCache;
use crate::sessions::SessionStore;

/// Shared state of the bridge server.
#[derive(Clone)]
pub struct BridgeState {
    pub sessions: Arc<SessionStore>,
    pub prompt_cache: Arc<PromptCache>,
    pub runtimes: Arc<RuntimeCache>,
    pub service_name: String,
    pub model_id: String,
}

/// Build the bridge router.
pub fn app(state: BridgeState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve, with a periodic session-cleanup task running alongside.
pub async fn serve(listen: &str, state: BridgeState, cleanup_every: Duration) -> anyhow::Result<()> {
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(cleanup_every);
        loop {
            tick.tick().await;
            sessions.cleanup_expired().await;
        }
    });

    let router = app(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "bridge listening");
    axum::serve(listener, router).await?;
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health(State(state): State<BridgeState>) -> Response {
    Json(json!({
        "status": "healthy",
        "service": state.service_name,
        "client_initialized": state.prompt_cache.is_primed(),
    }))
    .into_response()
}

async fn models(State(state): State<BridgeState>) -> Response {
    Json(models_response(&state.model_id, &state.service_name)).into_response()
}

async fn chat_completions(
    State(state): State<BridgeState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    if let Err(e) = request.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": { "message": e.to_string(), "type": e.kind() } })),
        )
            .into_response();
    }

    let user_id = request
        .user
        .clone()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4().simple()));
    let user_text = request
        .latest_user_message()
        .unwrap_or_default()
        .to_string();

    let session_id = state.sessions.ensure_session(&user_id).await;
    debug!(user = %user_id, session = %session_id, "chat request accepted");

    let runtime = state.runtimes.get_or_build(&user_id).await;

    // Agent events flow through the first channel; the converter task turns
    // them into SSE frames on the second and owns stream termination.
    let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(64);
    let (frame_tx, frame_rx) = mpsc::channel::<Result<Event, Infallible>>(64);

    tokio::spawn(async move {
        if let Err(e) = runtime.run_turn(&user_text, event_tx.clone()).await {
            error!(error = %e, "agent turn failed");
            let _ = event_tx
                .send(AgentEvent::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                })
                .await;
        }
    });

    let factory = ChunkFactory::new(request.model.clone());
    tokio::spawn(async move {
        let mut events = event_rx;
        while let Some(event) = events.recv().await {
            let terminal = matches!(event, AgentEvent::Finished | AgentEvent::Failed { .. });
            if let Some(frame) = factory.frame_for(&event) {
                if frame_tx
                    .send(Ok(Event::default().data(frame.to_string())))
                    .await
                    .is_err()
                {
                    // Client went away; dropping `events` unblocks the agent.
                    return;
                }
            }
            if terminal {
                break;
            }
        }
        let _ = frame_tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    Sse::new(ReceiverStream::new(frame_rx)).into_response()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
//
// Full request → SSE round-trips live in tests/chat_api.rs; here only the
// pieces with no transport dependency are covered.
