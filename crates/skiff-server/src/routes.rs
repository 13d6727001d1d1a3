// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode as HttpStatus},
    response::{
        sse::{Event, Sse},
        AppendHeaders, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::error;

use skiff_actions::{ApprovalError, HandlerOutcome};
use skiff_core::{RefusalKind, ResponseStatus, RunRequest, Runtime, StatusCode};

use crate::{
    sse::{frame_for, response_end_frame, session_start_frame, Frame, DONE_SENTINEL},
    wire::{
        ActionExecuteRequest, ActionExecuteResponse, ApprovalDecideRequest, ChatRequestBody,
        ChatResponseBody, ErrorBody, HealthResponse,
    },
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/actions", get(list_actions))
        .route("/api/actions/execute", post(execute_action))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/:name/state", get(agent_state).post(set_agent_state))
        .route("/api/approvals", get(list_approvals))
        .route("/api/approvals/decide", post(decide_approval))
        .route("/api/approvals/:id/cancel", post(cancel_approval))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

// ─── Discovery & health ───────────────────────────────────────────────────────

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "skiff",
        "version": VERSION,
        "description": "AI copilot runtime",
        "endpoints": {
            "health": "/api/health",
            "chat": "/api/chat",
            "chat_stream": "/api/chat/stream",
            "actions": "/api/actions",
            "execute_action": "/api/actions/execute",
            "agents": "/api/agents",
            "approvals": "/api/approvals",
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let adapter = state.runtime.adapter();
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: VERSION,
        provider: Some(adapter.provider_name().to_string()),
        model: Some(adapter.model_name().to_string()),
    })
}

// ─── Chat ─────────────────────────────────────────────────────────────────────

fn run_request_from(body: ChatRequestBody, headers: &HeaderMap) -> RunRequest {
    let mut properties = std::collections::HashMap::new();
    if let Some(serde_json::Value::Object(context)) = body.context {
        properties.extend(context);
    }
    if let Some(key) = header_str(headers, "x-api-key") {
        properties.insert("api_key".into(), json!(key));
    }

    let url = header_str(headers, "origin")
        .or_else(|| header_str(headers, "referer"))
        .map(|s| s.to_string());

    RunRequest {
        messages: body.messages,
        thread_id: body.thread_id,
        run_id: body.run_id,
        client_actions: body.actions,
        forwarded_parameters: body.forwarded_parameters,
        model: body.model,
        guardrails_rules: body
            .cloud
            .and_then(|c| c.guardrails)
            .map(|g| g.input_validation_rules),
        cloud_api_key: header_str(headers, "x-copilotcloud-public-api-key").map(|s| s.to_string()),
        properties,
        url,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn refusal_response(kind: RefusalKind, reason: String) -> Response {
    let status = match kind {
        RefusalKind::Auth => HttpStatus::UNAUTHORIZED,
        RefusalKind::RateLimit => HttpStatus::TOO_MANY_REQUESTS,
        RefusalKind::Validation => HttpStatus::BAD_REQUEST,
    };
    (status, Json(ErrorBody { error: reason })).into_response()
}

/// Non-streaming chat: drive the pipeline to completion and return the
/// collated messages as one JSON body.
async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Response {
    let extensions = body.extensions.clone();
    let request = run_request_from(body, &headers);

    let prepared = match state.runtime.begin(request).await {
        Ok(p) => p,
        Err(refusal) => return refusal_response(refusal.kind, refusal.reason),
    };

    // Keep the receiver alive and drained so the pipeline never blocks on a
    // full channel; the collated outcome is all this endpoint returns.
    let (tx, mut rx) = mpsc::channel(64);
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let outcome = prepared.execute(tx).await;
    let _ = drain.await;

    let http_status = if outcome.status.code == StatusCode::UnknownError {
        HttpStatus::INTERNAL_SERVER_ERROR
    } else {
        HttpStatus::OK
    };
    let response = ChatResponseBody {
        thread_id: outcome.thread_id,
        run_id: outcome.run_id,
        messages: outcome.messages,
        timestamp: chrono::Utc::now().to_rfc3339(),
        extensions,
        status: outcome.status,
    };
    (http_status, Json(response)).into_response()
}

/// Streaming chat: one SSE frame per runtime event, closed by a
/// `response_end` frame and the `[DONE]` sentinel.
async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Response {
    let request = run_request_from(body, &headers);

    let prepared = match state.runtime.begin(request).await {
        Ok(p) => p,
        Err(refusal) => return refusal_response(refusal.kind, refusal.reason),
    };
    let thread_id = prepared.thread_id().to_string();
    let run_id = prepared.run_id().to_string();

    let (tx, mut rx) = mpsc::channel(64);
    let run = tokio::spawn(prepared.execute(tx));

    let stream = async_stream::stream! {
        yield sse_event(session_start_frame(&thread_id, &run_id));
        while let Some(ev) = rx.recv().await {
            yield sse_event(frame_for(&ev, &thread_id));
        }
        let status = match run.await {
            Ok(outcome) => outcome.status,
            Err(e) => {
                error!(error = %e, "runtime task panicked");
                ResponseStatus::failed(StatusCode::UnknownError, "internal error")
            }
        };
        yield sse_event(response_end_frame(&status));
        yield Ok(Event::default().data(DONE_SENTINEL));
    };

    sse_response(stream)
}

fn sse_event(frame: Frame) -> Result<Event, Infallible> {
    Ok(Event::default().event(frame.event).data(frame.data.to_string()))
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    // Proxy-friendly headers: disable caching and nginx response buffering.
    let headers = AppendHeaders([
        ("Cache-Control", "no-cache"),
        ("Connection", "keep-alive"),
        ("X-Accel-Buffering", "no"),
    ]);
    (headers, Sse::new(stream)).into_response()
}

// ─── Actions ──────────────────────────────────────────────────────────────────

async fn list_actions(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "actions": state.runtime.actions().descriptors() }))
}

async fn execute_action(
    State(state): State<AppState>,
    Json(body): Json<ActionExecuteRequest>,
) -> Response {
    let start = Instant::now();
    let Some(action) = state.runtime.actions().get(&body.name) else {
        return (
            HttpStatus::NOT_FOUND,
            Json(ActionExecuteResponse {
                success: false,
                result: None,
                error: Some(format!("unknown action: {}", body.name)),
                execution_time: start.elapsed().as_secs_f64(),
            }),
        )
            .into_response();
    };
    let Some(handler) = action.handler.clone() else {
        return (
            HttpStatus::BAD_REQUEST,
            Json(ActionExecuteResponse {
                success: false,
                result: None,
                error: Some(format!("action '{}' has no server-side handler", body.name)),
                execution_time: start.elapsed().as_secs_f64(),
            }),
        )
            .into_response();
    };

    let response = match handler.call(body.arguments).await {
        Ok(outcome) => ActionExecuteResponse {
            success: true,
            result: Some(flatten_outcome(outcome)),
            error: None,
            execution_time: start.elapsed().as_secs_f64(),
        },
        Err(e) => ActionExecuteResponse {
            success: false,
            result: None,
            error: Some(e.to_string()),
            execution_time: start.elapsed().as_secs_f64(),
        },
    };
    Json(response).into_response()
}

/// Direct invocation returns a plain string; chunk-stream outcomes only make
/// sense inside a chat pipeline.
fn flatten_outcome(outcome: HandlerOutcome) -> String {
    match outcome {
        HandlerOutcome::Text(t) => t,
        HandlerOutcome::Structured { content, .. } => content.unwrap_or_default(),
        HandlerOutcome::Stream(_) => "[streaming result started]".to_string(),
    }
}

// ─── Agents (stubs until agent endpoints are configured) ─────────────────────

async fn list_agents() -> Json<serde_json::Value> {
    Json(json!({ "agents": [] }))
}

async fn agent_state(Path(name): Path<String>) -> Json<serde_json::Value> {
    Json(json!({ "agentName": name, "state": {} }))
}

async fn set_agent_state(Path(name): Path<String>) -> Json<serde_json::Value> {
    Json(json!({ "agentName": name, "state": {} }))
}

// ─── Approvals ────────────────────────────────────────────────────────────────

async fn list_approvals(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "pending": state.runtime.approvals().pending() }))
}

async fn decide_approval(
    State(state): State<AppState>,
    Json(body): Json<ApprovalDecideRequest>,
) -> Response {
    match state
        .runtime
        .approvals()
        .decide(&body.approval_id, body.approved)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e @ ApprovalError::NotFound(_)) => (
            HttpStatus::NOT_FOUND,
            Json(ErrorBody {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            HttpStatus::CONFLICT,
            Json(ErrorBody {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn cancel_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.runtime.approvals().cancel(&id) {
        Ok(()) => Json(json!({ "status": "cancelled", "approvalId": id })).into_response(),
        Err(e) => (
            HttpStatus::NOT_FOUND,
            Json(ErrorBody {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}
