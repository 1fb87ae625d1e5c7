use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use mqscope_api::{MessageId, MessageRecord};
use mqscope_engine::{BulkClearOptions, BulkError, EngineError};

use super::AppState;

fn error_response(status: StatusCode, e: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/stats, GET /api/topics
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.stats()).into_response()
}

pub(crate) async fn handle_list_topics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.list_topics()).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/topics/{*topic}?limit=N
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct MessagesParams {
    /// Only the most recent N messages.
    limit: Option<usize>,
}

#[derive(Serialize)]
struct TopicMessages<'a> {
    topic: &'a str,
    byte_usage: u64,
    max_bytes: u64,
    messages: Vec<&'a MessageRecord>,
}

pub(crate) async fn handle_topic_messages(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(params): Query<MessagesParams>,
) -> impl IntoResponse {
    let Some(byte_usage) = state.store.buffer_byte_usage(&topic) else {
        return error_response(StatusCode::NOT_FOUND, EngineError::TopicNotFound(topic));
    };

    let messages = state.store.messages(&topic);
    let skip = params
        .limit
        .map(|limit| messages.len().saturating_sub(limit))
        .unwrap_or(0);
    let body = TopicMessages {
        topic: &topic,
        byte_usage,
        max_bytes: state.store.configured_limit(&topic),
        messages: messages.iter().skip(skip).collect(),
    };
    Json(body).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: DELETE /api/topics/{*topic}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_clear_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> impl IntoResponse {
    let cleared = state.store.clear_topic(&topic);
    Json(json!({ "topic": topic, "cleared": cleared })).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/message/{id}?topic=X
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct MessageParams {
    topic: String,
}

pub(crate) async fn handle_message_by_id(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<MessageParams>,
) -> impl IntoResponse {
    match state.store.message_by_id(&params.topic, MessageId(id)) {
        Some(record) => Json(record.as_ref()).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("message {id} not found on '{}'", params.topic),
        ),
    }
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/tree, POST /api/tree/filter, POST /api/tree/expanded
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_tree(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.tree_snapshot(true)).into_response()
}

#[derive(Deserialize)]
pub(crate) struct FilterRequest {
    /// Absent or blank clears the filter.
    #[serde(default)]
    filter: Option<String>,
}

/// Set the shared tree filter and return the filtered tree.
pub(crate) async fn handle_set_filter(
    State(state): State<AppState>,
    Json(req): Json<FilterRequest>,
) -> impl IntoResponse {
    state.store.apply_filter(req.filter.as_deref());
    Json(state.store.tree_snapshot(true)).into_response()
}

#[derive(Deserialize)]
pub(crate) struct ExpandRequest {
    path: String,
    expanded: bool,
}

pub(crate) async fn handle_set_expanded(
    State(state): State<AppState>,
    Json(req): Json<ExpandRequest>,
) -> impl IntoResponse {
    if state.store.set_expanded(&req.path, req.expanded) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("no tree node '{}'", req.path))
    }
}

// ═══════════════════════════════════════════════════════════════
//  REST: POST /api/bulk-clear
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct BulkClearRequest {
    start: String,
    #[serde(default)]
    confirmed: bool,
}

pub(crate) async fn handle_bulk_clear(
    State(state): State<AppState>,
    Json(req): Json<BulkClearRequest>,
) -> impl IntoResponse {
    let options = BulkClearOptions {
        confirmed: req.confirmed,
    };
    match state
        .bulk
        .run(&req.start, options, state.shutdown.child_token())
        .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => match e {
            BulkError::TopicLimitExceeded { found, limit, .. } => (
                StatusCode::CONFLICT,
                Json(json!({ "error": e.to_string(), "found": found, "limit": limit })),
            )
                .into_response(),
            BulkError::NothingToClear(_) => error_response(StatusCode::NOT_FOUND, e),
            BulkError::InvalidPattern { .. } => error_response(StatusCode::BAD_REQUEST, e),
        },
    }
}
