mod http;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;

use mqscope_engine::{BulkClear, MessageStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    pub bulk: Arc<BulkClear>,
    /// Server shutdown; running bulk clears are cancelled with it.
    pub shutdown: CancellationToken,
}

/// Build the HTTP + WebSocket router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stats", get(http::handle_stats))
        .route("/api/topics", get(http::handle_list_topics))
        .route(
            "/api/topics/{*topic}",
            get(http::handle_topic_messages).delete(http::handle_clear_topic),
        )
        .route("/api/message/{id}", get(http::handle_message_by_id))
        .route("/api/tree", get(http::handle_tree))
        .route("/api/tree/filter", post(http::handle_set_filter))
        .route("/api/tree/expanded", post(http::handle_set_expanded))
        .route("/api/bulk-clear", post(http::handle_bulk_clear))
        .route("/ws", get(ws::handle_ws))
        .with_state(state)
}

/// Inspector HTTP + WebSocket API server. Returns once `state.shutdown` fires.
pub async fn run(port: u16, state: AppState) -> Result<(), String> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;
    tracing::info!(port, "api server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}
