use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, error};

use parley_types::api::HistoryQuery;
use parley_types::{Message, NewMessage};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/messages?before=<RFC 3339>&limit=<n>
///
/// Ascending page of public messages strictly older than `before`. An empty
/// array means there is no earlier history.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let limit = state.history.resolve(query.limit);
    let before = query.before;

    // Run blocking DB query off the async runtime
    let store = state.store.clone();
    let messages = tokio::task::spawn_blocking(move || store.query(before, limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal("Failed to fetch messages")
        })?
        .map_err(|e| {
            error!("History query failed: {:#}", e);
            ApiError::Internal("Failed to fetch messages")
        })?;

    debug!("History page before={:?} limit={} -> {} messages", before, limit, messages.len());
    Ok(Json(messages))
}

/// POST /api/messages
///
/// Ingest a public message outside the WebSocket path. Live clients see it as
/// a regular `message` event.
pub async fn create_message(
    State(state): State<AppState>,
    Json(req): Json<NewMessage>,
) -> Result<impl IntoResponse, ApiError> {
    if req.sender.trim().is_empty() {
        return Err(ApiError::BadRequest("sender must not be empty".into()));
    }

    let message = state.gateway.publish(req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
