pub mod error;
pub mod history;
pub mod state;
pub mod users;

use axum::{
    Json, Router,
    routing::get,
};
use serde_json::{Value, json};

pub use state::{AppState, AppStateInner, HistoryLimits};

/// HTTP routes under `/api`, plus `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/messages", get(history::get_messages).post(history::create_message))
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
