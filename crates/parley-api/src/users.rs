use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};

use parley_gateway::registry::MAX_IDENTITY_LEN;
use parley_types::RegisteredUser;
use parley_types::api::{CreateUserRequest, UserSummary};

use crate::error::ApiError;
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

/// GET /api/users — every registered account and its live connection, if any.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let store = state.store.clone();
    let users = tokio::task::spawn_blocking(move || store.list_users())
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal("Failed to fetch users")
        })?
        .map_err(|e| {
            error!("Listing users failed: {:#}", e);
            ApiError::Internal("Failed to fetch users")
        })?;

    Ok(Json(
        users
            .into_iter()
            .map(|u| UserSummary {
                username: u.username,
                connection_id: u.connection_id,
            })
            .collect(),
    ))
}

/// POST /api/users — create a durable, password-bearing account.
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    let username = req.username.trim().to_string();
    if username.is_empty() || username.chars().count() > MAX_IDENTITY_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be 1 to {} characters",
            MAX_IDENTITY_LEN
        )));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal("Failed to create user")
        })?
        .to_string();

    let store = state.store.clone();
    let name = username.clone();
    let created = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<RegisteredUser>> {
        // Check if username is taken
        if store.find_user(&name)?.is_some() {
            return Ok(None);
        }
        store.create_user(&name, &password_hash).map(Some)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal("Failed to create user")
    })?
    .map_err(|e| {
        error!("Creating user failed: {:#}", e);
        ApiError::Internal("Failed to create user")
    })?;

    let Some(user) = created else {
        return Err(ApiError::Conflict(format!("username '{}' is taken", username)));
    };

    info!("Registered account {}", user.username);
    Ok((
        StatusCode::CREATED,
        Json(UserSummary {
            username: user.username,
            connection_id: user.connection_id,
        }),
    ))
}
