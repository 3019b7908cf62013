use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Machine-readable error kind carried in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidIdentity,
    InvalidPayload,
    NotFound,
    PersistenceFailure,
}

/// Body of the `error` server event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("message {0} not found")]
    NotFound(Uuid),

    #[error("failed to {operation}: {detail}")]
    Persistence { operation: &'static str, detail: String },
}

impl ChatError {
    pub fn persistence(operation: &'static str, err: impl Display) -> Self {
        Self::Persistence {
            operation,
            detail: err.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidIdentity(_) => ErrorCode::InvalidIdentity,
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Persistence { .. } => ErrorCode::PersistenceFailure,
        }
    }

    /// Convert into the payload sent back to the originating connection.
    pub fn to_payload(&self) -> ErrorPayload {
        let (error, detail) = match self {
            Self::InvalidIdentity(detail) => ("Invalid username provided".to_string(), detail.clone()),
            Self::InvalidPayload(detail) => ("Invalid payload".to_string(), detail.clone()),
            Self::NotFound(id) => ("Message not found".to_string(), id.to_string()),
            Self::Persistence { operation, detail } => (format!("Failed to {operation}"), detail.clone()),
        };
        ErrorPayload {
            code: self.code(),
            error,
            detail: Some(detail).filter(|d| !d.is_empty()),
        }
    }
}
