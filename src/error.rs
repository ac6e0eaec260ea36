use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the service layer. Every variant maps to a stable IPC
/// error code via [`ServiceError::code`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        ServiceError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ServiceError::Forbidden(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Validation(_) => "bad_params",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::NoWorkspace => "no_workspace",
            ServiceError::Database(_) => "db_query_failed",
            ServiceError::Internal(_) => "internal",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ServiceError::NotFound { entity, key } => {
                Some(json!({ "entity": entity, "key": key }))
            }
            _ => None,
        }
    }
}

/// True when `e` is SQLite rejecting a write because of a UNIQUE constraint.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}
