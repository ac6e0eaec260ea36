use crate::error::{ServiceError, ServiceResult};
use crate::identity::{self, Identity};
use crate::ipc::types::AppState;
use rusqlite::Connection;

pub fn required_str<'a>(params: &'a serde_json::Value, key: &str) -> ServiceResult<&'a str> {
    optional_str(params, key).ok_or_else(|| ServiceError::validation(format!("missing {}", key)))
}

/// A string param, trimmed. Empty strings count as absent.
pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Marks arrive either as a JSON number or as the raw text of a form field.
pub fn parse_marks(params: &serde_json::Value) -> ServiceResult<f64> {
    match params.get("marks") {
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ServiceError::validation("marks must be a number")),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ServiceError::validation(format!("marks is not a number: {}", s))),
        Some(_) => Err(ServiceError::validation("marks must be a number")),
        None => Err(ServiceError::validation("missing marks")),
    }
}

pub fn conn(state: &AppState) -> ServiceResult<&Connection> {
    state.db.as_ref().ok_or(ServiceError::NoWorkspace)
}

/// Resolve `params.actorUserId` into the caller's identity.
pub fn actor(conn: &Connection, params: &serde_json::Value) -> ServiceResult<Identity> {
    let user_id = required_str(params, "actorUserId")?;
    identity::resolve(conn, user_id)
}
