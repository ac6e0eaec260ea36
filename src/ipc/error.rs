use crate::error::{ServiceError, ServiceResult};
use serde_json::json;
use tracing::{debug, error};

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn service_err(id: &str, e: &ServiceError) -> serde_json::Value {
    match e {
        ServiceError::Database(_) | ServiceError::Internal(_) => {
            error!(request_id = id, error = %e, "request failed");
        }
        _ => debug!(request_id = id, code = e.code(), error = %e, "request rejected"),
    }
    err(id, e.code(), e.to_string(), e.details())
}

pub fn respond(id: &str, result: ServiceResult<serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => service_err(id, &e),
    }
}
