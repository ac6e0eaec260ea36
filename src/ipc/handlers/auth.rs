use crate::error::{ServiceError, ServiceResult};
use crate::identity::{self, Registration};
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::models::Role;
use serde_json::json;

fn parse_role(params: &serde_json::Value) -> ServiceResult<Role> {
    required_str(params, "role")?
        .parse::<Role>()
        .map_err(ServiceError::Validation)
}

fn handle_admin_bootstrap(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    let username = required_str(&req.params, "username")?;
    // Passwords are taken verbatim; surrounding whitespace is significant.
    let password = req.params.get("password").and_then(|v| v.as_str()).unwrap_or("");
    let admin = identity::bootstrap_admin(conn, &state.hasher, username, password)?;
    Ok(json!({ "userId": admin.user.id, "identity": admin }))
}

fn handle_auth_login(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    let role = parse_role(&req.params)?;
    let username = required_str(&req.params, "username")?;
    let password = req.params.get("password").and_then(|v| v.as_str()).unwrap_or("");
    let who = identity::authenticate(conn, &state.hasher, role, username, password)?;
    Ok(json!({ "userId": who.user.id, "identity": who }))
}

fn handle_users_register(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    actor(conn, &req.params)?.require_admin()?;

    let role = parse_role(&req.params)?;
    let full_name = match role {
        Role::Admin => optional_str(&req.params, "fullName").unwrap_or(""),
        _ => required_str(&req.params, "fullName")?,
    };
    let registered = identity::register_user(
        conn,
        &state.hasher,
        &Registration {
            username: required_str(&req.params, "username")?,
            password: req.params.get("password").and_then(|v| v.as_str()).unwrap_or(""),
            role,
            full_name,
            roll_number: optional_str(&req.params, "rollNumber"),
            department_id: optional_str(&req.params, "departmentId"),
        },
    )?;
    Ok(json!({ "userId": registered.user.id, "identity": registered }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "admin.bootstrap" => handle_admin_bootstrap(state, req),
        "auth.login" => handle_auth_login(state, req),
        "users.register" => handle_users_register(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
