use crate::dashboard::{self, DashboardFilter};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, conn, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::models::Role;
use serde_json::json;

fn handle_dashboard(state: &mut AppState, req: &Request, expected: Role) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    let who = actor(conn, &req.params)?;
    if who.role() != expected {
        return Err(ServiceError::forbidden(format!(
            "the {} dashboard is not available to role {}",
            expected,
            who.role()
        )));
    }
    let filter = DashboardFilter {
        semester_id: optional_str(&req.params, "semesterId"),
        course_id: optional_str(&req.params, "courseId"),
        department_id: optional_str(&req.params, "departmentId"),
    };
    let view = dashboard::open(conn, &who, &filter)?;
    Ok(json!({ "dashboard": view }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let expected = match req.method.as_str() {
        "dashboard.student" => Role::Student,
        "dashboard.teacher" => Role::Teacher,
        "dashboard.hod" => Role::Hod,
        _ => return None,
    };
    Some(respond(&req.id, handle_dashboard(state, req, expected)))
}
