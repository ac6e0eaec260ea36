use crate::error::{ServiceError, ServiceResult};
use crate::identity::Profile;
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;
use tracing::info;

fn handle_departments_list(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    actor(conn, &req.params)?;
    Ok(json!({ "departments": store::list_departments(conn)? }))
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    actor(conn, &req.params)?.require_admin()?;
    let department = store::insert_department(conn, required_str(&req.params, "name")?)?;
    info!(department_id = %department.id, name = %department.name, "department created");
    Ok(json!({ "department": department }))
}

fn handle_semesters_list(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    actor(conn, &req.params)?;
    Ok(json!({ "semesters": store::list_semesters(conn)? }))
}

fn handle_semesters_create(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    actor(conn, &req.params)?.require_admin()?;
    let semester = store::insert_semester(conn, required_str(&req.params, "name")?)?;
    info!(semester_id = %semester.id, name = %semester.name, "semester created");
    Ok(json!({ "semester": semester }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    actor(conn, &req.params)?;
    let courses = store::list_courses(conn, optional_str(&req.params, "departmentId"))?;
    Ok(json!({ "courses": courses }))
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    actor(conn, &req.params)?.require_admin()?;
    let course = store::insert_course(
        conn,
        required_str(&req.params, "code")?,
        required_str(&req.params, "title")?,
        required_str(&req.params, "departmentId")?,
        optional_str(&req.params, "teacherId"),
    )?;
    info!(course_id = %course.id, code = %course.code, "course created");
    Ok(json!({ "course": course }))
}

fn handle_courses_assign_teacher(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    actor(conn, &req.params)?.require_admin()?;
    let course = store::set_course_teacher(
        conn,
        required_str(&req.params, "courseId")?,
        optional_str(&req.params, "teacherId"),
    )?;
    info!(course_id = %course.id, teacher_id = ?course.teacher_id, "course teacher assigned");
    Ok(json!({ "course": course }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    let who = actor(conn, &req.params)?;
    let requested = optional_str(&req.params, "departmentId");
    let department_id = match &who.profile {
        Profile::Admin => requested,
        Profile::Hod(hod) => {
            let Some(own) = hod.department_id.as_deref() else {
                return Err(ServiceError::forbidden("HOD is not attached to a department"));
            };
            if requested.is_some_and(|d| d != own) {
                return Err(ServiceError::forbidden("HODs can only view their own department"));
            }
            Some(own)
        }
        Profile::Student(_) | Profile::Teacher(_) => {
            return Err(ServiceError::forbidden("only admins and HODs can list students"));
        }
    };
    Ok(json!({ "students": store::list_students(conn, department_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "departments.list" => handle_departments_list(state, req),
        "departments.create" => handle_departments_create(state, req),
        "semesters.list" => handle_semesters_list(state, req),
        "semesters.create" => handle_semesters_create(state, req),
        "courses.list" => handle_courses_list(state, req),
        "courses.create" => handle_courses_create(state, req),
        "courses.assignTeacher" => handle_courses_assign_teacher(state, req),
        "students.list" => handle_students_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
