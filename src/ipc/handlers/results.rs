use crate::error::{ServiceError, ServiceResult};
use crate::identity::{Identity, Profile};
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, conn, optional_str, parse_marks, required_str};
use crate::ipc::types::{AppState, Request};
use crate::results::{self, StudentRef, UpsertInput, UpsertOutcome};
use crate::store;
use rusqlite::Connection;
use serde_json::json;

fn authorize_upsert(conn: &Connection, who: &Identity, course_id: &str) -> ServiceResult<()> {
    match &who.profile {
        Profile::Admin => Ok(()),
        Profile::Teacher(teacher) => {
            let course = store::get_course(conn, course_id)?
                .ok_or_else(|| ServiceError::not_found("course", course_id))?;
            if course.teacher_id.as_deref() == Some(teacher.id.as_str()) {
                Ok(())
            } else {
                Err(ServiceError::forbidden("course is not assigned to this teacher"))
            }
        }
        Profile::Student(_) | Profile::Hod(_) => {
            Err(ServiceError::forbidden("only teachers and admins can record results"))
        }
    }
}

fn handle_results_upsert(state: &mut AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = conn(state)?;
    let who = actor(conn, &req.params)?;

    let student = match (
        optional_str(&req.params, "studentId"),
        optional_str(&req.params, "rollNumber"),
    ) {
        (Some(id), _) => StudentRef::Id(id),
        (None, Some(roll)) => StudentRef::RollNumber(roll),
        (None, None) => return Err(ServiceError::validation("missing studentId or rollNumber")),
    };
    let course_id = required_str(&req.params, "courseId")?;
    let semester_id = required_str(&req.params, "semesterId")?;
    let marks = parse_marks(&req.params)?;

    authorize_upsert(conn, &who, course_id)?;

    let upserted = results::upsert_result(
        conn,
        &UpsertInput {
            student,
            course_id,
            semester_id,
            marks,
        },
    )?;
    let message = match upserted.outcome {
        UpsertOutcome::Created => "Result added",
        UpsertOutcome::Updated => "Result updated",
    };
    Ok(json!({
        "outcome": upserted.outcome,
        "message": message,
        "result": upserted.result,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.upsert" => Some(respond(&req.id, handle_results_upsert(state, req))),
        _ => None,
    }
}
