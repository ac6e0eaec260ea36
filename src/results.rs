use crate::error::{is_unique_violation, ServiceError, ServiceResult};
use crate::grading::{grade_for, validate_marks, Grade};
use crate::models::ResultRecord;
use crate::store;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// How the caller names the student: internal id or roll number.
#[derive(Debug, Clone, Copy)]
pub enum StudentRef<'a> {
    Id(&'a str),
    RollNumber(&'a str),
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertInput<'a> {
    pub student: StudentRef<'a>,
    pub course_id: &'a str,
    pub semester_id: &'a str,
    pub marks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct Upserted {
    pub outcome: UpsertOutcome,
    pub result: ResultRecord,
}

const RESULT_COLUMNS: &str =
    "id, student_id, course_id, semester_id, marks, grade, created_at, updated_at";

fn result_from_row(r: &Row<'_>) -> rusqlite::Result<ResultRecord> {
    let grade_text: String = r.get(5)?;
    let grade = grade_text.parse::<Grade>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(ResultRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        semester_id: r.get(3)?,
        marks: r.get(4)?,
        grade,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

pub fn get_result(conn: &Connection, id: &str) -> ServiceResult<Option<ResultRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM results WHERE id = ?", RESULT_COLUMNS),
            [id],
            result_from_row,
        )
        .optional()?)
}

pub fn find_result(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    semester_id: &str,
) -> ServiceResult<Option<ResultRecord>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM results
                 WHERE student_id = ? AND course_id = ? AND semester_id = ?",
                RESULT_COLUMNS
            ),
            (student_id, course_id, semester_id),
            result_from_row,
        )
        .optional()?)
}

fn resolve_student_id(conn: &Connection, student: StudentRef<'_>) -> ServiceResult<String> {
    let found = match student {
        StudentRef::Id(id) => store::get_student(conn, id)?,
        StudentRef::RollNumber(roll) => store::find_student_by_roll(conn, roll)?,
    };
    match (found, student) {
        (Some(s), _) => Ok(s.id),
        (None, StudentRef::Id(id)) => Err(ServiceError::not_found("student", id)),
        (None, StudentRef::RollNumber(roll)) => Err(ServiceError::not_found("student roll", roll)),
    }
}

/// Find-or-create the result for (student, course, semester) and store the
/// grade computed from `marks`. An existing row keeps its id.
///
/// The lookup and the write share one IMMEDIATE transaction. If a concurrent
/// writer still slips a row in first, the unique index rejects our insert and
/// the whole sequence is retried once, which then takes the update path.
pub fn upsert_result(conn: &Connection, input: &UpsertInput<'_>) -> ServiceResult<Upserted> {
    let marks = validate_marks(input.marks).map_err(ServiceError::Validation)?;

    match upsert_once(conn, input, marks) {
        Err(ServiceError::Database(e)) if is_unique_violation(&e) => {
            warn!(
                course_id = input.course_id,
                semester_id = input.semester_id,
                "result insert raced with another writer; retrying"
            );
            match upsert_once(conn, input, marks) {
                Err(ServiceError::Database(e)) if is_unique_violation(&e) => Err(
                    ServiceError::Conflict("result was modified concurrently; try again".to_string()),
                ),
                other => other,
            }
        }
        other => other,
    }
}

fn upsert_once(conn: &Connection, input: &UpsertInput<'_>, marks: f64) -> ServiceResult<Upserted> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let student_id = resolve_student_id(&tx, input.student)?;
    if store::get_course(&tx, input.course_id)?.is_none() {
        return Err(ServiceError::not_found("course", input.course_id));
    }
    if store::get_semester(&tx, input.semester_id)?.is_none() {
        return Err(ServiceError::not_found("semester", input.semester_id));
    }

    let grade = grade_for(marks);
    let now = store::now_rfc3339();
    let existing = find_result(&tx, &student_id, input.course_id, input.semester_id)?;

    let (id, outcome) = match existing.map(|r| r.id) {
        Some(id) => {
            tx.execute(
                "UPDATE results SET marks = ?, grade = ?, updated_at = ? WHERE id = ?",
                (marks, grade.as_str(), &now, &id),
            )?;
            (id, UpsertOutcome::Updated)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO results(id, student_id, course_id, semester_id, marks, grade, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &student_id,
                    input.course_id,
                    input.semester_id,
                    marks,
                    grade.as_str(),
                    &now,
                    &now,
                ),
            )?;
            (id, UpsertOutcome::Created)
        }
    };

    let result = get_result(&tx, &id)?
        .ok_or_else(|| ServiceError::Internal(format!("result {} vanished mid-transaction", id)))?;
    tx.commit()?;

    info!(
        result_id = %result.id,
        student_id = %result.student_id,
        course_id = %result.course_id,
        semester_id = %result.semester_id,
        grade = %result.grade,
        outcome = ?outcome,
        "result stored"
    );
    Ok(Upserted { outcome, result })
}
