use crate::error::{ServiceError, ServiceResult};
use crate::grading::Grade;
use crate::identity::{Identity, Profile};
use crate::models::{Course, Department, Hod, ResultView, Semester, Student, Teacher};
use crate::store;
use rusqlite::{Connection, Row};
use serde::Serialize;

const VIEW_SELECT: &str = "SELECT r.id, r.student_id, s.roll_number, s.full_name,
        r.course_id, c.code, c.title, r.semester_id, sem.name, r.marks, r.grade
     FROM results r
     JOIN students s ON s.id = r.student_id
     JOIN courses c ON c.id = r.course_id
     JOIN semesters sem ON sem.id = r.semester_id";

const VIEW_ORDER: &str = "ORDER BY c.code, s.roll_number, sem.name";

fn view_from_row(r: &Row<'_>) -> rusqlite::Result<ResultView> {
    let grade_text: String = r.get(10)?;
    let grade = grade_text.parse::<Grade>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(ResultView {
        id: r.get(0)?,
        student_id: r.get(1)?,
        roll_number: r.get(2)?,
        student_name: r.get(3)?,
        course_id: r.get(4)?,
        course_code: r.get(5)?,
        course_title: r.get(6)?,
        semester_id: r.get(7)?,
        semester_name: r.get(8)?,
        marks: r.get(9)?,
        grade,
    })
}

fn query_views<P: rusqlite::Params>(conn: &Connection, filter: &str, params: P) -> ServiceResult<Vec<ResultView>> {
    let sql = format!("{} WHERE {} {}", VIEW_SELECT, filter, VIEW_ORDER);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, view_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A student's own results in one semester.
pub fn student_results(conn: &Connection, student_id: &str, semester_id: &str) -> ServiceResult<Vec<ResultView>> {
    query_views(
        conn,
        "r.student_id = ?1 AND r.semester_id = ?2",
        (student_id, semester_id),
    )
}

/// Results for every course the teacher is assigned to, optionally narrowed.
pub fn teacher_results(
    conn: &Connection,
    teacher_id: &str,
    course_id: Option<&str>,
    semester_id: Option<&str>,
) -> ServiceResult<Vec<ResultView>> {
    query_views(
        conn,
        "c.teacher_id = ?1
         AND (?2 IS NULL OR r.course_id = ?2)
         AND (?3 IS NULL OR r.semester_id = ?3)",
        (teacher_id, course_id, semester_id),
    )
}

/// Results of students belonging to the department, for one semester.
pub fn department_results(conn: &Connection, department_id: &str, semester_id: &str) -> ServiceResult<Vec<ResultView>> {
    query_views(
        conn,
        "s.department_id = ?1 AND r.semester_id = ?2",
        (department_id, semester_id),
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DashboardFilter<'a> {
    pub semester_id: Option<&'a str>,
    pub course_id: Option<&'a str>,
    pub department_id: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDashboard {
    pub student: Student,
    pub semesters: Vec<Semester>,
    pub semester: Option<Semester>,
    pub results: Vec<ResultView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherDashboard {
    pub teacher: Teacher,
    pub courses: Vec<Course>,
    pub semesters: Vec<Semester>,
    pub results: Vec<ResultView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HodDashboard {
    pub hod: Hod,
    pub department: Department,
    pub semesters: Vec<Semester>,
    pub semester: Option<Semester>,
    pub results: Vec<ResultView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Dashboard {
    Student(StudentDashboard),
    Teacher(TeacherDashboard),
    Hod(HodDashboard),
}

fn require_semester(conn: &Connection, semester_id: Option<&str>) -> ServiceResult<Option<Semester>> {
    match semester_id {
        Some(id) => store::get_semester(conn, id)?
            .map(Some)
            .ok_or_else(|| ServiceError::not_found("semester", id)),
        None => Ok(None),
    }
}

/// Open the dashboard matching the caller's role.
pub fn open(conn: &Connection, identity: &Identity, filter: &DashboardFilter<'_>) -> ServiceResult<Dashboard> {
    match &identity.profile {
        Profile::Student(student) => student_dashboard(conn, student, filter).map(Dashboard::Student),
        Profile::Teacher(teacher) => teacher_dashboard(conn, teacher, filter).map(Dashboard::Teacher),
        Profile::Hod(hod) => hod_dashboard(conn, hod, filter).map(Dashboard::Hod),
        Profile::Admin => Err(ServiceError::forbidden("admins have no dashboard")),
    }
}

fn student_dashboard(
    conn: &Connection,
    student: &Student,
    filter: &DashboardFilter<'_>,
) -> ServiceResult<StudentDashboard> {
    let semester = require_semester(conn, filter.semester_id)?;
    let results = match &semester {
        Some(sem) => student_results(conn, &student.id, &sem.id)?,
        None => Vec::new(),
    };
    Ok(StudentDashboard {
        student: student.clone(),
        semesters: store::list_semesters(conn)?,
        semester,
        results,
    })
}

fn teacher_dashboard(
    conn: &Connection,
    teacher: &Teacher,
    filter: &DashboardFilter<'_>,
) -> ServiceResult<TeacherDashboard> {
    if let Some(course_id) = filter.course_id {
        let course = store::get_course(conn, course_id)?
            .ok_or_else(|| ServiceError::not_found("course", course_id))?;
        if course.teacher_id.as_deref() != Some(teacher.id.as_str()) {
            return Err(ServiceError::forbidden("course is not assigned to this teacher"));
        }
    }
    require_semester(conn, filter.semester_id)?;
    Ok(TeacherDashboard {
        teacher: teacher.clone(),
        courses: store::list_courses_for_teacher(conn, &teacher.id)?,
        semesters: store::list_semesters(conn)?,
        results: teacher_results(conn, &teacher.id, filter.course_id, filter.semester_id)?,
    })
}

fn hod_dashboard(conn: &Connection, hod: &Hod, filter: &DashboardFilter<'_>) -> ServiceResult<HodDashboard> {
    let Some(own_department) = hod.department_id.as_deref() else {
        return Err(ServiceError::forbidden("HOD is not attached to a department"));
    };
    if let Some(requested) = filter.department_id {
        if requested != own_department {
            return Err(ServiceError::forbidden("HODs can only view their own department"));
        }
    }
    let department = store::get_department(conn, own_department)?
        .ok_or_else(|| ServiceError::not_found("department", own_department))?;
    let semester = require_semester(conn, filter.semester_id)?;
    let results = match &semester {
        Some(sem) => department_results(conn, &department.id, &sem.id)?,
        None => Vec::new(),
    };
    Ok(HodDashboard {
        hod: hod.clone(),
        department,
        semesters: store::list_semesters(conn)?,
        semester,
        results,
    })
}
