//! Row-level access to the workspace tables: get-by-id, find-by-exact-match,
//! insert and update-in-place. No authorisation happens here.

use crate::error::{is_unique_violation, ServiceError, ServiceResult};
use crate::models::{Course, Department, Hod, Role, Semester, Student, Teacher, User};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn unique_or_db(e: rusqlite::Error, what: impl FnOnce() -> String) -> ServiceError {
    if is_unique_violation(&e) {
        ServiceError::Conflict(what())
    } else {
        ServiceError::Database(e)
    }
}

fn require_non_empty(field: &str, value: &str) -> ServiceResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ServiceError::validation(format!("{} must not be empty", field)));
    }
    Ok(v.to_string())
}

// ---- users ----

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<(User, String)> {
    let role_text: String = row.get(2)?;
    let role = role_text.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    Ok((
        User {
            id: row.get(0)?,
            username: row.get(1)?,
            role,
            created_at: row.get(4)?,
        },
        row.get(3)?,
    ))
}

/// Returns the user together with their stored password hash.
pub fn find_user_by_username(conn: &Connection, username: &str) -> ServiceResult<Option<(User, String)>> {
    Ok(conn
        .query_row(
            "SELECT id, username, role, password_hash, created_at FROM users WHERE username = ?",
            [username],
            user_from_row,
        )
        .optional()?)
}

pub fn get_user(conn: &Connection, user_id: &str) -> ServiceResult<Option<User>> {
    Ok(conn
        .query_row(
            "SELECT id, username, role, password_hash, created_at FROM users WHERE id = ?",
            [user_id],
            user_from_row,
        )
        .optional()?
        .map(|(u, _)| u))
}

pub fn count_users_with_role(conn: &Connection, role: Role) -> ServiceResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = ?",
        [role.as_str()],
        |r| r.get(0),
    )?)
}

pub fn insert_user(conn: &Connection, username: &str, password_hash: &str, role: Role) -> ServiceResult<User> {
    let username = require_non_empty("username", username)?;
    let user = User {
        id: new_id(),
        username,
        role,
        created_at: now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO users(id, username, password_hash, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (&user.id, &user.username, password_hash, role.as_str(), &user.created_at),
    )
    .map_err(|e| unique_or_db(e, || format!("username already taken: {}", user.username)))?;
    Ok(user)
}

// ---- departments ----

pub fn insert_department(conn: &Connection, name: &str) -> ServiceResult<Department> {
    let dept = Department {
        id: new_id(),
        name: require_non_empty("name", name)?,
    };
    conn.execute(
        "INSERT INTO departments(id, name) VALUES(?, ?)",
        (&dept.id, &dept.name),
    )
    .map_err(|e| unique_or_db(e, || format!("department already exists: {}", dept.name)))?;
    Ok(dept)
}

pub fn get_department(conn: &Connection, id: &str) -> ServiceResult<Option<Department>> {
    Ok(conn
        .query_row("SELECT id, name FROM departments WHERE id = ?", [id], |r| {
            Ok(Department {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .optional()?)
}

pub fn list_departments(conn: &Connection) -> ServiceResult<Vec<Department>> {
    let mut stmt = conn.prepare("SELECT id, name FROM departments ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Department {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn require_department(conn: &Connection, id: Option<&str>) -> ServiceResult<()> {
    if let Some(id) = id {
        if get_department(conn, id)?.is_none() {
            return Err(ServiceError::not_found("department", id));
        }
    }
    Ok(())
}

// ---- semesters ----

pub fn insert_semester(conn: &Connection, name: &str) -> ServiceResult<Semester> {
    let sem = Semester {
        id: new_id(),
        name: require_non_empty("name", name)?,
    };
    conn.execute(
        "INSERT INTO semesters(id, name) VALUES(?, ?)",
        (&sem.id, &sem.name),
    )
    .map_err(|e| unique_or_db(e, || format!("semester already exists: {}", sem.name)))?;
    Ok(sem)
}

pub fn get_semester(conn: &Connection, id: &str) -> ServiceResult<Option<Semester>> {
    Ok(conn
        .query_row("SELECT id, name FROM semesters WHERE id = ?", [id], |r| {
            Ok(Semester {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .optional()?)
}

pub fn list_semesters(conn: &Connection) -> ServiceResult<Vec<Semester>> {
    let mut stmt = conn.prepare("SELECT id, name FROM semesters ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Semester {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---- students ----

const STUDENT_COLUMNS: &str = "id, user_id, roll_number, full_name, department_id";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        user_id: r.get(1)?,
        roll_number: r.get(2)?,
        full_name: r.get(3)?,
        department_id: r.get(4)?,
    })
}

pub fn insert_student(
    conn: &Connection,
    user_id: &str,
    roll_number: &str,
    full_name: &str,
    department_id: Option<&str>,
) -> ServiceResult<Student> {
    require_department(conn, department_id)?;
    let student = Student {
        id: new_id(),
        user_id: user_id.to_string(),
        roll_number: require_non_empty("rollNumber", roll_number)?,
        full_name: require_non_empty("fullName", full_name)?,
        department_id: department_id.map(str::to_string),
    };
    conn.execute(
        "INSERT INTO students(id, user_id, roll_number, full_name, department_id) VALUES(?, ?, ?, ?, ?)",
        (
            &student.id,
            &student.user_id,
            &student.roll_number,
            &student.full_name,
            &student.department_id,
        ),
    )
    .map_err(|e| {
        unique_or_db(e, || {
            format!("roll number already registered: {}", student.roll_number)
        })
    })?;
    Ok(student)
}

pub fn get_student(conn: &Connection, id: &str) -> ServiceResult<Option<Student>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
            [id],
            student_from_row,
        )
        .optional()?)
}

pub fn find_student_by_roll(conn: &Connection, roll_number: &str) -> ServiceResult<Option<Student>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM students WHERE roll_number = ?", STUDENT_COLUMNS),
            [roll_number.trim()],
            student_from_row,
        )
        .optional()?)
}

pub fn find_student_by_user(conn: &Connection, user_id: &str) -> ServiceResult<Option<Student>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM students WHERE user_id = ?", STUDENT_COLUMNS),
            [user_id],
            student_from_row,
        )
        .optional()?)
}

pub fn list_students(conn: &Connection, department_id: Option<&str>) -> ServiceResult<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students
         WHERE (?1 IS NULL OR department_id = ?1)
         ORDER BY roll_number",
        STUDENT_COLUMNS
    ))?;
    let rows = stmt
        .query_map([department_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---- teachers / hods ----

fn teacher_from_row(r: &Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: r.get(0)?,
        user_id: r.get(1)?,
        full_name: r.get(2)?,
        department_id: r.get(3)?,
    })
}

fn hod_from_row(r: &Row<'_>) -> rusqlite::Result<Hod> {
    Ok(Hod {
        id: r.get(0)?,
        user_id: r.get(1)?,
        full_name: r.get(2)?,
        department_id: r.get(3)?,
    })
}

pub fn insert_teacher(
    conn: &Connection,
    user_id: &str,
    full_name: &str,
    department_id: Option<&str>,
) -> ServiceResult<Teacher> {
    require_department(conn, department_id)?;
    let teacher = Teacher {
        id: new_id(),
        user_id: user_id.to_string(),
        full_name: require_non_empty("fullName", full_name)?,
        department_id: department_id.map(str::to_string),
    };
    conn.execute(
        "INSERT INTO teachers(id, user_id, full_name, department_id) VALUES(?, ?, ?, ?)",
        (
            &teacher.id,
            &teacher.user_id,
            &teacher.full_name,
            &teacher.department_id,
        ),
    )
    .map_err(|e| unique_or_db(e, || "user already has a teacher record".to_string()))?;
    Ok(teacher)
}

pub fn get_teacher(conn: &Connection, id: &str) -> ServiceResult<Option<Teacher>> {
    Ok(conn
        .query_row(
            "SELECT id, user_id, full_name, department_id FROM teachers WHERE id = ?",
            [id],
            teacher_from_row,
        )
        .optional()?)
}

pub fn find_teacher_by_user(conn: &Connection, user_id: &str) -> ServiceResult<Option<Teacher>> {
    Ok(conn
        .query_row(
            "SELECT id, user_id, full_name, department_id FROM teachers WHERE user_id = ?",
            [user_id],
            teacher_from_row,
        )
        .optional()?)
}

pub fn insert_hod(
    conn: &Connection,
    user_id: &str,
    full_name: &str,
    department_id: Option<&str>,
) -> ServiceResult<Hod> {
    require_department(conn, department_id)?;
    let hod = Hod {
        id: new_id(),
        user_id: user_id.to_string(),
        full_name: require_non_empty("fullName", full_name)?,
        department_id: department_id.map(str::to_string),
    };
    conn.execute(
        "INSERT INTO hods(id, user_id, full_name, department_id) VALUES(?, ?, ?, ?)",
        (&hod.id, &hod.user_id, &hod.full_name, &hod.department_id),
    )
    .map_err(|e| unique_or_db(e, || "user already has a HOD record".to_string()))?;
    Ok(hod)
}

pub fn find_hod_by_user(conn: &Connection, user_id: &str) -> ServiceResult<Option<Hod>> {
    Ok(conn
        .query_row(
            "SELECT id, user_id, full_name, department_id FROM hods WHERE user_id = ?",
            [user_id],
            hod_from_row,
        )
        .optional()?)
}

// ---- courses ----

const COURSE_COLUMNS: &str = "id, code, title, department_id, teacher_id";

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: r.get(0)?,
        code: r.get(1)?,
        title: r.get(2)?,
        department_id: r.get(3)?,
        teacher_id: r.get(4)?,
    })
}

pub fn insert_course(
    conn: &Connection,
    code: &str,
    title: &str,
    department_id: &str,
    teacher_id: Option<&str>,
) -> ServiceResult<Course> {
    require_department(conn, Some(department_id))?;
    if let Some(tid) = teacher_id {
        if get_teacher(conn, tid)?.is_none() {
            return Err(ServiceError::not_found("teacher", tid));
        }
    }
    let course = Course {
        id: new_id(),
        code: require_non_empty("code", code)?,
        title: require_non_empty("title", title)?,
        department_id: department_id.to_string(),
        teacher_id: teacher_id.map(str::to_string),
    };
    conn.execute(
        "INSERT INTO courses(id, code, title, department_id, teacher_id) VALUES(?, ?, ?, ?, ?)",
        (
            &course.id,
            &course.code,
            &course.title,
            &course.department_id,
            &course.teacher_id,
        ),
    )
    .map_err(|e| unique_or_db(e, || format!("course code already exists: {}", course.code)))?;
    Ok(course)
}

pub fn get_course(conn: &Connection, id: &str) -> ServiceResult<Option<Course>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS),
            [id],
            course_from_row,
        )
        .optional()?)
}

pub fn list_courses(conn: &Connection, department_id: Option<&str>) -> ServiceResult<Vec<Course>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM courses
         WHERE (?1 IS NULL OR department_id = ?1)
         ORDER BY code",
        COURSE_COLUMNS
    ))?;
    let rows = stmt
        .query_map([department_id], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_courses_for_teacher(conn: &Connection, teacher_id: &str) -> ServiceResult<Vec<Course>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM courses WHERE teacher_id = ? ORDER BY code",
        COURSE_COLUMNS
    ))?;
    let rows = stmt
        .query_map([teacher_id], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Reassigns (or clears) the teacher of a course in place.
pub fn set_course_teacher(conn: &Connection, course_id: &str, teacher_id: Option<&str>) -> ServiceResult<Course> {
    if let Some(tid) = teacher_id {
        if get_teacher(conn, tid)?.is_none() {
            return Err(ServiceError::not_found("teacher", tid));
        }
    }
    let changed = conn.execute(
        "UPDATE courses SET teacher_id = ? WHERE id = ?",
        (teacher_id, course_id),
    )?;
    if changed == 0 {
        return Err(ServiceError::not_found("course", course_id));
    }
    get_course(conn, course_id)?.ok_or_else(|| ServiceError::not_found("course", course_id))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub struct Campus {
        pub department: Department,
        pub other_department: Department,
        pub teacher: Teacher,
        pub student: Student,
        pub outsider: Student,
        pub course: Course,
        pub semester: Semester,
        pub other_semester: Semester,
    }

    /// D1 with teacher T1, student S1 and course C1 (taught by T1); D2 with
    /// student S2. Two semesters.
    pub fn campus(conn: &Connection) -> Campus {
        let department = insert_department(conn, "Computer Science").expect("dept");
        let other_department = insert_department(conn, "Mathematics").expect("dept2");

        let tu = insert_user(conn, "t1", "x", Role::Teacher).expect("teacher user");
        let teacher =
            insert_teacher(conn, &tu.id, "Teacher One", Some(&department.id)).expect("teacher");

        let su = insert_user(conn, "s1", "x", Role::Student).expect("student user");
        let student = insert_student(conn, &su.id, "S001", "Student One", Some(&department.id))
            .expect("student");
        let ou = insert_user(conn, "s2", "x", Role::Student).expect("outsider user");
        let outsider = insert_student(conn, &ou.id, "S002", "Student Two", Some(&other_department.id))
            .expect("outsider");

        let course = insert_course(conn, "C001", "Database Systems", &department.id, Some(&teacher.id))
            .expect("course");
        let semester = insert_semester(conn, "Semester 1").expect("sem1");
        let other_semester = insert_semester(conn, "Semester 2").expect("sem2");

        Campus {
            department,
            other_department,
            teacher,
            student,
            outsider,
            course,
            semester,
            other_semester,
        }
    }
}
