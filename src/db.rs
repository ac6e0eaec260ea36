use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DB_FILE_NAME: &str = "srms.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!("failed to create workspace {}", workspace.to_string_lossy())
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.busy_timeout(busy_timeout)?;
    init_schema(&conn)?;
    info!(path = %db_path.to_string_lossy(), "workspace database opened");
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('student', 'teacher', 'hod', 'admin')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            roll_number TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            department_id TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            department_id TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hods(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            department_id TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            department_id TEXT NOT NULL,
            teacher_id TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_department ON courses(department_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            marks REAL NOT NULL,
            grade TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            UNIQUE(student_id, course_id, semester_id)
        )",
        [],
    )?;

    // Workspaces written before results carried timestamps or a uniqueness
    // constraint are upgraded in place.
    ensure_results_timestamps(conn)?;
    ensure_results_unique_triple(conn)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student_semester ON results(student_id, semester_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_course ON results(course_id)",
        [],
    )?;

    Ok(())
}

fn ensure_results_timestamps(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "results", "created_at")? {
        conn.execute(
            "ALTER TABLE results ADD COLUMN created_at TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    if !table_has_column(conn, "results", "updated_at")? {
        conn.execute(
            "ALTER TABLE results ADD COLUMN updated_at TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    Ok(())
}

fn ensure_results_unique_triple(conn: &Connection) -> anyhow::Result<()> {
    if has_unique_index_on(conn, "results", &["student_id", "course_id", "semester_id"])? {
        return Ok(());
    }

    // Keep the most recently written row per triple; rowid breaks ties.
    let removed = conn.execute(
        "DELETE FROM results
         WHERE rowid NOT IN (
           SELECT rowid FROM (
             SELECT rowid,
                    ROW_NUMBER() OVER (
                      PARTITION BY student_id, course_id, semester_id
                      ORDER BY updated_at DESC, rowid DESC
                    ) AS rn
             FROM results
           )
           WHERE rn = 1
         )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX ux_results_triple ON results(student_id, course_id, semester_id)",
        [],
    )?;
    info!(removed, "results upgraded with unique (student, course, semester) index");
    Ok(())
}

fn has_unique_index_on(conn: &Connection, table: &str, columns: &[&str]) -> anyhow::Result<bool> {
    let mut list = conn.prepare(&format!("PRAGMA index_list({})", table))?;
    let unique_indexes = list
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: i64 = row.get(2)?;
            Ok((name, unique != 0))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (name, unique) in unique_indexes {
        if !unique {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info('{}')", name))?;
        let mut cols = info
            .query_map([], |row| row.get::<_, String>(2))?
            .collect::<Result<Vec<_>, _>>()?;
        cols.sort();
        let mut wanted: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        wanted.sort();
        if cols == wanted {
            return Ok(true);
        }
    }
    Ok(false)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
pub(crate) fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_schema_has_unique_result_triple() {
        let conn = test_conn();
        assert!(has_unique_index_on(
            &conn,
            "results",
            &["student_id", "course_id", "semester_id"]
        )
        .expect("index lookup"));
    }

    #[test]
    fn init_schema_is_idempotent() {
        let conn = test_conn();
        init_schema(&conn).expect("second init");
    }

    #[test]
    fn legacy_duplicate_results_are_collapsed() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE results(
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                semester_id TEXT NOT NULL,
                marks REAL NOT NULL,
                grade TEXT NOT NULL
            )",
            [],
        )
        .expect("legacy table");
        for (id, sid, marks, grade) in [
            ("r1", "s1", 40.0, "F"),
            ("r2", "s1", 72.0, "B+"),
            ("r3", "s1", 91.0, "A+"),
            ("r4", "s2", 55.0, "C"),
        ] {
            conn.execute(
                "INSERT INTO results(id, student_id, course_id, semester_id, marks, grade)
                 VALUES(?, ?, 'c1', 'sem1', ?, ?)",
                (id, sid, marks, grade),
            )
            .expect("legacy row");
        }

        init_schema(&conn).expect("upgrade");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM results", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 2);
        let survivor: (String, f64) = conn
            .query_row(
                "SELECT id, marks FROM results WHERE student_id = 's1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("survivor");
        assert_eq!(survivor, ("r3".to_string(), 91.0));

        let dup = conn.execute(
            "INSERT INTO results(id, student_id, course_id, semester_id, marks, grade, created_at, updated_at)
             VALUES('r5', 's2', 'c1', 'sem1', 10, 'F', '', '')",
            [],
        );
        assert!(dup.is_err(), "unique index should reject duplicate triple");
    }
}
