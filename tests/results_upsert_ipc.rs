use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_srmsd");
    let mut child = Command::new(exe)
        .env_remove("SRMS_WORKSPACE")
        .env("SRMS_PASSWORD_MEMORY_KIB", "8")
        .env("SRMS_PASSWORD_ITERATIONS", "1")
        .env("SRMS_LOG_LEVEL", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn srmsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string();
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "expected error: {}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[allow(dead_code)]
struct Campus {
    admin: String,
    teacher_user: String,
    teacher: String,
    other_teacher_user: String,
    student_user: String,
    student: String,
    outsider: String,
    hod_user: String,
    department: String,
    other_department: String,
    course: String,
    semester: String,
    other_semester: String,
}

fn id_of(value: &serde_json::Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, value))
        .to_string()
}

fn register(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut params = params;
    params["actorUserId"] = json!(admin);
    params["password"] = json!("secret-pass");
    request_ok(stdin, reader, "users.register", params)
}

/// Workspace with two departments, one course in the first, and a user of
/// each role.
fn setup_campus(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Campus {
    let admin = request_ok(
        stdin,
        reader,
        "admin.bootstrap",
        json!({ "username": "admin", "password": "admin-pass" }),
    );
    let admin = id_of(&admin, "/userId");

    let d1 = request_ok(
        stdin,
        reader,
        "departments.create",
        json!({ "actorUserId": admin, "name": "Computer Science" }),
    );
    let d2 = request_ok(
        stdin,
        reader,
        "departments.create",
        json!({ "actorUserId": admin, "name": "Mathematics" }),
    );
    let department = id_of(&d1, "/department/id");
    let other_department = id_of(&d2, "/department/id");

    let sem1 = request_ok(
        stdin,
        reader,
        "semesters.create",
        json!({ "actorUserId": admin, "name": "Semester 1" }),
    );
    let sem2 = request_ok(
        stdin,
        reader,
        "semesters.create",
        json!({ "actorUserId": admin, "name": "Semester 2" }),
    );

    let teacher = register(
        stdin,
        reader,
        &admin,
        json!({ "username": "t1", "role": "teacher", "fullName": "Tara Teacher", "departmentId": department }),
    );
    let other_teacher = register(
        stdin,
        reader,
        &admin,
        json!({ "username": "t2", "role": "teacher", "fullName": "Omar Other", "departmentId": other_department }),
    );
    let student = register(
        stdin,
        reader,
        &admin,
        json!({ "username": "s1", "role": "student", "fullName": "Sam Student", "rollNumber": "S001", "departmentId": department }),
    );
    let outsider = register(
        stdin,
        reader,
        &admin,
        json!({ "username": "s2", "role": "student", "fullName": "Olive Outsider", "rollNumber": "S002", "departmentId": other_department }),
    );
    let hod = register(
        stdin,
        reader,
        &admin,
        json!({ "username": "h1", "role": "hod", "fullName": "Hana Head", "departmentId": department }),
    );

    let teacher_id = id_of(&teacher, "/identity/profile/id");
    let course = request_ok(
        stdin,
        reader,
        "courses.create",
        json!({
            "actorUserId": admin,
            "code": "C001",
            "title": "Database Systems",
            "departmentId": department,
            "teacherId": teacher_id,
        }),
    );

    Campus {
        admin,
        teacher_user: id_of(&teacher, "/userId"),
        teacher: teacher_id,
        other_teacher_user: id_of(&other_teacher, "/userId"),
        student_user: id_of(&student, "/userId"),
        student: id_of(&student, "/identity/profile/id"),
        outsider: id_of(&outsider, "/identity/profile/id"),
        hod_user: id_of(&hod, "/userId"),
        department,
        other_department,
        course: id_of(&course, "/course/id"),
        semester: id_of(&sem1, "/semester/id"),
        other_semester: id_of(&sem2, "/semester/id"),
    }
}

fn upsert(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    actor: &str,
    student: serde_json::Value,
    course: &str,
    semester: &str,
    marks: serde_json::Value,
) -> serde_json::Value {
    let mut params = json!({
        "actorUserId": actor,
        "courseId": course,
        "semesterId": semester,
        "marks": marks,
    });
    if let Some(obj) = student.as_object() {
        for (k, v) in obj {
            params[k] = v.clone();
        }
    }
    request(stdin, reader, "results.upsert", params)
}

#[test]
fn upsert_then_student_dashboard_shows_exactly_that_row() {
    let workspace = temp_dir("srms-upsert-scenario");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let c = setup_campus(&mut stdin, &mut reader);

    let created = upsert(
        &mut stdin,
        &mut reader,
        &c.teacher_user,
        json!({ "studentId": c.student }),
        &c.course,
        &c.semester,
        json!(85),
    );
    assert_eq!(created["ok"], true, "{}", created);
    assert_eq!(created["result"]["outcome"], "created");
    assert_eq!(created["result"]["message"], "Result added");
    assert_eq!(created["result"]["result"]["grade"], "A");
    let result_id = created["result"]["result"]["id"].as_str().expect("id").to_string();

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "dashboard.student",
        json!({ "actorUserId": c.student_user, "semesterId": c.semester }),
    );
    let rows = dash["dashboard"]["results"].as_array().expect("results");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], result_id.as_str());
    assert_eq!(rows[0]["courseCode"], "C001");
    assert_eq!(rows[0]["semesterName"], "Semester 1");
    assert_eq!(rows[0]["marks"], 85.0);
    assert_eq!(rows[0]["grade"], "A");

    let other = request_ok(
        &mut stdin,
        &mut reader,
        "dashboard.student",
        json!({ "actorUserId": c.student_user, "semesterId": c.other_semester }),
    );
    assert_eq!(other["dashboard"]["results"].as_array().map(Vec::len), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn repeated_upserts_update_in_place() {
    let workspace = temp_dir("srms-upsert-update");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let c = setup_campus(&mut stdin, &mut reader);

    let first = upsert(
        &mut stdin,
        &mut reader,
        &c.teacher_user,
        json!({ "rollNumber": "S001" }),
        &c.course,
        &c.semester,
        json!("70"),
    );
    assert_eq!(first["result"]["outcome"], "created", "{}", first);
    assert_eq!(first["result"]["result"]["grade"], "B+");

    let same = upsert(
        &mut stdin,
        &mut reader,
        &c.teacher_user,
        json!({ "rollNumber": "S001" }),
        &c.course,
        &c.semester,
        json!("70"),
    );
    assert_eq!(same["result"]["outcome"], "updated");
    assert_eq!(same["result"]["result"]["id"], first["result"]["result"]["id"]);

    let second = upsert(
        &mut stdin,
        &mut reader,
        &c.admin,
        json!({ "studentId": c.student }),
        &c.course,
        &c.semester,
        json!(95),
    );
    assert_eq!(second["result"]["outcome"], "updated");
    assert_eq!(second["result"]["message"], "Result updated");
    assert_eq!(second["result"]["result"]["id"], first["result"]["result"]["id"]);
    assert_eq!(second["result"]["result"]["marks"], 95.0);
    assert_eq!(second["result"]["result"]["grade"], "A+");

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "dashboard.teacher",
        json!({ "actorUserId": c.teacher_user }),
    );
    let rows = dash["dashboard"]["results"].as_array().expect("results");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["grade"], "A+");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_upserts_are_rejected_with_stable_codes() {
    let workspace = temp_dir("srms-upsert-errors");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let early = upsert(
        &mut stdin,
        &mut reader,
        "nobody",
        json!({ "studentId": "x" }),
        "c",
        "s",
        json!(50),
    );
    assert_eq!(error_code(&early), "no_workspace");

    request_ok(
        &mut stdin,
        &mut reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let c = setup_campus(&mut stdin, &mut reader);

    for marks in [json!(101), json!(-1), json!("abc"), json!(""), json!("NaN"), json!(null)] {
        let resp = upsert(
            &mut stdin,
            &mut reader,
            &c.teacher_user,
            json!({ "studentId": c.student }),
            &c.course,
            &c.semester,
            marks.clone(),
        );
        assert_eq!(error_code(&resp), "bad_params", "marks={}", marks);
    }

    let missing_roll = upsert(
        &mut stdin,
        &mut reader,
        &c.teacher_user,
        json!({ "rollNumber": "S999" }),
        &c.course,
        &c.semester,
        json!(60),
    );
    assert_eq!(error_code(&missing_roll), "not_found");

    let missing_semester = upsert(
        &mut stdin,
        &mut reader,
        &c.teacher_user,
        json!({ "studentId": c.student }),
        &c.course,
        "no-such-semester",
        json!(60),
    );
    assert_eq!(error_code(&missing_semester), "not_found");

    let wrong_teacher = upsert(
        &mut stdin,
        &mut reader,
        &c.other_teacher_user,
        json!({ "studentId": c.student }),
        &c.course,
        &c.semester,
        json!(60),
    );
    assert_eq!(error_code(&wrong_teacher), "forbidden");

    for actor in [&c.student_user, &c.hod_user] {
        let resp = upsert(
            &mut stdin,
            &mut reader,
            actor,
            json!({ "studentId": c.student }),
            &c.course,
            &c.semester,
            json!(60),
        );
        assert_eq!(error_code(&resp), "forbidden");
    }

    let unknown_actor = upsert(
        &mut stdin,
        &mut reader,
        "ghost",
        json!({ "studentId": c.student }),
        &c.course,
        &c.semester,
        json!(60),
    );
    assert_eq!(error_code(&unknown_actor), "not_found");

    // Nothing above may have written a row.
    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "dashboard.teacher",
        json!({ "actorUserId": c.teacher_user }),
    );
    assert_eq!(dash["dashboard"]["results"].as_array().map(Vec::len), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
