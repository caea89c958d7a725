use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const GENDERS: [&str; 2] = ["male", "female"];
const RELIGIONS: [&str; 2] = ["ISLAM", "CHRISTIANITY"];
const STATUSES: [&str; 3] = ["active", "graduated", "withdrawn"];
const DEPARTMENTS: [&str; 4] = ["GENERAL", "SCIENCE", "ARTS", "COMMERCIAL"];

fn check_enum(value: &str, allowed: &[&str], field: &str) -> Result<(), HandlerErr> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(HandlerErr {
        code: "bad_params",
        message: format!("{} must be one of {}", field, allowed.join(", ")),
        details: Some(json!({ field: value })),
    })
}

fn student_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentNo": r.get::<_, String>(1)?,
        "firstName": r.get::<_, String>(2)?,
        "otherNames": r.get::<_, String>(3)?,
        "dateOfBirth": r.get::<_, String>(4)?,
        "gender": r.get::<_, String>(5)?,
        "religion": r.get::<_, String>(6)?,
        "currentClass": r.get::<_, String>(7)?,
        "department": r.get::<_, String>(8)?,
        "contactEmail": r.get::<_, Option<String>>(9)?,
        "contactPhone": r.get::<_, Option<String>>(10)?,
        "guardianName": r.get::<_, String>(11)?,
        "address": r.get::<_, Option<String>>(12)?,
        "status": r.get::<_, String>(13)?,
        "dateRegistered": r.get::<_, String>(14)?,
    }))
}

const STUDENT_COLUMNS: &str = "id, student_no, first_name, other_names, date_of_birth, gender,
    religion, current_class, department, contact_email, contact_phone, guardian_name, address,
    status, date_registered";

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut sql = format!("SELECT {} FROM students", STUDENT_COLUMNS);
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(class) = get_opt_str(&req.params, "classLevel") {
        clauses.push("current_class = ?");
        binds.push(Value::Text(class));
    }
    if let Some(status) = get_opt_str(&req.params, "status") {
        clauses.push("status = ?");
        binds.push(Value::Text(status));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY first_name, other_names");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| student_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match students {
        Ok(list) => ok(&req.id, json!({ "students": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let parsed = (|| -> Result<_, HandlerErr> {
        Ok((
            get_required_str(&req.params, "studentNo")?,
            get_required_str(&req.params, "firstName")?,
            get_required_str(&req.params, "otherNames")?,
            get_required_str(&req.params, "dateOfBirth")?,
            get_required_str(&req.params, "gender")?,
            get_required_str(&req.params, "religion")?,
            get_required_str(&req.params, "currentClass")?,
            get_required_str(&req.params, "guardianName")?,
        ))
    })();
    let (student_no, first_name, other_names, date_of_birth, gender, religion, current_class, guardian_name) =
        match parsed {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };

    let department = get_opt_str(&req.params, "department").unwrap_or_else(|| "GENERAL".into());
    let status = get_opt_str(&req.params, "status").unwrap_or_else(|| "active".into());
    for (value, allowed, field) in [
        (gender.as_str(), &GENDERS[..], "gender"),
        (religion.as_str(), &RELIGIONS[..], "religion"),
        (department.as_str(), &DEPARTMENTS[..], "department"),
        (status.as_str(), &STATUSES[..], "status"),
    ] {
        if let Err(e) = check_enum(value, allowed, field) {
            return e.response(&req.id);
        }
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let insert = conn.execute(
        "INSERT INTO students(
            id, student_no, first_name, other_names, date_of_birth, gender, religion,
            current_class, department, contact_email, contact_phone, guardian_name,
            address, status, date_registered, updated_at
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            student_no,
            first_name,
            other_names,
            date_of_birth,
            gender,
            religion,
            current_class,
            department,
            get_opt_str(&req.params, "contactEmail"),
            get_opt_str(&req.params, "contactPhone"),
            guardian_name,
            get_opt_str(&req.params, "address"),
            status,
            now,
            now,
        ],
    );
    match insert {
        Ok(_) => ok(&req.id, json!({ "id": id })),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            err(
                &req.id,
                "duplicate_student_no",
                msg.unwrap_or_else(|| "studentNo already exists".to_string()),
                Some(json!({ "studentNo": student_no })),
            )
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let columns: [(&str, &str); 13] = [
        ("studentNo", "student_no"),
        ("firstName", "first_name"),
        ("otherNames", "other_names"),
        ("dateOfBirth", "date_of_birth"),
        ("gender", "gender"),
        ("religion", "religion"),
        ("currentClass", "current_class"),
        ("department", "department"),
        ("contactEmail", "contact_email"),
        ("contactPhone", "contact_phone"),
        ("guardianName", "guardian_name"),
        ("address", "address"),
        ("status", "status"),
    ];

    let mut sets: Vec<(&str, String)> = Vec::new();
    for (key, column) in columns {
        let Some(v) = patch.get(key) else {
            continue;
        };
        let Some(s) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                format!("{} must be a string", key),
                None,
            );
        };
        let check = match key {
            "gender" => check_enum(s, &GENDERS, "gender"),
            "religion" => check_enum(s, &RELIGIONS, "religion"),
            "department" => check_enum(s, &DEPARTMENTS, "department"),
            "status" => check_enum(s, &STATUSES, "status"),
            _ => Ok(()),
        };
        if let Err(e) = check {
            return e.response(&req.id);
        }
        sets.push((column, s.to_string()));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no known fields", None);
    }

    if let Err(e) = require_student(conn, &student_id) {
        return e.response(&req.id);
    }
    for (column, value) in sets {
        let sql = format!("UPDATE students SET {} = ?, updated_at = ? WHERE id = ?", column);
        if let Err(e) = conn.execute(&sql, (value, now_rfc3339(), &student_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "ok": true }))
}

fn require_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found(
            "student not found",
            Some(json!({ "studentId": student_id })),
        ));
    }
    Ok(())
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        ),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
