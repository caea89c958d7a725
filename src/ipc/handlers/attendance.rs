use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, get_required_term, now_rfc3339, student_current_class,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use serde_json::json;
use uuid::Uuid;

fn non_negative_int(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(0);
    };
    v.as_i64().filter(|n| *n >= 0).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("{} must be a non-negative integer", key),
        details: Some(json!({ key: v.clone() })),
    })
}

fn handle_attendance_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let academic_year = match get_required_str(&req.params, "academicYear") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let term = match get_required_term(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let time_present = match non_negative_int(&req.params, "timePresent") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let time_absent = match non_negative_int(&req.params, "timeAbsent") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let max_attendance = match non_negative_int(&req.params, "maxAttendance") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // The class level is snapshotted on the record so a later class change
    // does not rewrite history.
    let class_level = match student_current_class(conn, &student_id) {
        Ok(Some(v)) => v,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "student not found",
                Some(json!({ "studentId": student_id })),
            )
        }
        Err(e) => return e.response(&req.id),
    };

    let attendance_id = Uuid::new_v4().to_string();
    let write = conn.execute(
        "INSERT INTO attendance(
            id, student_id, academic_year, term, class_level,
            time_present, time_absent, max_attendance, updated_at
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, academic_year, term) DO UPDATE SET
           class_level = excluded.class_level,
           time_present = excluded.time_present,
           time_absent = excluded.time_absent,
           max_attendance = excluded.max_attendance,
           updated_at = excluded.updated_at",
        rusqlite::params![
            attendance_id,
            student_id,
            academic_year,
            term.as_key(),
            class_level,
            time_present,
            time_absent,
            max_attendance,
            now_rfc3339(),
        ],
    );
    match write {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_attendance_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut sql = String::from(
        "SELECT student_id, academic_year, term, class_level,
                time_present, time_absent, max_attendance
         FROM attendance",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(student_id) = get_opt_str(&req.params, "studentId") {
        clauses.push("student_id = ?");
        binds.push(Value::Text(student_id));
    }
    if let Some(year) = get_opt_str(&req.params, "academicYear") {
        clauses.push("academic_year = ?");
        binds.push(Value::Text(year));
    }
    if let Some(term) = get_opt_str(&req.params, "term") {
        clauses.push("term = ?");
        binds.push(Value::Text(term));
    }
    if let Some(class) = get_opt_str(&req.params, "classLevel") {
        clauses.push("class_level = ?");
        binds.push(Value::Text(class));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY student_id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "academicYear": r.get::<_, String>(1)?,
                "term": r.get::<_, String>(2)?,
                "classLevel": r.get::<_, String>(3)?,
                "timePresent": r.get::<_, i64>(4)?,
                "timeAbsent": r.get::<_, i64>(5)?,
                "maxAttendance": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(list) => ok(&req.id, json!({ "attendance": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.get" => Some(handle_attendance_get(state, req)),
        "attendance.save" => Some(handle_attendance_save(state, req)),
        _ => None,
    }
}
