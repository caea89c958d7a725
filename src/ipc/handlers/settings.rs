use crate::grading::Term;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn read_settings(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT school_name, current_academic_year, current_term, classes, departments,
                    date_of_vacation, date_of_resumption, max_attendance, subject_orders
             FROM settings WHERE id = 1",
            [],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, i64>(7)?,
                    r.get::<_, String>(8)?,
                ))
            },
        )
        .map_err(HandlerErr::db)?;

    let (
        school_name,
        current_academic_year,
        current_term,
        classes,
        departments,
        date_of_vacation,
        date_of_resumption,
        max_attendance,
        subject_orders,
    ) = row;

    let classes: serde_json::Value = serde_json::from_str(&classes).unwrap_or_else(|_| json!([]));
    let departments: serde_json::Value =
        serde_json::from_str(&departments).unwrap_or_else(|_| json!([]));
    let subject_orders: serde_json::Value =
        serde_json::from_str(&subject_orders).unwrap_or_else(|_| json!({}));

    Ok(json!({
        "schoolName": school_name,
        "currentAcademicYear": current_academic_year,
        "currentTerm": current_term,
        "classes": classes,
        "departments": departments,
        "dateOfVacation": date_of_vacation,
        "dateOfResumption": date_of_resumption,
        "maxAttendance": max_attendance,
        "subjectOrders": subject_orders,
    }))
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match read_settings(conn) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn string_array_field(v: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = v.get(key) else {
        return Ok(None);
    };
    let Some(arr) = raw.as_array() else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    if !arr.iter().all(|e| e.is_string()) {
        return Err(HandlerErr::bad_params(format!(
            "{} entries must be strings",
            key
        )));
    }
    Ok(Some(raw.to_string()))
}

fn apply_patch(conn: &Connection, patch: &serde_json::Value) -> Result<(), HandlerErr> {
    if !patch.is_object() {
        return Err(HandlerErr::bad_params("patch must be an object"));
    }

    if let Some(term) = patch.get("currentTerm").and_then(|v| v.as_str()) {
        if Term::from_key(term).is_none() {
            return Err(HandlerErr::bad_params(
                "currentTerm must be one of firstTerm, secondTerm, thirdTerm",
            ));
        }
    }
    if let Some(orders) = patch.get("subjectOrders") {
        if !orders.is_object() {
            return Err(HandlerErr::bad_params("subjectOrders must be an object"));
        }
    }

    let mut sets: Vec<(&str, String)> = Vec::new();
    for (key, column) in [
        ("schoolName", "school_name"),
        ("currentAcademicYear", "current_academic_year"),
        ("currentTerm", "current_term"),
        ("dateOfVacation", "date_of_vacation"),
        ("dateOfResumption", "date_of_resumption"),
    ] {
        if let Some(v) = patch.get(key) {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!("{} must be a string", key)));
            };
            sets.push((column, s.to_string()));
        }
    }
    if let Some(classes) = string_array_field(patch, "classes")? {
        sets.push(("classes", classes));
    }
    if let Some(departments) = string_array_field(patch, "departments")? {
        sets.push(("departments", departments));
    }
    if let Some(orders) = patch.get("subjectOrders") {
        sets.push(("subject_orders", orders.to_string()));
    }
    if let Some(v) = patch.get("maxAttendance") {
        let Some(n) = v.as_i64().filter(|n| *n >= 0) else {
            return Err(HandlerErr::bad_params(
                "maxAttendance must be a non-negative integer",
            ));
        };
        conn.execute("UPDATE settings SET max_attendance = ? WHERE id = 1", [n])
            .map_err(HandlerErr::db)?;
    }

    for (column, value) in sets {
        let sql = format!("UPDATE settings SET {} = ? WHERE id = 1", column);
        conn.execute(&sql, [&value]).map_err(HandlerErr::db)?;
    }
    conn.execute(
        "UPDATE settings SET updated_at = ? WHERE id = 1",
        [now_rfc3339()],
    )
    .map_err(HandlerErr::db)?;
    Ok(())
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    if let Err(e) = apply_patch(conn, patch) {
        return e.response(&req.id);
    }
    match read_settings(conn) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
