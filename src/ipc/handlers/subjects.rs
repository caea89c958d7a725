use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

const DEPARTMENTS: [&str; 4] = ["GENERAL", "SCIENCE", "ARTS", "COMMERCIAL"];

struct SubjectRow {
    id: String,
    code: String,
    name: String,
    department: String,
    classes: Vec<String>,
    status: String,
}

impl SubjectRow {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "code": self.code,
            "name": self.name,
            "department": self.department,
            "classes": self.classes,
            "status": self.status,
        })
    }
}

fn fetch_subjects(conn: &rusqlite::Connection) -> Result<Vec<SubjectRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, code, name, department, classes, status
             FROM subjects ORDER BY code",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([], |r| {
        let classes_raw: String = r.get(4)?;
        Ok(SubjectRow {
            id: r.get(0)?,
            code: r.get(1)?,
            name: r.get(2)?,
            department: r.get(3)?,
            classes: serde_json::from_str(&classes_raw).unwrap_or_default(),
            status: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_filter = get_opt_str(&req.params, "classLevel");
    let department_filter = get_opt_str(&req.params, "department");
    let status_filter = get_opt_str(&req.params, "status");

    let subjects = match fetch_subjects(conn) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let list: Vec<serde_json::Value> = subjects
        .iter()
        .filter(|s| {
            let class_ok = class_filter
                .as_ref()
                .map(|c| s.classes.iter().any(|sc| sc.eq_ignore_ascii_case(c)))
                .unwrap_or(true);
            let dept_ok = department_filter
                .as_ref()
                .map(|d| s.department.eq_ignore_ascii_case(d))
                .unwrap_or(true);
            let status_ok = status_filter
                .as_ref()
                .map(|st| s.status == *st)
                .unwrap_or(true);
            class_ok && dept_ok && status_ok
        })
        .map(|s| s.to_json())
        .collect();

    ok(&req.id, json!({ "subjects": list }))
}

fn parse_classes(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get("classes").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing classes[]"));
    };
    let classes: Option<Vec<String>> = arr
        .iter()
        .map(|v| v.as_str().map(|s| s.to_string()))
        .collect();
    let classes = classes.ok_or_else(|| HandlerErr::bad_params("classes entries must be strings"))?;
    if classes.is_empty() {
        return Err(HandlerErr::bad_params("select at least one class"));
    }
    Ok(classes)
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match get_required_str(&req.params, "code") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e.response(&req.id),
    };
    if code.is_empty() {
        return err(&req.id, "bad_params", "code must not be empty", None);
    }
    let name = match get_required_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let department = match get_required_str(&req.params, "department") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !DEPARTMENTS.contains(&department.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("department must be one of {}", DEPARTMENTS.join(", ")),
            Some(json!({ "department": department })),
        );
    }
    let classes = match parse_classes(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let status = get_opt_str(&req.params, "status").unwrap_or_else(|| "active".into());

    let id = Uuid::new_v4().to_string();
    let classes_raw = serde_json::to_string(&classes).unwrap_or_else(|_| "[]".into());
    let insert = conn.execute(
        "INSERT INTO subjects(id, code, name, department, classes, status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, &code, &name, &department, &classes_raw, &status, now_rfc3339()),
    );
    match insert {
        Ok(_) => ok(&req.id, json!({ "id": id, "code": code })),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            err(
                &req.id,
                "duplicate_code",
                msg.unwrap_or_else(|| "subject code already exists".to_string()),
                Some(json!({ "code": code })),
            )
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let code = match get_required_str(&req.params, "code") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e.response(&req.id),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let mut sets: Vec<(&str, String)> = Vec::new();
    if let Some(v) = patch.get("name") {
        match v.as_str() {
            Some(s) => sets.push(("name", s.to_string())),
            None => return err(&req.id, "bad_params", "name must be a string", None),
        }
    }
    if let Some(v) = patch.get("department") {
        match v.as_str() {
            Some(s) if DEPARTMENTS.contains(&s) => sets.push(("department", s.to_string())),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("department must be one of {}", DEPARTMENTS.join(", ")),
                    None,
                )
            }
        }
    }
    if let Some(v) = patch.get("status") {
        match v.as_str() {
            Some(s) if s == "active" || s == "inactive" => sets.push(("status", s.to_string())),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be active or inactive",
                    None,
                )
            }
        }
    }
    if patch.contains_key("classes") {
        match parse_classes(&serde_json::Value::Object(patch.clone())) {
            Ok(classes) => sets.push((
                "classes",
                serde_json::to_string(&classes).unwrap_or_else(|_| "[]".into()),
            )),
            Err(e) => return e.response(&req.id),
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no known fields", None);
    }

    for (column, value) in sets {
        let sql = format!(
            "UPDATE subjects SET {} = ?, updated_at = ? WHERE code = ?",
            column
        );
        match conn.execute(&sql, (value, now_rfc3339(), &code)) {
            Ok(0) => {
                return err(
                    &req.id,
                    "not_found",
                    "subject not found",
                    Some(json!({ "code": code })),
                )
            }
            Ok(_) => {}
            Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
        }
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let code = match get_required_str(&req.params, "code") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM subjects WHERE code = ?", [&code]) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "subject not found",
            Some(json!({ "code": code })),
        ),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
