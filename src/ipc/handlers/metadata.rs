use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, get_required_term, now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DEFAULT_TEACHER_COMMENT: &str = "Keep up the good work!";
const DEFAULT_PRINCIPAL_COMMENT: &str = "Excellent performance.";

struct MetaKey {
    student_id: String,
    academic_year: String,
    term: String,
}

fn meta_key(params: &serde_json::Value) -> Result<MetaKey, HandlerErr> {
    Ok(MetaKey {
        student_id: get_required_str(params, "studentId")?,
        academic_year: get_required_str(params, "academicYear")?,
        term: get_required_term(params, "term")?.as_key().to_string(),
    })
}

fn read_meta(conn: &Connection, key: &MetaKey) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        "SELECT class_teacher_comment, principal_comment, intuitive_feats,
                conventional_performance
         FROM result_metadata
         WHERE student_id = ? AND academic_year = ? AND term = ?",
        (&key.student_id, &key.academic_year, &key.term),
        |r| {
            let feats_raw: String = r.get(2)?;
            let perf_raw: String = r.get(3)?;
            Ok(json!({
                "studentId": key.student_id,
                "academicYear": key.academic_year,
                "term": key.term,
                "classTeacherComment": r.get::<_, String>(0)?,
                "principalComment": r.get::<_, String>(1)?,
                "intuitiveFeats":
                    serde_json::from_str::<serde_json::Value>(&feats_raw)
                        .unwrap_or_else(|_| json!({})),
                "conventionalPerformance":
                    serde_json::from_str::<serde_json::Value>(&perf_raw)
                        .unwrap_or_else(|_| json!({})),
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn handle_meta_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let key = match meta_key(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match read_meta(conn, &key) {
        // Absent metadata reads as the report-card defaults.
        Ok(None) => ok(
            &req.id,
            json!({
                "studentId": key.student_id,
                "academicYear": key.academic_year,
                "term": key.term,
                "classTeacherComment": DEFAULT_TEACHER_COMMENT,
                "principalComment": DEFAULT_PRINCIPAL_COMMENT,
                "intuitiveFeats": {},
                "conventionalPerformance": {},
            }),
        ),
        Ok(Some(v)) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_meta_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let key = match meta_key(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let teacher_comment = req
        .params
        .get("classTeacherComment")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_TEACHER_COMMENT)
        .to_string();
    let principal_comment = req
        .params
        .get("principalComment")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_PRINCIPAL_COMMENT)
        .to_string();

    for field in ["intuitiveFeats", "conventionalPerformance"] {
        if let Some(v) = req.params.get(field) {
            if !v.is_object() {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{} must be an object", field),
                    None,
                );
            }
        }
    }
    let feats = req
        .params
        .get("intuitiveFeats")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let perf = req
        .params
        .get("conventionalPerformance")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let meta_id = Uuid::new_v4().to_string();
    let write = conn.execute(
        "INSERT INTO result_metadata(
            id, student_id, academic_year, term, class_teacher_comment,
            principal_comment, intuitive_feats, conventional_performance, updated_at
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, academic_year, term) DO UPDATE SET
           class_teacher_comment = excluded.class_teacher_comment,
           principal_comment = excluded.principal_comment,
           intuitive_feats = excluded.intuitive_feats,
           conventional_performance = excluded.conventional_performance,
           updated_at = excluded.updated_at",
        rusqlite::params![
            meta_id,
            key.student_id,
            key.academic_year,
            key.term,
            teacher_comment,
            principal_comment,
            feats.to_string(),
            perf.to_string(),
            now_rfc3339(),
        ],
    );
    match write {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "resultMeta.get" => Some(handle_meta_get(state, req)),
        "resultMeta.save" => Some(handle_meta_save(state, req)),
        _ => None,
    }
}
