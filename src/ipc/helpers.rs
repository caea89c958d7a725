use crate::grading::{CategoryMap, Term};
use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details,
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_term(params: &serde_json::Value, key: &str) -> Result<Term, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Term::from_key(&raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("{} must be one of firstTerm, secondTerm, thirdTerm", key),
        details: Some(json!({ key: raw })),
    })
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Class list from the settings row; the category lookup table is built
/// from it once per request that needs classification.
pub fn load_class_list(conn: &Connection) -> Result<Vec<String>, HandlerErr> {
    let raw: String = conn
        .query_row("SELECT classes FROM settings WHERE id = 1", [], |r| {
            r.get(0)
        })
        .map_err(HandlerErr::db)?;
    serde_json::from_str(&raw)
        .map_err(|e| HandlerErr::bad_params(format!("settings.classes is corrupt: {}", e)))
}

pub fn load_category_map(conn: &Connection) -> Result<CategoryMap, HandlerErr> {
    let classes = load_class_list(conn)?;
    Ok(CategoryMap::from_labels(classes.iter().map(|s| s.as_str())))
}

pub fn student_current_class(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT current_class FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db)
}
