use crate::grading::{
    compute_total, cumulative_series, rank_cohort, CategoryMap, CohortEntry, ScoreComponents, Term,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, get_required_term, load_category_map, now_rfc3339,
    student_current_class, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{types::Value, params_from_iter, Connection};
use serde_json::json;
use uuid::Uuid;

fn score_components(params: &serde_json::Value) -> ScoreComponents {
    // Absent components count as 0, matching score-entry forms that leave
    // columns blank.
    let num = |key: &str| params.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);
    ScoreComponents {
        weekly_test: num("weeklyTest"),
        mid_term: num("midTerm"),
        exam: num("exam"),
    }
}

struct ValidatedSave {
    components: ScoreComponents,
    total: f64,
    class_level: String,
    category_defaulted: bool,
}

/// Resolve the student's class-level category and check the components
/// against its bounds. The save path stores raw scores plus the provisional
/// total only; grade/remarks/position are finalized by the rank pass. The
/// class level is snapshotted on the record so cohorts stay rankable after
/// a student moves class or is removed.
fn validate_save(
    conn: &Connection,
    map: &CategoryMap,
    student_id: &str,
    components: ScoreComponents,
) -> Result<ValidatedSave, HandlerErr> {
    let Some(class_level) = student_current_class(conn, student_id)? else {
        return Err(HandlerErr::not_found(
            "student not found",
            Some(json!({ "studentId": student_id })),
        ));
    };
    let (category, matched) = map.resolve(&class_level);
    let total = compute_total(&components, category).map_err(|e| HandlerErr {
        code: "bad_params",
        message: format!("{} for class {}", e, class_level),
        details: Some(json!({
            "component": e.component,
            "value": e.value,
            "max": e.max,
            "classLevel": class_level,
        })),
    })?;
    Ok(ValidatedSave {
        components,
        total,
        class_level,
        category_defaulted: !matched,
    })
}

fn upsert_result(
    conn: &Connection,
    student_id: &str,
    academic_year: &str,
    term: Term,
    subject_code: &str,
    v: &ValidatedSave,
) -> Result<(), HandlerErr> {
    let result_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO results(
            id, student_id, academic_year, term, subject_code, class_level,
            weekly_test, mid_term, exam, total, grade, remarks, position, updated_at
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?)
         ON CONFLICT(student_id, academic_year, term, subject_code) DO UPDATE SET
           class_level = excluded.class_level,
           weekly_test = excluded.weekly_test,
           mid_term = excluded.mid_term,
           exam = excluded.exam,
           total = excluded.total,
           grade = NULL,
           remarks = NULL,
           position = NULL,
           updated_at = excluded.updated_at",
        rusqlite::params![
            result_id,
            student_id,
            academic_year,
            term.as_key(),
            subject_code,
            v.class_level,
            v.components.weekly_test,
            v.components.mid_term,
            v.components.exam,
            v.total,
            now_rfc3339(),
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "results" })),
    })?;
    Ok(())
}

fn handle_results_save(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let subject_code = match get_required_str(&req.params, "subjectCode") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e.response(&req.id),
    };

    let map = match load_category_map(conn) {
        Ok(m) => m,
        Err(e) => return e.response(&req.id),
    };
    let validated = match validate_save(conn, &map, &student_id, score_components(&req.params)) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = upsert_result(conn, &student_id, &academic_year, term, &subject_code, &validated)
    {
        return e.response(&req.id);
    }

    ok(
        &req.id,
        json!({
            "total": validated.total,
            "categoryDefaulted": validated.category_defaulted,
        }),
    )
}

fn handle_results_batch_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let academic_year = match get_required_str(&req.params, "academicYear") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let term = match get_required_term(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_code = match get_required_str(&req.params, "subjectCode") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e.response(&req.id),
    };
    let Some(items) = req.params.get("results").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing results[]", None);
    };

    let map = match load_category_map(conn) {
        Ok(m) => m,
        Err(e) => return e.response(&req.id),
    };

    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    let mut category_defaulted = false;

    for (i, item) in items.iter().enumerate() {
        let Some(student_id) = item.get("studentId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("result at index {} missing studentId", i),
            }));
            continue;
        };

        let outcome = validate_save(conn, &map, student_id, score_components(item)).and_then(|v| {
            upsert_result(conn, student_id, &academic_year, term, &subject_code, &v)?;
            Ok(v)
        });
        match outcome {
            Ok(v) => {
                updated += 1;
                category_defaulted |= v.category_defaulted;
            }
            Err(e) => errors.push(json!({
                "index": i,
                "studentId": student_id,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    let rejected = errors.len();
    let mut result = serde_json::Map::new();
    result.insert("updated".into(), json!(updated));
    result.insert("categoryDefaulted".into(), json!(category_defaulted));
    if rejected > 0 {
        result.insert("rejected".into(), json!(rejected));
        result.insert("errors".into(), json!(errors));
    }
    ok(&req.id, serde_json::Value::Object(result))
}

/// The cohort is read off the records' snapshotted class level, not the
/// current roster, so records whose student was since deleted or moved
/// still rank.
fn fetch_cohort(
    conn: &Connection,
    academic_year: &str,
    term: Term,
    subject_code: &str,
    class_level: &str,
) -> Result<Vec<CohortEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, total FROM results
             WHERE academic_year = ? AND term = ? AND subject_code = ? AND class_level = ?",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map(
        (academic_year, term.as_key(), subject_code, class_level),
        |r| {
            Ok(CohortEntry {
                record_id: r.get(0)?,
                total: r.get(1)?,
            })
        },
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn handle_results_calculate_positions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let academic_year = match get_required_str(&req.params, "academicYear") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let term = match get_required_term(&req.params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_code = match get_required_str(&req.params, "subjectCode") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e.response(&req.id),
    };
    let class_level = match get_required_str(&req.params, "classLevel") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let map = match load_category_map(conn) {
        Ok(m) => m,
        Err(e) => return e.response(&req.id),
    };
    let (category, matched) = map.resolve(&class_level);

    let entries = match fetch_cohort(conn, &academic_year, term, &subject_code, &class_level) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Empty cohort is a successful no-op.
    let ranked = rank_cohort(entries, category.policy());
    let count = ranked.len();

    // The cohort is overwritten atomically; a failed write must not leave a
    // mix of old and new positions.
    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    let now = now_rfc3339();
    for entry in &ranked {
        let write = tx.execute(
            "UPDATE results SET position = ?, grade = ?, remarks = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![entry.position, entry.grade, entry.remarks, now, entry.record_id],
        );
        if let Err(e) = write {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "ranked": count,
            "categoryDefaulted": !matched,
        }),
    )
}

fn result_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "academicYear": r.get::<_, String>(2)?,
        "term": r.get::<_, String>(3)?,
        "subjectCode": r.get::<_, String>(4)?,
        "classLevel": r.get::<_, String>(5)?,
        "weeklyTest": r.get::<_, f64>(6)?,
        "midTerm": r.get::<_, f64>(7)?,
        "exam": r.get::<_, f64>(8)?,
        "total": r.get::<_, f64>(9)?,
        "grade": r.get::<_, Option<String>>(10)?,
        "remarks": r.get::<_, Option<String>>(11)?,
        "position": r.get::<_, Option<i64>>(12)?,
    }))
}

fn handle_results_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut sql = String::from(
        "SELECT id, student_id, academic_year, term, subject_code, class_level,
                weekly_test, mid_term, exam, total, grade, remarks, position
         FROM results",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    if let Some(class) = get_opt_str(&req.params, "classLevel") {
        clauses.push("class_level = ?");
        binds.push(Value::Text(class));
    }
    if let Some(student_id) = get_opt_str(&req.params, "studentId") {
        clauses.push("student_id = ?");
        binds.push(Value::Text(student_id));
    }
    if let Some(year) = get_opt_str(&req.params, "academicYear") {
        clauses.push("academic_year = ?");
        binds.push(Value::Text(year));
    }
    if let Some(term) = get_opt_str(&req.params, "term") {
        if Term::from_key(&term).is_none() {
            return err(
                &req.id,
                "bad_params",
                "term must be one of firstTerm, secondTerm, thirdTerm",
                Some(json!({ "term": term })),
            );
        }
        clauses.push("term = ?");
        binds.push(Value::Text(term));
    }
    if let Some(code) = get_opt_str(&req.params, "subjectCode") {
        clauses.push("subject_code = ?");
        binds.push(Value::Text(code.trim().to_ascii_uppercase()));
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY subject_code, student_id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| result_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(list) => ok(&req.id, json!({ "results": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_cumulative_series(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut totals_by_term: [Vec<f64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for (i, term) in Term::ALL.iter().enumerate() {
        let mut stmt = match conn.prepare(
            "SELECT total FROM results
             WHERE student_id = ? AND academic_year = ? AND term = ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let totals = stmt
            .query_map((&student_id, &academic_year, term.as_key()), |r| {
                r.get::<_, f64>(0)
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        totals_by_term[i] = match totals {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    }

    let series = cumulative_series(&totals_by_term[0], &totals_by_term[1], &totals_by_term[2]);
    match serde_json::to_value(series) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_results_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let subject_code = match get_required_str(&req.params, "subjectCode") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(e) => return e.response(&req.id),
    };

    let deleted = conn.execute(
        "DELETE FROM results
         WHERE student_id = ? AND academic_year = ? AND term = ? AND subject_code = ?",
        (&student_id, &academic_year, term.as_key(), &subject_code),
    );
    match deleted {
        Ok(0) => err(&req.id, "not_found", "result not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.get" => Some(handle_results_get(state, req)),
        "results.save" => Some(handle_results_save(state, req)),
        "results.batchSave" => Some(handle_results_batch_save(state, req)),
        "results.calculatePositions" => Some(handle_results_calculate_positions(state, req)),
        "results.cumulativeSeries" => Some(handle_results_cumulative_series(state, req)),
        "results.delete" => Some(handle_results_delete(state, req)),
        _ => None,
    }
}
