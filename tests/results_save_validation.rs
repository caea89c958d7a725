use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
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
    let exe = env!("CARGO_BIN_EXE_resultd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
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
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_no: &str,
    class_level: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({
            "studentNo": student_no,
            "firstName": "Test",
            "otherNames": format!("Student {}", student_no),
            "dateOfBirth": "2011-11-20",
            "gender": "female",
            "religion": "CHRISTIANITY",
            "currentClass": class_level,
            "guardianName": "Guardian Test",
        }),
    );
    res.get("id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string()
}

#[test]
fn out_of_range_component_is_rejected_with_named_range() {
    let workspace = temp_dir("resultd-save-bounds");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let sid = create_student(&mut stdin, &mut reader, "s1", "JS010", "JSS2");

    // weeklyTest caps at 10 for a JSS class.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "results.save",
        json!({
            "studentId": sid,
            "academicYear": "2024-2025",
            "term": "firstTerm",
            "subjectCode": "PHY",
            "weeklyTest": 25,
            "midTerm": 0,
            "exam": 0,
        }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    let message = error.get("message").and_then(|v| v.as_str()).unwrap();
    assert!(
        message.contains("weeklyTest") && message.contains("10"),
        "message should name the component and its range: {}",
        message
    );
    let details = error.get("details").expect("details");
    assert_eq!(details.get("component").and_then(|v| v.as_str()), Some("weeklyTest"));
    assert_eq!(details.get("max").and_then(|v| v.as_f64()), Some(10.0));

    // Nothing was persisted for the rejected save.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.get",
        json!({ "studentId": sid }),
    );
    assert_eq!(
        res.get("results").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // Negative components are rejected too.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "results.save",
        json!({
            "studentId": sid,
            "academicYear": "2024-2025",
            "term": "firstTerm",
            "subjectCode": "PHY",
            "weeklyTest": 5,
            "midTerm": -3,
            "exam": 0,
        }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    let _ = child.kill();
}

#[test]
fn save_is_upsert_by_composite_key_and_leaves_grade_provisional() {
    let workspace = temp_dir("resultd-save-upsert");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let sid = create_student(&mut stdin, &mut reader, "s1", "JS011", "JSS3");
    let key = json!({
        "studentId": sid,
        "academicYear": "2024-2025",
        "term": "thirdTerm",
        "subjectCode": "CHM",
    });

    let mut first = key.as_object().unwrap().clone();
    first.extend([
        ("weeklyTest".to_string(), json!(10)),
        ("midTerm".to_string(), json!(20)),
        ("exam".to_string(), json!(70)),
    ]);
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.save",
        serde_json::Value::Object(first),
    );
    assert_eq!(saved.get("total").and_then(|v| v.as_f64()), Some(100.0));

    // Same composite key overwrites rather than duplicating.
    let mut second = key.as_object().unwrap().clone();
    second.extend([
        ("weeklyTest".to_string(), json!(8)),
        ("midTerm".to_string(), json!(15)),
        ("exam".to_string(), json!(40)),
    ]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.save",
        serde_json::Value::Object(second),
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.get",
        json!({ "studentId": sid }),
    );
    let rows = res.get("results").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("total").and_then(|v| v.as_f64()), Some(63.0));
    // Grade/remarks/position stay unset until a rank pass runs.
    assert!(row.get("grade").map(|v| v.is_null()).unwrap_or(false));
    assert!(row.get("remarks").map(|v| v.is_null()).unwrap_or(false));
    assert!(row.get("position").map(|v| v.is_null()).unwrap_or(false));

    let _ = child.kill();
}

#[test]
fn batch_save_applies_valid_rows_and_reports_rejects() {
    let workspace = temp_dir("resultd-batch-partial");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = create_student(&mut stdin, &mut reader, "s1", "JS020", "JSS1");
    let b = create_student(&mut stdin, &mut reader, "s2", "JS021", "JSS1");

    let batch = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.batchSave",
        json!({
            "academicYear": "2024-2025",
            "term": "firstTerm",
            "subjectCode": "BST",
            "results": [
                { "studentId": a, "weeklyTest": 9, "midTerm": 18, "exam": 55 },
                { "studentId": b, "weeklyTest": 9, "midTerm": 18, "exam": 88 },
                { "studentId": "no-such-student", "weeklyTest": 1, "midTerm": 1, "exam": 1 },
            ]
        }),
    );
    assert_eq!(batch.get("updated").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(batch.get("rejected").and_then(|v| v.as_i64()), Some(2));
    let errors = batch.get("errors").and_then(|v| v.as_array()).expect("errors");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].get("index").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        errors[0].get("code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
    assert_eq!(errors[1].get("index").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        errors[1].get("code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let _ = child.kill();
}
