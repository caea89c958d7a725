use rusqlite::Connection;
use std::path::Path;

pub const DEFAULT_SCHOOL_NAME: &str = "Lifer's Academy";
pub const DEFAULT_ACADEMIC_YEAR: &str = "2024-2025";
pub const DEFAULT_CLASSES: [&str; 16] = [
    "Nursery1", "KG1", "KG2", "Nursery2", "Primary1", "Primary2", "Primary3", "Primary4",
    "Primary5", "Primary6", "JSS1", "JSS2", "JSS3", "SS1", "SS2", "SS3",
];
pub const DEFAULT_DEPARTMENTS: [&str; 4] = ["GENERAL", "SCIENCE", "ARTS", "COMMERCIAL"];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("resultd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            id INTEGER PRIMARY KEY CHECK(id = 1),
            school_name TEXT NOT NULL,
            current_academic_year TEXT NOT NULL,
            current_term TEXT NOT NULL,
            classes TEXT NOT NULL,
            departments TEXT NOT NULL,
            date_of_vacation TEXT NOT NULL DEFAULT '',
            date_of_resumption TEXT NOT NULL DEFAULT '',
            max_attendance INTEGER NOT NULL DEFAULT 0,
            subject_orders TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT
        )",
        [],
    )?;
    seed_default_settings(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            other_names TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            gender TEXT NOT NULL,
            religion TEXT NOT NULL,
            current_class TEXT NOT NULL,
            department TEXT NOT NULL DEFAULT 'GENERAL',
            contact_email TEXT,
            contact_phone TEXT,
            guardian_name TEXT NOT NULL,
            address TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            date_registered TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(current_class)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_status ON students(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            classes TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            term TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            class_level TEXT NOT NULL,
            weekly_test REAL NOT NULL DEFAULT 0,
            mid_term REAL NOT NULL DEFAULT 0,
            exam REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            grade TEXT,
            remarks TEXT,
            position INTEGER,
            updated_at TEXT,
            UNIQUE(student_id, academic_year, term, subject_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_cohort
         ON results(academic_year, term, subject_code, class_level)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_metadata(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            term TEXT NOT NULL,
            class_teacher_comment TEXT NOT NULL DEFAULT 'Keep up the good work!',
            principal_comment TEXT NOT NULL DEFAULT 'Excellent performance.',
            intuitive_feats TEXT NOT NULL DEFAULT '{}',
            conventional_performance TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT,
            UNIQUE(student_id, academic_year, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_metadata_student ON result_metadata(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            term TEXT NOT NULL,
            class_level TEXT NOT NULL,
            time_present INTEGER NOT NULL DEFAULT 0,
            time_absent INTEGER NOT NULL DEFAULT 0,
            max_attendance INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            UNIQUE(student_id, academic_year, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class ON attendance(class_level)",
        [],
    )?;

    Ok(conn)
}

fn seed_default_settings(conn: &Connection) -> anyhow::Result<()> {
    let classes = serde_json::to_string(&DEFAULT_CLASSES)?;
    let departments = serde_json::to_string(&DEFAULT_DEPARTMENTS)?;
    conn.execute(
        "INSERT OR IGNORE INTO settings(
            id, school_name, current_academic_year, current_term, classes, departments
        ) VALUES(1, ?, ?, 'firstTerm', ?, ?)",
        (
            DEFAULT_SCHOOL_NAME,
            DEFAULT_ACADEMIC_YEAR,
            classes,
            departments,
        ),
    )?;
    Ok(())
}
