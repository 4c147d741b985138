use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use crate::error::EngineResult;

pub const DB_FILE_NAME: &str = "readingd.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            external_no INTEGER UNIQUE,
            display_name TEXT NOT NULL,
            reading_level TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS content_items(
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            natural_key TEXT,
            data TEXT NOT NULL,
            PRIMARY KEY(collection, id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_content_items_natural_key ON content_items(collection, natural_key)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS templates(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            category_id INTEGER NOT NULL,
            category_name TEXT NOT NULL,
            reading_level TEXT NOT NULL,
            questions TEXT NOT NULL,
            passing_threshold REAL NOT NULL DEFAULT 75,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_published INTEGER NOT NULL DEFAULT 1,
            is_placeholder INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_templates_category_level ON templates(category_id, reading_level)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS customized_assessments(
            id TEXT PRIMARY KEY,
            original_template_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            teacher_id TEXT,
            category_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            questions TEXT NOT NULL,
            passing_threshold REAL NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(original_template_id) REFERENCES templates(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_customized_template_student ON customized_assessments(original_template_id, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            assessment_title TEXT NOT NULL,
            template_id TEXT NOT NULL,
            category_id INTEGER NOT NULL,
            category_name TEXT NOT NULL,
            assigned_by TEXT,
            assigned_at TEXT NOT NULL,
            passing_threshold REAL NOT NULL,
            total_assigned INTEGER NOT NULL,
            completion_count INTEGER NOT NULL DEFAULT 0,
            completion_rate REAL NOT NULL DEFAULT 0,
            has_customization INTEGER NOT NULL DEFAULT 0,
            customized_assessment_id TEXT,
            notes TEXT,
            FOREIGN KEY(template_id) REFERENCES templates(id),
            CHECK(completion_count <= total_assigned),
            CHECK((customized_assessment_id IS NULL) = (has_customization = 0))
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_students(
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            reading_level TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(assignment_id, student_id),
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignment_students_student ON assignment_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS responses(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            assessment_id TEXT NOT NULL,
            template_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            category_id INTEGER NOT NULL,
            has_customization INTEGER NOT NULL DEFAULT 0,
            customized_assessment_id TEXT,
            answers TEXT NOT NULL DEFAULT '{}',
            raw_score REAL,
            total_points REAL,
            percentage_score REAL,
            passed INTEGER,
            correct_question_ids TEXT,
            incorrect_question_ids TEXT,
            started_at TEXT,
            ended_at TEXT,
            completed_at TEXT,
            time_spent_secs INTEGER,
            attempt_number INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            feedback TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            next_steps TEXT,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(assessment_id, student_id),
            CHECK(completed = 0 OR (raw_score IS NOT NULL AND percentage_score IS NOT NULL AND passed IS NOT NULL))
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_template_student ON responses(template_id, student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_student ON responses(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS category_progress(
            student_id TEXT PRIMARY KEY,
            catalog_version INTEGER NOT NULL,
            categories TEXT NOT NULL,
            completed_categories INTEGER NOT NULL,
            total_categories INTEGER NOT NULL,
            overall_progress REAL NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profile_events(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profile_events_student ON profile_events(student_id)",
        [],
    )?;

    Ok(conn)
}

/// Opens a write transaction that takes the RESERVED lock up front, so a
/// competing writer surfaces as SQLITE_BUSY at BEGIN rather than mid-unit.
pub fn begin_write(conn: &Connection) -> EngineResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Immediate,
    )?)
}

/// Reads a TEXT column holding a JSON document.
pub fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn opt_json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
pub(crate) fn open_temp() -> Connection {
    let dir = std::env::temp_dir().join(format!("readingd-unit-{}", uuid::Uuid::new_v4()));
    open_db(&dir, Duration::from_millis(500)).expect("open test db")
}
