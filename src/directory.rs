use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::db;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub external_no: Option<i64>,
    pub display_name: String,
    pub reading_level: Option<String>,
}

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        external_no: r.get(1)?,
        display_name: r.get(2)?,
        reading_level: r.get(3)?,
    })
}

/// Looks a student up by id, then by numeric external id.
pub fn find_student(conn: &Connection, key: &str) -> EngineResult<Option<Student>> {
    let key = key.trim();
    let by_id = conn
        .query_row(
            "SELECT id, external_no, display_name, reading_level FROM students WHERE id = ?",
            [key],
            student_from_row,
        )
        .optional()?;
    if by_id.is_some() {
        return Ok(by_id);
    }
    let Ok(no) = key.parse::<i64>() else {
        return Ok(None);
    };
    Ok(conn
        .query_row(
            "SELECT id, external_no, display_name, reading_level FROM students WHERE external_no = ?",
            [no],
            student_from_row,
        )
        .optional()?)
}

/// Resolves a caller-supplied student key to a known student or fails.
pub fn require_student(conn: &Connection, key: &str) -> EngineResult<Student> {
    if key.trim().is_empty() {
        return Err(EngineError::validation("studentId must not be empty"));
    }
    find_student(conn, key)?.ok_or_else(|| EngineError::not_found("student", key.trim()))
}

pub fn upsert_student(
    conn: &Connection,
    id: &str,
    external_no: Option<i64>,
    display_name: &str,
    reading_level: Option<&str>,
) -> EngineResult<Student> {
    let id = id.trim();
    if id.is_empty() {
        return Err(EngineError::validation("student id must not be empty"));
    }
    conn.execute(
        "INSERT INTO students(id, external_no, display_name, reading_level, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           external_no = excluded.external_no,
           display_name = excluded.display_name,
           reading_level = excluded.reading_level,
           updated_at = excluded.updated_at",
        (id, external_no, display_name, reading_level, db::now_rfc3339()),
    )?;
    Ok(Student {
        id: id.to_string(),
        external_no,
        display_name: display_name.to_string(),
        reading_level: reading_level.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_falls_back_to_external_number() {
        let conn = db::open_temp();
        upsert_student(&conn, "stu-a", Some(1042), "Ada", Some("Low Emerging")).expect("upsert");
        let by_id = find_student(&conn, "stu-a").expect("query");
        assert_eq!(by_id.map(|s| s.display_name), Some("Ada".to_string()));
        let by_no = find_student(&conn, "1042").expect("query");
        assert_eq!(by_no.map(|s| s.id), Some("stu-a".to_string()));
        assert!(find_student(&conn, "9999").expect("query").is_none());
    }

    #[test]
    fn require_student_distinguishes_blank_from_unknown() {
        let conn = db::open_temp();
        assert_eq!(require_student(&conn, "  ").unwrap_err().code(), "bad_params");
        assert_eq!(require_student(&conn, "ghost").unwrap_err().code(), "not_found");
    }
}
