use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{self, json_col, opt_json_col};
use crate::error::{EngineError, EngineResult};
use crate::model::{Assignment, Response};

const RESPONSE_COLS: &str = "id, assignment_id, assessment_id, template_id, student_id, category_id,
    has_customization, customized_assessment_id, answers, raw_score, total_points, percentage_score,
    passed, correct_question_ids, incorrect_question_ids, started_at, ended_at, completed_at,
    time_spent_secs, attempt_number, completed, feedback, reviewed_by, reviewed_at, next_steps";

pub(crate) fn response_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Response> {
    Ok(Response {
        id: r.get(0)?,
        assignment_id: r.get(1)?,
        assessment_id: r.get(2)?,
        template_id: r.get(3)?,
        student_id: r.get(4)?,
        category_id: r.get(5)?,
        has_customization: r.get::<_, i64>(6)? != 0,
        customized_assessment_id: r.get(7)?,
        answers: json_col(r, 8)?,
        raw_score: r.get(9)?,
        total_points: r.get(10)?,
        percentage_score: r.get(11)?,
        passed: r.get::<_, Option<i64>>(12)?.map(|v| v != 0),
        correct_question_ids: opt_json_col(r, 13)?,
        incorrect_question_ids: opt_json_col(r, 14)?,
        started_at: r.get(15)?,
        ended_at: r.get(16)?,
        completed_at: r.get(17)?,
        time_spent_secs: r.get(18)?,
        attempt_number: r.get(19)?,
        completed: r.get::<_, i64>(20)? != 0,
        feedback: r.get(21)?,
        reviewed_by: r.get(22)?,
        reviewed_at: r.get(23)?,
        next_steps: r.get(24)?,
    })
}

/// The ledger for (assessment, student). `assessment_id` may name either the
/// in-effect assessment or the canonical template it derives from; an exact
/// match on the in-effect id wins.
pub fn find_response(conn: &Connection, assessment_id: &str, student_id: &str) -> EngineResult<Option<Response>> {
    let sql = format!(
        "SELECT {RESPONSE_COLS} FROM responses
         WHERE student_id = ?1 AND (assessment_id = ?2 OR template_id = ?2)
         ORDER BY (assessment_id = ?2) DESC, rowid DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, (student_id, assessment_id), response_from_row)
        .optional()?)
}

pub fn require_response(conn: &Connection, assessment_id: &str, student_id: &str) -> EngineResult<Response> {
    find_response(conn, assessment_id, student_id)?
        .ok_or_else(|| EngineError::not_found("response", format!("{assessment_id}/{student_id}")))
}

/// Opens a fresh attempt cycle for `assignment`'s student. An existing ledger
/// for the same (assessment, student) pair is reset and re-pointed; its
/// attempt counter is kept.
pub fn open_empty_response(conn: &Connection, assignment: &Assignment, student_id: &str) -> EngineResult<Response> {
    conn.execute(
        "INSERT INTO responses(id, assignment_id, assessment_id, template_id, student_id, category_id,
           has_customization, customized_assessment_id, answers, completed, attempt_number)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, '{}', 0, 0)
         ON CONFLICT(assessment_id, student_id) DO UPDATE SET
           assignment_id = excluded.assignment_id,
           template_id = excluded.template_id,
           category_id = excluded.category_id,
           has_customization = excluded.has_customization,
           customized_assessment_id = excluded.customized_assessment_id,
           answers = '{}',
           raw_score = NULL,
           total_points = NULL,
           percentage_score = NULL,
           passed = NULL,
           correct_question_ids = NULL,
           incorrect_question_ids = NULL,
           started_at = NULL,
           ended_at = NULL,
           completed_at = NULL,
           time_spent_secs = NULL,
           completed = 0",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            assignment.id,
            assignment.assessment_id,
            assignment.template_id,
            student_id,
            assignment.category_id,
            assignment.has_customization as i64,
            assignment.customized_assessment_id,
        ],
    )?;
    require_response(conn, &assignment.assessment_id, student_id)
}

/// Persists a scored attempt; `response` already carries the new values.
pub fn save_scored(conn: &Connection, response: &Response) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE responses SET
           answers = ?, raw_score = ?, total_points = ?, percentage_score = ?, passed = ?,
           correct_question_ids = ?, incorrect_question_ids = ?, ended_at = ?, completed_at = ?,
           time_spent_secs = ?, attempt_number = ?, completed = 1
         WHERE id = ?",
        rusqlite::params![
            serde_json::to_string(&response.answers)?,
            response.raw_score,
            response.total_points,
            response.percentage_score,
            response.passed.map(|p| p as i64),
            response
                .correct_question_ids
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            response
                .incorrect_question_ids
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            response.ended_at,
            response.completed_at,
            response.time_spent_secs,
            response.attempt_number,
            response.id,
        ],
    )?;
    if changed != 1 {
        return Err(EngineError::Conflict(format!(
            "response {} changed underneath the submission",
            response.id
        )));
    }
    Ok(())
}

/// Stamps the start of the current attempt; later calls keep the first stamp.
pub fn start_attempt(conn: &Connection, assessment_id: &str, student_id: &str) -> EngineResult<Response> {
    let response = require_response(conn, assessment_id, student_id)?;
    if response.started_at.is_none() {
        conn.execute(
            "UPDATE responses SET started_at = ? WHERE id = ? AND started_at IS NULL",
            (db::now_rfc3339(), &response.id),
        )?;
        return require_response(conn, assessment_id, student_id);
    }
    Ok(response)
}

#[derive(Debug, Clone, Default)]
pub struct Review {
    pub feedback: Option<String>,
    pub reviewed_by: Option<String>,
    pub next_steps: Option<String>,
}

pub fn review_response(conn: &Connection, assessment_id: &str, student_id: &str, review: &Review) -> EngineResult<Response> {
    if review.feedback.is_none() && review.next_steps.is_none() {
        return Err(EngineError::validation("review needs feedback or nextSteps"));
    }
    let response = require_response(conn, assessment_id, student_id)?;
    conn.execute(
        "UPDATE responses SET
           feedback = COALESCE(?, feedback),
           next_steps = COALESCE(?, next_steps),
           reviewed_by = COALESCE(?, reviewed_by),
           reviewed_at = ?
         WHERE id = ?",
        rusqlite::params![
            review.feedback,
            review.next_steps,
            review.reviewed_by,
            db::now_rfc3339(),
            response.id,
        ],
    )?;
    require_response(conn, assessment_id, student_id)
}

/// Completed attempts for a student, newest first.
pub fn completed_for_student(conn: &Connection, student_id: &str) -> EngineResult<Vec<Response>> {
    let sql = format!(
        "SELECT {RESPONSE_COLS} FROM responses
         WHERE student_id = ? AND completed = 1
         ORDER BY completed_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], response_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
