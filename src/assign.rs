use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::audit::{self, AuditSink};
use crate::config::{BatchAtomicity, EngineConfig};
use crate::content;
use crate::customize::{self, CustomizationSpec};
use crate::db;
use crate::directory;
use crate::error::{EngineError, EngineResult};
use crate::model::{AssignedStudent, Assignment, AssignmentStatus, EffectiveAssessment};
use crate::progress::{self, CategoryStatus};
use crate::responses;

#[derive(Clone, Copy)]
pub struct AssignContext<'a> {
    pub conn: &'a Connection,
    pub config: &'a EngineConfig,
    pub sink: &'a dyn AuditSink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRequest {
    pub category_id: i64,
    pub category_name: String,
}

#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub student_id: String,
    pub reading_level: String,
    pub categories: Vec<CategoryRequest>,
    pub customizations: Option<CustomizationSpec>,
    pub assigned_by: Option<String>,
}

/// A request that stopped part-way. `committed` holds the categories that
/// were already durable when `error` hit (always empty in all-or-nothing mode).
#[derive(Debug)]
pub struct AssignFailure {
    pub committed: Vec<Assignment>,
    pub failed_category_id: Option<i64>,
    pub error: EngineError,
}

impl From<EngineError> for AssignFailure {
    fn from(error: EngineError) -> Self {
        AssignFailure {
            committed: Vec::new(),
            failed_category_id: None,
            error,
        }
    }
}

/// Folds a raw `categories` payload into requests, filling names from the catalog.
pub fn parse_categories(v: Option<&serde_json::Value>, config: &EngineConfig) -> EngineResult<Vec<CategoryRequest>> {
    let Some(items) = v.and_then(|v| v.as_array()) else {
        return Err(EngineError::validation("missing categories"));
    };
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for item in items {
        let category_id = item
            .get("categoryId")
            .or_else(|| item.get("id"))
            .and_then(|v| v.as_i64())
            .or_else(|| item.as_i64())
            .ok_or_else(|| EngineError::validation("each category needs a numeric categoryId"))?;
        let Some(def) = config.catalog.get(category_id) else {
            return Err(EngineError::validation(format!(
                "categoryId {category_id} is not in catalog v{}",
                config.catalog.version
            )));
        };
        let name = item
            .get("categoryName")
            .or_else(|| item.get("name"))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| def.name.clone());
        if seen.insert(category_id) {
            out.push(CategoryRequest {
                category_id,
                category_name: name,
            });
        }
    }
    if out.is_empty() {
        return Err(EngineError::validation("categories must not be empty"));
    }
    Ok(out)
}

const ASSIGNMENT_COLS: &str = "id, assessment_id, assessment_title, template_id, category_id, category_name,
    assigned_by, assigned_at, passing_threshold, total_assigned, completion_count, completion_rate,
    has_customization, customized_assessment_id, notes";

fn assignment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: r.get(0)?,
        assessment_id: r.get(1)?,
        assessment_title: r.get(2)?,
        template_id: r.get(3)?,
        category_id: r.get(4)?,
        category_name: r.get(5)?,
        assigned_by: r.get(6)?,
        assigned_at: r.get(7)?,
        passing_threshold: r.get(8)?,
        students: Vec::new(),
        total_assigned: r.get(9)?,
        completion_count: r.get(10)?,
        completion_rate: r.get(11)?,
        has_customization: r.get::<_, i64>(12)? != 0,
        customized_assessment_id: r.get(13)?,
        notes: r.get(14)?,
    })
}

fn load_assigned_students(conn: &Connection, assignment_id: &str) -> EngineResult<Vec<AssignedStudent>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, status, reading_level FROM assignment_students
         WHERE assignment_id = ? ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([assignment_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(user_id, status, reading_level)| {
            let status = AssignmentStatus::parse(&status).ok_or_else(|| {
                EngineError::Persistence(format!("unknown assignment status '{status}'"))
            })?;
            Ok(AssignedStudent {
                user_id,
                status,
                reading_level,
            })
        })
        .collect()
}

pub fn load_assignment(conn: &Connection, assignment_id: &str) -> EngineResult<Option<Assignment>> {
    let sql = format!("SELECT {ASSIGNMENT_COLS} FROM assignments WHERE id = ?");
    let Some(mut a) = conn.query_row(&sql, [assignment_id], assignment_from_row).optional()? else {
        return Ok(None);
    };
    a.students = load_assigned_students(conn, &a.id)?;
    Ok(Some(a))
}

/// Every assignment owed by `student_id`, newest first.
pub fn list_assignments(conn: &Connection, student_id: &str) -> EngineResult<Vec<Assignment>> {
    let sql = format!(
        "SELECT {ASSIGNMENT_COLS} FROM assignments
         WHERE id IN (SELECT assignment_id FROM assignment_students WHERE student_id = ?)
         ORDER BY assigned_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map([student_id], assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for a in rows.iter_mut() {
        a.students = load_assigned_students(conn, &a.id)?;
    }
    Ok(rows)
}

fn insert_assignment(conn: &Connection, a: &Assignment) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO assignments(id, assessment_id, assessment_title, template_id, category_id,
           category_name, assigned_by, assigned_at, passing_threshold, total_assigned,
           completion_count, completion_rate, has_customization, customized_assessment_id, notes)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            a.id,
            a.assessment_id,
            a.assessment_title,
            a.template_id,
            a.category_id,
            a.category_name,
            a.assigned_by,
            a.assigned_at,
            a.passing_threshold,
            a.total_assigned,
            a.completion_count,
            a.completion_rate,
            a.has_customization as i64,
            a.customized_assessment_id,
            a.notes,
        ],
    )?;
    for s in &a.students {
        conn.execute(
            "INSERT INTO assignment_students(assignment_id, student_id, status, reading_level, updated_at)
             VALUES(?, ?, ?, ?, ?)",
            (&a.id, &s.user_id, s.status.as_str(), &s.reading_level, &a.assigned_at),
        )?;
    }
    Ok(())
}

/// All writes for one category. The caller owns the transaction boundary.
fn assign_one(
    ctx: AssignContext<'_>,
    conn: &Connection,
    req: &AssignRequest,
    student_id: &str,
    cat: &CategoryRequest,
) -> EngineResult<Assignment> {
    let template = match content::find_active_template(conn, cat.category_id, &req.reading_level)? {
        Some(t) => t,
        None => content::create_placeholder_template(
            conn,
            cat.category_id,
            &cat.category_name,
            &req.reading_level,
            ctx.config.default_passing_threshold,
        )?,
    };

    let effective = match req.customizations.as_ref() {
        Some(spec) if spec.touches(&template.id) => {
            match customize::customize_for_student(conn, &template, spec, student_id) {
                Ok(Some(ca)) => EffectiveAssessment::Customized(ca),
                Ok(None) => EffectiveAssessment::Canonical(template),
                Err(e) => {
                    tracing::warn!(
                        template_id = %template.id,
                        student_id,
                        error = %e,
                        "customization failed, assigning canonical template"
                    );
                    EffectiveAssessment::Canonical(template)
                }
            }
        }
        _ => EffectiveAssessment::Canonical(template),
    };

    let now = db::now_rfc3339();
    let customized_id = match &effective {
        EffectiveAssessment::Customized(ca) => Some(ca.id.clone()),
        EffectiveAssessment::Canonical(_) => None,
    };
    let assignment = Assignment {
        id: Uuid::new_v4().to_string(),
        assessment_id: effective.id().to_string(),
        assessment_title: effective.title().to_string(),
        template_id: effective.template_id().to_string(),
        category_id: cat.category_id,
        category_name: cat.category_name.clone(),
        assigned_by: req
            .assigned_by
            .clone()
            .or_else(|| req.customizations.as_ref().and_then(|s| s.teacher_id.clone())),
        assigned_at: now.clone(),
        passing_threshold: effective.passing_threshold(),
        students: vec![AssignedStudent {
            user_id: student_id.to_string(),
            status: AssignmentStatus::Pending,
            reading_level: req.reading_level.clone(),
        }],
        total_assigned: 1,
        completion_count: 0,
        completion_rate: 0.0,
        has_customization: customized_id.is_some(),
        customized_assessment_id: customized_id,
        notes: None,
    };
    insert_assignment(conn, &assignment)?;
    let response = responses::open_empty_response(conn, &assignment, student_id)?;

    audit::emit(
        ctx.sink,
        conn,
        student_id,
        "assessment_assigned",
        json!({
            "assignmentId": assignment.id,
            "assessmentId": assignment.assessment_id,
            "categoryId": cat.category_id,
            "categoryName": cat.category_name,
            "readingLevel": req.reading_level,
            "customized": assignment.has_customization,
            "responseId": response.id,
        }),
    );

    let existing = progress::load_progress(conn, student_id)?;
    let existed = existing.is_some();
    let mut ledger = match existing {
        Some(p) => p,
        None => progress::CategoryProgress::skeleton(student_id, &ctx.config.catalog),
    };
    ledger.mark_assigned(
        cat.category_id,
        &cat.category_name,
        &assignment.assessment_id,
        existed.then_some(now.as_str()),
    );
    progress::save_progress(conn, &mut ledger)?;

    Ok(assignment)
}

fn validate_request(req: &AssignRequest) -> EngineResult<()> {
    if req.student_id.trim().is_empty() {
        return Err(EngineError::validation("studentId must not be empty"));
    }
    if req.reading_level.trim().is_empty() {
        return Err(EngineError::validation("readingLevel must not be empty"));
    }
    if req.categories.is_empty() {
        return Err(EngineError::validation("categories must not be empty"));
    }
    Ok(())
}

/// Assigns each requested category to one student.
#[tracing::instrument(skip(ctx, req), fields(student = %req.student_id, categories = req.categories.len()))]
pub fn assign_categories(
    ctx: AssignContext<'_>,
    req: &AssignRequest,
    atomicity: BatchAtomicity,
) -> Result<Vec<Assignment>, AssignFailure> {
    validate_request(req)?;
    let student = directory::require_student(ctx.conn, &req.student_id)?;

    match atomicity {
        BatchAtomicity::PerCategory => {
            let mut committed = Vec::new();
            for cat in &req.categories {
                let unit = db::begin_write(ctx.conn).and_then(|tx| {
                    let a = assign_one(ctx, &tx, req, &student.id, cat)?;
                    tx.commit()?;
                    Ok(a)
                });
                match unit {
                    Ok(a) => {
                        tracing::info!(assignment_id = %a.id, category_id = cat.category_id, "category assigned");
                        committed.push(a);
                    }
                    Err(error) => {
                        tracing::warn!(
                            category_id = cat.category_id,
                            committed = committed.len(),
                            error = %error,
                            "category rolled back"
                        );
                        return Err(AssignFailure {
                            committed,
                            failed_category_id: Some(cat.category_id),
                            error,
                        });
                    }
                }
            }
            Ok(committed)
        }
        BatchAtomicity::AllOrNothing => {
            let tx = db::begin_write(ctx.conn)?;
            let mut out = Vec::new();
            for cat in &req.categories {
                match assign_one(ctx, &tx, req, &student.id, cat) {
                    Ok(a) => out.push(a),
                    Err(error) => {
                        tracing::warn!(category_id = cat.category_id, error = %error, "request rolled back");
                        return Err(AssignFailure {
                            committed: Vec::new(),
                            failed_category_id: Some(cat.category_id),
                            error,
                        });
                    }
                }
            }
            tx.commit().map_err(EngineError::from)?;
            tracing::info!(assignments = out.len(), "request committed");
            Ok(out)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSuccess {
    pub student_id: String,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub student_id: String,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub committed_assignment_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub successes: Vec<BatchSuccess>,
    pub failures: Vec<BatchFailure>,
}

/// One independent single-student run per id; failures are collected, not propagated.
pub fn assign_categories_batch(
    ctx: AssignContext<'_>,
    student_ids: &[String],
    reading_level: &str,
    categories: &[CategoryRequest],
    assigned_by: Option<&str>,
    atomicity: BatchAtomicity,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for student_id in student_ids {
        let req = AssignRequest {
            student_id: student_id.clone(),
            reading_level: reading_level.to_string(),
            categories: categories.to_vec(),
            customizations: None,
            assigned_by: assigned_by.map(str::to_string),
        };
        match assign_categories(ctx, &req, atomicity) {
            Ok(assignments) => outcome.successes.push(BatchSuccess {
                student_id: student_id.clone(),
                assignments,
            }),
            Err(f) => {
                tracing::warn!(student_id = %student_id, error = %f.error, "batch member failed");
                outcome.failures.push(BatchFailure {
                    student_id: student_id.clone(),
                    code: f.error.code().to_string(),
                    message: f.error.to_string(),
                    retryable: f.error.is_retryable(),
                    committed_assignment_ids: f.committed.into_iter().map(|a| a.id).collect(),
                })
            }
        }
    }
    outcome
}

/// Manual status override. Completion also marks the category complete in
/// each assigned student's progress ledger.
pub fn update_assignment_status(
    ctx: AssignContext<'_>,
    assignment_id: &str,
    status: &str,
    notes: Option<&str>,
) -> EngineResult<Assignment> {
    let status = AssignmentStatus::parse(status).ok_or_else(|| {
        EngineError::validation(format!(
            "invalid status '{status}' (expected pending, in_progress, completed or cancelled)"
        ))
    })?;
    let tx = db::begin_write(ctx.conn)?;
    let assignment = load_assignment(&tx, assignment_id)?
        .ok_or_else(|| EngineError::not_found("assignment", assignment_id))?;
    let now = db::now_rfc3339();

    tx.execute(
        "UPDATE assignment_students SET status = ?, updated_at = ? WHERE assignment_id = ?",
        (status.as_str(), &now, assignment_id),
    )?;
    tx.execute(
        "UPDATE assignments SET
           completion_count = (SELECT COUNT(*) FROM assignment_students
                               WHERE assignment_id = ?1 AND status = 'completed'),
           completion_rate = CASE WHEN total_assigned > 0 THEN
               100.0 * (SELECT COUNT(*) FROM assignment_students
                        WHERE assignment_id = ?1 AND status = 'completed') / total_assigned
             ELSE 0 END,
           notes = COALESCE(?2, notes)
         WHERE id = ?1",
        (assignment_id, notes),
    )?;

    if status == AssignmentStatus::Completed {
        for s in &assignment.students {
            let mut ledger = progress::load_or_skeleton(&tx, &s.user_id, &ctx.config.catalog)?;
            ledger.set_status(
                assignment.category_id,
                &assignment.category_name,
                CategoryStatus::Completed,
                &now,
            );
            progress::save_progress(&tx, &mut ledger)?;
        }
    }

    let updated = load_assignment(&tx, assignment_id)?
        .ok_or_else(|| EngineError::not_found("assignment", assignment_id))?;
    tx.commit()?;
    tracing::info!(assignment_id, status = status.as_str(), "assignment status updated");
    Ok(updated)
}
