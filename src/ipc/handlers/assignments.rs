use crate::assign::{self, AssignContext, AssignRequest};
use crate::audit::TableSink;
use crate::config::BatchAtomicity;
use crate::customize::CustomizationSpec;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::collections::HashSet;

fn parse_atomicity(state: &AppState, req: &Request) -> Result<BatchAtomicity, serde_json::Value> {
    match req.params.get("atomicity").and_then(|v| v.as_str()) {
        None => Ok(state.config.batch_atomicity),
        Some(s) => BatchAtomicity::parse(s).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("unknown atomicity '{s}' (expected per_category or all_or_nothing)"),
                None,
            )
        }),
    }
}

fn handle_assignments_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let reading_level = match required_str(req, "readingLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let categories = match assign::parse_categories(req.params.get("categories"), &state.config) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, &e),
    };
    let customizations = match CustomizationSpec::parse(req.params.get("customizations")) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, &e),
    };
    let atomicity = match parse_atomicity(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = AssignContext {
        conn,
        config: &state.config,
        sink: &TableSink,
    };
    let request = AssignRequest {
        student_id,
        reading_level,
        categories,
        customizations,
        assigned_by: optional_str(req, "assignedBy"),
    };
    match assign::assign_categories(ctx, &request, atomicity) {
        Ok(assignments) => ok(
            &req.id,
            json!({ "assignments": assignments, "atomicity": atomicity.as_str() }),
        ),
        Err(f) => {
            let mut details = f.error.details();
            details["atomicity"] = json!(atomicity.as_str());
            details["failedCategoryId"] = json!(f.failed_category_id);
            details["committedAssignmentIds"] =
                json!(f.committed.iter().map(|a| a.id.as_str()).collect::<Vec<_>>());
            err(&req.id, f.error.code(), f.error.to_string(), Some(details))
        }
    }
}

fn handle_assignments_assign_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(raw_ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds", None);
    };
    // Non-string entries become empty ids so they fail individually.
    let mut seen = HashSet::new();
    let student_ids: Vec<String> = raw_ids
        .iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        })
        .filter(|id| id.is_empty() || seen.insert(id.clone()))
        .collect();
    if student_ids.is_empty() {
        return err(&req.id, "bad_params", "studentIds must not be empty", None);
    }
    let reading_level = match required_str(req, "readingLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let categories = match assign::parse_categories(req.params.get("categories"), &state.config) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, &e),
    };
    let atomicity = match parse_atomicity(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assigned_by = optional_str(req, "assignedBy");

    let ctx = AssignContext {
        conn,
        config: &state.config,
        sink: &TableSink,
    };
    let outcome = assign::assign_categories_batch(
        ctx,
        &student_ids,
        &reading_level,
        &categories,
        assigned_by.as_deref(),
        atomicity,
    );
    ok(&req.id, json!(outcome))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match assign::list_assignments(conn, &student_id) {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_assignments_update_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let notes = optional_str(req, "notes");
    let ctx = AssignContext {
        conn,
        config: &state.config,
        sink: &TableSink,
    };
    match assign::update_assignment_status(ctx, &assignment_id, &status, notes.as_deref()) {
        Ok(a) => ok(&req.id, json!({ "assignment": a })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.assign" => Some(handle_assignments_assign(state, req)),
        "assignments.assignBatch" => Some(handle_assignments_assign_batch(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "assignments.updateStatus" => Some(handle_assignments_update_status(state, req)),
        _ => None,
    }
}
