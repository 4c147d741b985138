use crate::analytics;
use crate::audit;
use crate::error::EngineError;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::progress;
use serde_json::json;

fn handle_progress_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match progress::load_progress(conn, &student_id) {
        Ok(Some(p)) => ok(&req.id, json!({ "progress": p })),
        Ok(None) => engine_err(&req.id, &EngineError::not_found("progress", student_id)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_progress_update_category_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let category_id = match required_i64(req, "categoryId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match progress::update_category_status(conn, &state.config.catalog, &student_id, category_id, &status) {
        Ok(p) => ok(&req.id, json!({ "progress": p })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_analytics_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match analytics::student_analytics(conn, &student_id) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match audit::list_events(conn, &student_id) {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.get" => Some(handle_progress_get(state, req)),
        "progress.updateCategoryStatus" => Some(handle_progress_update_category_status(state, req)),
        "analytics.student" => Some(handle_analytics_student(state, req)),
        "events.list" => Some(handle_events_list(state, req)),
        _ => None,
    }
}
