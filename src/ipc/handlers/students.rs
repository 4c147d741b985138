use crate::directory;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_students_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let display_name = optional_str(req, "displayName").unwrap_or_else(|| id.clone());
    let external_no = match req.params.get("externalNo") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "externalNo must be an integer", None),
        },
    };
    let reading_level = optional_str(req, "readingLevel");

    match directory::upsert_student(conn, &id, external_no, &display_name, reading_level.as_deref()) {
        Ok(s) => ok(&req.id, json!({ "student": s })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::require_student(conn, &key) {
        Ok(s) => ok(&req.id, json!({ "student": s })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.upsert" => Some(handle_students_upsert(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        _ => None,
    }
}
