use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model;
use crate::responses::{self, Review};
use crate::scoring;
use serde_json::json;

fn assessment_and_student(req: &Request) -> Result<(String, String), serde_json::Value> {
    let assessment_id = required_str(req, "assessmentId")?;
    let student_id = required_str(req, "studentId")?;
    Ok((assessment_id, student_id))
}

fn handle_responses_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (assessment_id, student_id) = match assessment_and_student(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let answers = match model::parse_answers(req.params.get("answers")) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, &e),
    };
    match scoring::submit_response(conn, &state.config.catalog, &assessment_id, &student_id, answers) {
        Ok(result) => ok(&req.id, json!(result)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_responses_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (assessment_id, student_id) = match assessment_and_student(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match responses::start_attempt(conn, &assessment_id, &student_id) {
        Ok(r) => ok(&req.id, json!({ "response": r })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_responses_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (assessment_id, student_id) = match assessment_and_student(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match responses::require_response(conn, &assessment_id, &student_id) {
        Ok(r) => ok(&req.id, json!({ "response": r })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_responses_review(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (assessment_id, student_id) = match assessment_and_student(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let review = Review {
        feedback: optional_str(req, "feedback"),
        reviewed_by: optional_str(req, "reviewedBy"),
        next_steps: optional_str(req, "nextSteps"),
    };
    match responses::review_response(conn, &assessment_id, &student_id, &review) {
        Ok(r) => ok(&req.id, json!({ "response": r })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "responses.submit" => Some(handle_responses_submit(state, req)),
        "responses.start" => Some(handle_responses_start(state, req)),
        "responses.get" => Some(handle_responses_get(state, req)),
        "responses.review" => Some(handle_responses_review(state, req)),
        _ => None,
    }
}
