use crate::content;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_content_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content_id = match required_str(req, "contentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match content::get_content(conn, &collection, &content_id) {
        Ok(item) => ok(&req.id, json!({ "item": item })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_content_put(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content_id = match required_str(req, "contentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let data = req.params.get("data").cloned().unwrap_or_else(|| json!({}));
    match content::put_content(conn, &collection, &content_id, &data) {
        Ok(()) => ok(&req.id, json!({ "collection": collection, "contentId": content_id })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_recommended_categories(state: &mut AppState, req: &Request) -> serde_json::Value {
    let level = match required_str(req, "readingLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match content::recommended_categories(&level) {
        Ok(ids) => {
            let categories: Vec<serde_json::Value> = ids
                .iter()
                .map(|id| {
                    json!({
                        "categoryId": id,
                        "categoryName": state.config.catalog.get(*id).map(|c| c.name.clone()),
                    })
                })
                .collect();
            ok(
                &req.id,
                json!({ "readingLevel": level, "categoryIds": ids, "categories": categories }),
            )
        }
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut params = req.params.clone();
    if params.is_object() && params.get("passingThreshold").is_none() {
        params["passingThreshold"] = json!(state.config.default_passing_threshold);
    }
    match content::upsert_template(conn, &params) {
        Ok(t) => ok(&req.id, json!({ "template": t })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_templates_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let template_id = match required_str(req, "templateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match content::load_template(conn, &template_id) {
        Ok(Some(t)) => ok(&req.id, json!({ "template": t })),
        Ok(None) => engine_err(
            &req.id,
            &crate::error::EngineError::not_found("template", template_id),
        ),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_assessment_questions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assessment_id = match required_str(req, "assessmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let include_answer_key = req
        .params
        .get("includeAnswerKey")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    match content::questions_for_student(conn, &assessment_id, &student_id, include_answer_key) {
        Ok(q) => ok(&req.id, json!(q)),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "content.get" => Some(handle_content_get(state, req)),
        "content.put" => Some(handle_content_put(state, req)),
        "content.recommendedCategories" => Some(handle_recommended_categories(state, req)),
        "templates.upsert" => Some(handle_templates_upsert(state, req)),
        "templates.get" => Some(handle_templates_get(state, req)),
        "assessments.questions" => Some(handle_assessment_questions(state, req)),
        _ => None,
    }
}
