use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::{self, json_col};
use crate::error::{EngineError, EngineResult};
use crate::model::{AssessmentTemplate, CustomizedAssessment, EffectiveAssessment, Question};
use crate::responses;

/// `{millis}{4 hex}`: sortable, and distinct for ids minted within one millisecond.
pub fn timestamp_suffix() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("{}{}", chrono::Utc::now().timestamp_millis(), &simple[..4])
}

const TEMPLATE_COLS: &str = "id, title, category_id, category_name, reading_level, questions,
    passing_threshold, is_active, is_published, is_placeholder, created_at";

fn template_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AssessmentTemplate> {
    Ok(AssessmentTemplate {
        id: r.get(0)?,
        title: r.get(1)?,
        category_id: r.get(2)?,
        category_name: r.get(3)?,
        reading_level: r.get(4)?,
        questions: json_col(r, 5)?,
        passing_threshold: r.get(6)?,
        is_active: r.get::<_, i64>(7)? != 0,
        is_published: r.get::<_, i64>(8)? != 0,
        is_placeholder: r.get::<_, i64>(9)? != 0,
        created_at: r.get(10)?,
    })
}

const CUSTOMIZED_COLS: &str = "id, original_template_id, student_id, teacher_id, category_id,
    title, questions, passing_threshold, created_at";

fn customized_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<CustomizedAssessment> {
    Ok(CustomizedAssessment {
        id: r.get(0)?,
        original_template_id: r.get(1)?,
        student_id: r.get(2)?,
        teacher_id: r.get(3)?,
        category_id: r.get(4)?,
        title: r.get(5)?,
        questions: json_col(r, 6)?,
        passing_threshold: r.get(7)?,
        created_at: r.get(8)?,
    })
}

/// Newest active+published template for a (category, level) pair.
pub fn find_active_template(
    conn: &Connection,
    category_id: i64,
    reading_level: &str,
) -> EngineResult<Option<AssessmentTemplate>> {
    let sql = format!(
        "SELECT {TEMPLATE_COLS} FROM templates
         WHERE category_id = ? AND reading_level = ? AND is_active = 1 AND is_published = 1
         ORDER BY is_placeholder ASC, created_at DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, (category_id, reading_level), template_from_row)
        .optional()?)
}

pub fn load_template(conn: &Connection, id: &str) -> EngineResult<Option<AssessmentTemplate>> {
    let sql = format!("SELECT {TEMPLATE_COLS} FROM templates WHERE id = ?");
    Ok(conn.query_row(&sql, [id], template_from_row).optional()?)
}

pub fn load_customized(conn: &Connection, id: &str) -> EngineResult<Option<CustomizedAssessment>> {
    let sql = format!("SELECT {CUSTOMIZED_COLS} FROM customized_assessments WHERE id = ?");
    Ok(conn.query_row(&sql, [id], customized_from_row).optional()?)
}

/// Most recent customization of `template_id` made for `student_id`.
pub fn latest_customization(
    conn: &Connection,
    template_id: &str,
    student_id: &str,
) -> EngineResult<Option<CustomizedAssessment>> {
    let sql = format!(
        "SELECT {CUSTOMIZED_COLS} FROM customized_assessments
         WHERE original_template_id = ? AND student_id = ?
         ORDER BY created_at DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, (template_id, student_id), customized_from_row)
        .optional()?)
}

/// Synthesizes the zero-question stand-in used when nothing is authored yet.
pub fn create_placeholder_template(
    conn: &Connection,
    category_id: i64,
    category_name: &str,
    reading_level: &str,
    passing_threshold: f64,
) -> EngineResult<AssessmentTemplate> {
    let template = AssessmentTemplate {
        id: format!("MA-{}-{}", category_id, timestamp_suffix()),
        title: format!("{category_name} Assessment ({reading_level})"),
        category_id,
        category_name: category_name.to_string(),
        reading_level: reading_level.to_string(),
        questions: Vec::new(),
        passing_threshold,
        is_active: true,
        is_published: true,
        is_placeholder: true,
        created_at: db::now_rfc3339(),
    };
    insert_template(conn, &template)?;
    tracing::info!(
        template_id = %template.id,
        category_id,
        reading_level,
        "created placeholder template"
    );
    Ok(template)
}

fn insert_template(conn: &Connection, t: &AssessmentTemplate) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO templates(id, title, category_id, category_name, reading_level, questions,
           passing_threshold, is_active, is_published, is_placeholder, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           category_id = excluded.category_id,
           category_name = excluded.category_name,
           reading_level = excluded.reading_level,
           questions = excluded.questions,
           passing_threshold = excluded.passing_threshold,
           is_active = excluded.is_active,
           is_published = excluded.is_published,
           is_placeholder = excluded.is_placeholder",
        rusqlite::params![
            t.id,
            t.title,
            t.category_id,
            t.category_name,
            t.reading_level,
            serde_json::to_string(&t.questions)?,
            t.passing_threshold,
            t.is_active as i64,
            t.is_published as i64,
            t.is_placeholder as i64,
            t.created_at,
        ],
    )?;
    Ok(())
}

/// Loads an authored template from the authoring side of the boundary.
pub fn upsert_template(conn: &Connection, params: &serde_json::Value) -> EngineResult<AssessmentTemplate> {
    let str_param = |key: &str| {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let category_id = params
        .get("categoryId")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| EngineError::validation("missing categoryId"))?;
    let category_name = str_param("categoryName")
        .ok_or_else(|| EngineError::validation("missing categoryName"))?;
    let reading_level = str_param("readingLevel")
        .ok_or_else(|| EngineError::validation("missing readingLevel"))?;
    let questions = match params.get("questions") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(Question::from_json)
            .collect::<EngineResult<Vec<_>>>()?,
        Some(_) => return Err(EngineError::validation("questions must be an array")),
    };
    let mut seen = HashSet::new();
    if let Some(dup) = questions.iter().find(|q| !seen.insert(q.id.as_str())) {
        return Err(EngineError::validation(format!("duplicate question id {}", dup.id)));
    }
    let passing_threshold = params
        .get("passingThreshold")
        .and_then(|v| v.as_f64())
        .unwrap_or(crate::config::DEFAULT_PASSING_THRESHOLD);
    if !(0.0..=100.0).contains(&passing_threshold) {
        return Err(EngineError::validation("passingThreshold must be within 0..=100"));
    }
    let id = str_param("id").unwrap_or_else(|| format!("MA-{}-{}", category_id, timestamp_suffix()));
    let created_at = load_template(conn, &id)?
        .map(|t| t.created_at)
        .unwrap_or_else(db::now_rfc3339);
    let template = AssessmentTemplate {
        title: str_param("title").unwrap_or_else(|| format!("{category_name} Assessment")),
        id,
        category_id,
        category_name,
        reading_level,
        questions,
        passing_threshold,
        is_active: params.get("isActive").and_then(|v| v.as_bool()).unwrap_or(true),
        is_published: params.get("isPublished").and_then(|v| v.as_bool()).unwrap_or(true),
        is_placeholder: false,
        created_at,
    };
    insert_template(conn, &template)?;
    Ok(template)
}

/// Where a stored record says its assessment came from.
#[derive(Debug, Clone, Copy)]
pub struct ResolveHint<'a> {
    pub template_id: &'a str,
    pub customized_assessment_id: Option<&'a str>,
}

/// Customized record when one is named and present; canonical otherwise.
/// A missing customization is never an error on its own.
pub fn resolve_effective(conn: &Connection, hint: ResolveHint<'_>) -> EngineResult<EffectiveAssessment> {
    if let Some(ca_id) = hint.customized_assessment_id {
        match load_customized(conn, ca_id)? {
            Some(ca) => return Ok(EffectiveAssessment::Customized(ca)),
            None => tracing::warn!(
                customized_assessment_id = ca_id,
                template_id = hint.template_id,
                "customized assessment missing, falling back to canonical"
            ),
        }
    }
    load_template(conn, hint.template_id)?
        .map(EffectiveAssessment::Canonical)
        .ok_or_else(|| EngineError::not_found("assessment", hint.template_id))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentQuestions {
    pub assessment_id: String,
    pub template_id: String,
    pub is_customized: bool,
    pub title: String,
    pub passing_threshold: f64,
    pub questions: Vec<Question>,
}

/// The questions `student_id` should see for `assessment_id`: their own
/// customization when one exists, the canonical template otherwise.
pub fn questions_for_student(
    conn: &Connection,
    assessment_id: &str,
    student_id: &str,
    include_answer_key: bool,
) -> EngineResult<StudentQuestions> {
    let effective = match load_customized(conn, assessment_id)? {
        Some(ca) if ca.student_id == student_id => EffectiveAssessment::Customized(ca),
        _ => match responses::find_response(conn, assessment_id, student_id)? {
            Some(r) => resolve_effective(
                conn,
                ResolveHint {
                    template_id: &r.template_id,
                    customized_assessment_id: r
                        .customized_assessment_id
                        .as_deref()
                        .filter(|_| r.has_customization),
                },
            )?,
            None => match latest_customization(conn, assessment_id, student_id)? {
                Some(ca) => EffectiveAssessment::Customized(ca),
                None => load_template(conn, assessment_id)?
                    .map(EffectiveAssessment::Canonical)
                    .ok_or_else(|| EngineError::not_found("assessment", assessment_id))?,
            },
        },
    };

    let mut questions = effective.questions().to_vec();
    if !include_answer_key {
        for q in questions.iter_mut() {
            for o in q.options.iter_mut() {
                o.is_correct = false;
            }
        }
    }
    Ok(StudentQuestions {
        assessment_id: effective.id().to_string(),
        template_id: effective.template_id().to_string(),
        is_customized: effective.is_customized(),
        title: effective.title().to_string(),
        passing_threshold: effective.passing_threshold(),
        questions,
    })
}

/// Natural-key column per content collection.
fn natural_key_field(collection: &str) -> &'static str {
    match collection {
        "letters" => "letterID",
        "syllables" => "syllableID",
        "words" => "wordID",
        "sentences" => "sentenceID",
        "short_stories" | "shortstories" => "storyID",
        _ => "key",
    }
}

pub fn put_content(conn: &Connection, collection: &str, id: &str, data: &serde_json::Value) -> EngineResult<()> {
    if collection.trim().is_empty() || id.trim().is_empty() {
        return Err(EngineError::validation("collection and id are required"));
    }
    if !data.is_object() {
        return Err(EngineError::validation("content data must be an object"));
    }
    let natural_key = data.get(natural_key_field(collection)).and_then(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    conn.execute(
        "INSERT INTO content_items(collection, id, natural_key, data) VALUES(?, ?, ?, ?)
         ON CONFLICT(collection, id) DO UPDATE SET natural_key = excluded.natural_key, data = excluded.data",
        (collection, id, natural_key, data.to_string()),
    )?;
    Ok(())
}

/// Primary id first, then the collection's natural key.
pub fn get_content(conn: &Connection, collection: &str, content_id: &str) -> EngineResult<serde_json::Value> {
    let fetch = |sql: &str| -> EngineResult<Option<(String, String)>> {
        Ok(conn
            .query_row(sql, (collection, content_id), |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?)
    };
    let hit = match fetch("SELECT id, data FROM content_items WHERE collection = ? AND id = ?")? {
        Some(v) => Some(v),
        None => {
            tracing::debug!(collection, content_id, "primary id miss, trying natural key");
            fetch(
                "SELECT id, data FROM content_items WHERE collection = ? AND natural_key = ?
                 ORDER BY id LIMIT 1",
            )?
        }
    };
    let Some((id, data)) = hit else {
        return Err(EngineError::not_found("content", format!("{collection}/{content_id}")));
    };
    let mut item: serde_json::Value = serde_json::from_str(&data)?;
    if let Some(obj) = item.as_object_mut() {
        obj.insert("id".into(), json!(id));
        obj.insert("collection".into(), json!(collection));
    }
    Ok(item)
}

pub const READING_LEVELS: &[&str] = &[
    "Low Emerging",
    "High Emerging",
    "Developing",
    "Transitioning",
    "At Grade Level",
];

/// Fixed placement policy: which categories a reading level should work on.
pub fn recommended_categories(reading_level: &str) -> EngineResult<&'static [i64]> {
    match reading_level.trim() {
        "Low Emerging" => Ok(&[1, 2, 3]),
        "High Emerging" => Ok(&[2, 3, 4]),
        "Developing" => Ok(&[3, 4, 5]),
        "Transitioning" => Ok(&[4, 5]),
        "At Grade Level" => Ok(&[5]),
        other => Err(EngineError::validation(format!(
            "unknown readingLevel '{other}' (expected one of: {})",
            READING_LEVELS.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_found_as_active_template() {
        let conn = db::open_temp();
        assert!(find_active_template(&conn, 1, "Low Emerging").expect("query").is_none());
        let p = create_placeholder_template(&conn, 1, "Alphabet Knowledge", "Low Emerging", 75.0)
            .expect("placeholder");
        assert!(p.id.starts_with("MA-1-"));
        assert!(p.questions.is_empty());
        let found = find_active_template(&conn, 1, "Low Emerging").expect("query");
        assert_eq!(found.map(|t| t.id), Some(p.id));
    }

    #[test]
    fn authored_template_wins_over_placeholder() {
        let conn = db::open_temp();
        create_placeholder_template(&conn, 2, "Phonological Awareness", "Developing", 75.0)
            .expect("placeholder");
        let authored = upsert_template(
            &conn,
            &json!({
                "id": "TPL-2",
                "categoryId": 2,
                "categoryName": "Phonological Awareness",
                "readingLevel": "Developing",
                "questions": [{ "id": "q1", "options": [{ "id": "a", "isCorrect": true }] }]
            }),
        )
        .expect("upsert");
        let found = find_active_template(&conn, 2, "Developing").expect("query").expect("some");
        assert_eq!(found.id, authored.id);
        assert!(!found.is_placeholder);
    }

    #[test]
    fn duplicate_question_ids_are_rejected() {
        let conn = db::open_temp();
        let e = upsert_template(
            &conn,
            &json!({
                "id": "TPL-dup",
                "categoryId": 1,
                "categoryName": "Alphabet Knowledge",
                "readingLevel": "Low Emerging",
                "questions": [
                    { "id": "q1", "options": [{ "id": "a", "isCorrect": true }] },
                    { "id": "q1", "options": [{ "id": "b", "isCorrect": true }] }
                ]
            }),
        )
        .unwrap_err();
        assert_eq!(e.code(), "bad_params");
        assert!(load_template(&conn, "TPL-dup").expect("query").is_none());
    }

    #[test]
    fn missing_customization_resolves_to_canonical() {
        let conn = db::open_temp();
        let t = create_placeholder_template(&conn, 3, "Decoding", "Developing", 75.0).expect("t");
        let eff = resolve_effective(
            &conn,
            ResolveHint {
                template_id: &t.id,
                customized_assessment_id: Some("CA-3-gone"),
            },
        )
        .expect("resolve");
        assert!(!eff.is_customized());
        assert_eq!(eff.id(), t.id);
    }

    #[test]
    fn content_lookup_falls_back_to_natural_key() {
        let conn = db::open_temp();
        put_content(&conn, "letters", "64f0aa", &json!({ "letterID": "L-7", "glyph": "G" })).expect("put");
        let by_id = get_content(&conn, "letters", "64f0aa").expect("by id");
        assert_eq!(by_id["glyph"], json!("G"));
        let by_key = get_content(&conn, "letters", "L-7").expect("by key");
        assert_eq!(by_key["id"], json!("64f0aa"));
        let miss = get_content(&conn, "letters", "L-8").unwrap_err();
        assert_eq!(miss.code(), "not_found");
    }

    #[test]
    fn recommendation_table_is_fixed() {
        assert_eq!(recommended_categories("Low Emerging").expect("level"), &[1, 2, 3]);
        assert_eq!(recommended_categories("At Grade Level").expect("level"), &[5]);
        assert!(recommended_categories("Fluent").is_err());
    }
}
