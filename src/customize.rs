use rusqlite::Connection;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::content::timestamp_suffix;
use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::model::{AssessmentTemplate, ContentRef, CustomizedAssessment, Question};

/// Teacher request to tailor templates for one student.
///
/// Keys are `{templateId}-{questionId}`. Content references are already
/// normalized; a malformed request is rejected before anything is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomizationSpec {
    pub teacher_id: Option<String>,
    /// Selection order is kept when the client sends an array.
    pub selected: Vec<String>,
    pub replacements: BTreeMap<String, ContentRef>,
}

impl CustomizationSpec {
    pub fn parse(v: Option<&serde_json::Value>) -> EngineResult<Option<Self>> {
        let Some(v) = v else {
            return Ok(None);
        };
        if v.is_null() {
            return Ok(None);
        }
        let Some(obj) = v.as_object() else {
            return Err(EngineError::validation("customizations must be an object"));
        };

        let mut spec = CustomizationSpec {
            teacher_id: obj
                .get("teacherId")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            ..Default::default()
        };

        match obj.get("selectedQuestions") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Array(items)) => {
                for item in items {
                    let Some(key) = item.as_str() else {
                        return Err(EngineError::validation(
                            "selectedQuestions must contain only strings",
                        ));
                    };
                    if !spec.selected.iter().any(|k| k == key) {
                        spec.selected.push(key.to_string());
                    }
                }
            }
            Some(serde_json::Value::Object(map)) => {
                for (key, flag) in map {
                    if flag.as_bool().unwrap_or(false) {
                        spec.selected.push(key.clone());
                    }
                }
            }
            Some(_) => {
                return Err(EngineError::validation(
                    "selectedQuestions must be an array or an object",
                ))
            }
        }

        match obj.get("contentReplacements") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(map)) => {
                for (key, raw) in map {
                    if raw.is_null() {
                        continue;
                    }
                    let r = ContentRef::from_json(raw).map_err(|e| {
                        EngineError::validation(format!("contentReplacements.{key}: {e}"))
                    })?;
                    spec.replacements.insert(key.clone(), r);
                }
            }
            Some(_) => {
                return Err(EngineError::validation(
                    "contentReplacements must be an object",
                ))
            }
        }

        Ok(Some(spec))
    }

    fn question_id_for<'a>(key: &'a str, template_id: &str) -> Option<&'a str> {
        key.strip_prefix(template_id)
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|qid| !qid.is_empty())
    }

    /// Question ids selected for `template_id`, in request order.
    pub fn selected_for(&self, template_id: &str) -> Vec<&str> {
        self.selected
            .iter()
            .filter_map(|k| Self::question_id_for(k, template_id))
            .collect()
    }

    pub fn replacements_for(&self, template_id: &str) -> BTreeMap<&str, &ContentRef> {
        self.replacements
            .iter()
            .filter_map(|(k, r)| Self::question_id_for(k, template_id).map(|qid| (qid, r)))
            .collect()
    }

    pub fn touches(&self, template_id: &str) -> bool {
        !self.selected_for(template_id).is_empty() || !self.replacements_for(template_id).is_empty()
    }
}

/// Derives a student-scoped variant of `template`.
///
/// Returns `Ok(None)` when the customization never mentions this template. With no
/// selection but some remaps, every template question is kept.
pub fn build_customized(
    template: &AssessmentTemplate,
    spec: &CustomizationSpec,
    student_id: &str,
) -> EngineResult<Option<CustomizedAssessment>> {
    if !spec.touches(&template.id) {
        return Ok(None);
    }
    let selected = spec.selected_for(&template.id);
    let replacements = spec.replacements_for(&template.id);

    let by_id: BTreeMap<&str, &Question> =
        template.questions.iter().map(|q| (q.id.as_str(), q)).collect();

    let picked: Vec<&Question> = if selected.is_empty() {
        template.questions.iter().collect()
    } else {
        selected
            .iter()
            .map(|qid| {
                by_id.get(qid).copied().ok_or_else(|| {
                    EngineError::Customization(format!(
                        "question {qid} is not part of template {}",
                        template.id
                    ))
                })
            })
            .collect::<EngineResult<Vec<_>>>()?
    };

    for qid in replacements.keys() {
        if !picked.iter().any(|q| q.id == *qid) {
            return Err(EngineError::Customization(format!(
                "content replacement targets unselected question {qid}"
            )));
        }
    }

    let questions = picked
        .into_iter()
        .map(|q| {
            let mut copy = q.clone();
            let short = Uuid::new_v4().simple().to_string();
            copy.id = format!("{}-{}", q.id, &short[..8]);
            copy.original_question_id = Some(q.id.clone());
            if let Some(r) = replacements.get(q.id.as_str()) {
                let mut r = (*r).clone();
                if r.collection.is_none() {
                    r.collection = q.content.as_ref().and_then(|c| c.collection.clone());
                }
                copy.content = Some(r);
            }
            copy
        })
        .collect::<Vec<_>>();

    if questions.is_empty() {
        return Err(EngineError::Customization(format!(
            "customization of {} leaves no questions",
            template.id
        )));
    }

    Ok(Some(CustomizedAssessment {
        id: format!("CA-{}-{}", template.category_id, timestamp_suffix()),
        original_template_id: template.id.clone(),
        student_id: student_id.to_string(),
        teacher_id: spec.teacher_id.clone(),
        category_id: template.category_id,
        title: format!("{} (customized)", template.title),
        questions,
        passing_threshold: template.passing_threshold,
        created_at: db::now_rfc3339(),
    }))
}

/// Single INSERT, so a failure leaves nothing behind in the enclosing transaction.
pub fn persist_customized(conn: &Connection, ca: &CustomizedAssessment) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO customized_assessments(id, original_template_id, student_id, teacher_id,
           category_id, title, questions, passing_threshold, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            ca.id,
            ca.original_template_id,
            ca.student_id,
            ca.teacher_id,
            ca.category_id,
            ca.title,
            serde_json::to_string(&ca.questions)?,
            ca.passing_threshold,
            ca.created_at,
        ],
    )?;
    Ok(())
}

/// Builds and stores a customization; any failure is reported as
/// `EngineError::Customization` for the caller to fall back on.
pub fn customize_for_student(
    conn: &Connection,
    template: &AssessmentTemplate,
    spec: &CustomizationSpec,
    student_id: &str,
) -> EngineResult<Option<CustomizedAssessment>> {
    let Some(ca) = build_customized(template, spec, student_id)? else {
        return Ok(None);
    };
    persist_customized(conn, &ca).map_err(|e| EngineError::Customization(e.to_string()))?;
    tracing::info!(
        customized_assessment_id = %ca.id,
        template_id = %template.id,
        student_id,
        questions = ca.questions.len(),
        "stored customized assessment"
    );
    Ok(Some(ca))
}
