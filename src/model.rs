use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical pointer into the reference content repository.
///
/// Clients send these as `"collection:id"`, a bare id, or an object with
/// `collection` and one of `id` / `contentId` / `_id` / `{"$oid": ..}`.
/// Everything is folded into this shape on ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub content_id: String,
}

impl ContentRef {
    pub fn from_json(v: &serde_json::Value) -> EngineResult<Self> {
        match v {
            serde_json::Value::String(s) => Self::from_str_form(s),
            serde_json::Value::Number(n) => Ok(ContentRef {
                collection: None,
                content_id: n.to_string(),
            }),
            serde_json::Value::Object(map) => {
                let collection = map
                    .get("collection")
                    .or_else(|| map.get("contentType"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                let raw_id = ["contentId", "id", "_id"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .ok_or_else(|| EngineError::validation("content reference has no id"))?;
                let content_id = match raw_id {
                    serde_json::Value::String(s) => s.trim().to_string(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Object(inner) => inner
                        .get("$oid")
                        .and_then(|v| v.as_str())
                        .map(|s| s.trim().to_string())
                        .ok_or_else(|| {
                            EngineError::validation("unsupported wrapped content id")
                        })?,
                    _ => return Err(EngineError::validation("unsupported content id form")),
                };
                if content_id.is_empty() {
                    return Err(EngineError::validation("content reference id is empty"));
                }
                Ok(ContentRef {
                    collection,
                    content_id,
                })
            }
            _ => Err(EngineError::validation("unsupported content reference form")),
        }
    }

    fn from_str_form(s: &str) -> EngineResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EngineError::validation("content reference id is empty"));
        }
        match s.split_once(':') {
            Some((c, id)) if !c.is_empty() && !id.is_empty() => Ok(ContentRef {
                collection: Some(c.to_string()),
                content_id: id.to_string(),
            }),
            _ => Ok(ContentRef {
                collection: None,
                content_id: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentRef>,
    /// Set on customized copies; points back at the template question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_question_id: Option<String>,
}

impl Question {
    pub fn points(&self) -> f64 {
        self.point_value.unwrap_or(1.0)
    }

    pub fn correct_option_id(&self) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.is_correct)
            .map(|o| o.id.as_str())
    }

    /// Template questions arrive with loosely-typed content references.
    pub fn from_json(v: &serde_json::Value) -> EngineResult<Self> {
        let mut v = v.clone();
        let content = match v.get("content").or_else(|| v.get("contentRef")) {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(ContentRef::from_json(raw)?),
        };
        if let Some(obj) = v.as_object_mut() {
            obj.remove("content");
            obj.remove("contentRef");
        }
        let mut q: Question = serde_json::from_value(v)
            .map_err(|e| EngineError::validation(format!("invalid question: {e}")))?;
        if q.id.trim().is_empty() {
            return Err(EngineError::validation("question id must not be empty"));
        }
        q.content = content;
        Ok(q)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentTemplate {
    pub id: String,
    pub title: String,
    pub category_id: i64,
    pub category_name: String,
    pub reading_level: String,
    pub questions: Vec<Question>,
    pub passing_threshold: f64,
    pub is_active: bool,
    pub is_published: bool,
    pub is_placeholder: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizedAssessment {
    pub id: String,
    pub original_template_id: String,
    pub student_id: String,
    pub teacher_id: Option<String>,
    pub category_id: i64,
    pub title: String,
    pub questions: Vec<Question>,
    pub passing_threshold: f64,
    pub created_at: String,
}

/// The assessment actually in force for one student, resolved once per operation.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectiveAssessment {
    Canonical(AssessmentTemplate),
    Customized(CustomizedAssessment),
}

impl EffectiveAssessment {
    pub fn id(&self) -> &str {
        match self {
            EffectiveAssessment::Canonical(t) => &t.id,
            EffectiveAssessment::Customized(c) => &c.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            EffectiveAssessment::Canonical(t) => &t.title,
            EffectiveAssessment::Customized(c) => &c.title,
        }
    }

    pub fn questions(&self) -> &[Question] {
        match self {
            EffectiveAssessment::Canonical(t) => &t.questions,
            EffectiveAssessment::Customized(c) => &c.questions,
        }
    }

    pub fn passing_threshold(&self) -> f64 {
        match self {
            EffectiveAssessment::Canonical(t) => t.passing_threshold,
            EffectiveAssessment::Customized(c) => c.passing_threshold,
        }
    }

    pub fn is_customized(&self) -> bool {
        matches!(self, EffectiveAssessment::Customized(_))
    }

    pub fn template_id(&self) -> &str {
        match self {
            EffectiveAssessment::Canonical(t) => &t.id,
            EffectiveAssessment::Customized(c) => &c.original_template_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AssignmentStatus::Pending),
            "in_progress" => Some(AssignmentStatus::InProgress),
            "completed" => Some(AssignmentStatus::Completed),
            "cancelled" => Some(AssignmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedStudent {
    pub user_id: String,
    pub status: AssignmentStatus,
    pub reading_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub assessment_id: String,
    pub assessment_title: String,
    pub template_id: String,
    pub category_id: i64,
    pub category_name: String,
    pub assigned_by: Option<String>,
    pub assigned_at: String,
    pub passing_threshold: f64,
    pub students: Vec<AssignedStudent>,
    pub total_assigned: i64,
    pub completion_count: i64,
    pub completion_rate: f64,
    pub has_customization: bool,
    pub customized_assessment_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub assignment_id: String,
    pub assessment_id: String,
    pub template_id: String,
    pub student_id: String,
    pub category_id: i64,
    pub has_customization: bool,
    pub customized_assessment_id: Option<String>,
    pub answers: BTreeMap<String, String>,
    pub raw_score: Option<f64>,
    pub total_points: Option<f64>,
    pub percentage_score: Option<f64>,
    pub passed: Option<bool>,
    pub correct_question_ids: Option<Vec<String>>,
    pub incorrect_question_ids: Option<Vec<String>>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub completed_at: Option<String>,
    pub time_spent_secs: Option<i64>,
    pub attempt_number: i64,
    pub completed: bool,
    pub feedback: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub next_steps: Option<String>,
}

/// Normalizes an answers payload to `questionId -> optionId` strings.
pub fn parse_answers(v: Option<&serde_json::Value>) -> EngineResult<BTreeMap<String, String>> {
    let Some(v) = v else {
        return Err(EngineError::validation("missing answers"));
    };
    let Some(map) = v.as_object() else {
        return Err(EngineError::validation("answers must be an object"));
    };
    let mut out = BTreeMap::new();
    for (qid, ans) in map {
        let ans = match ans {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => {
                return Err(EngineError::validation(format!(
                    "answer for {qid} must be a string or number"
                )))
            }
        };
        out.insert(qid.clone(), ans);
    }
    Ok(out)
}
