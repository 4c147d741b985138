use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::CategoryCatalog;
use crate::content::{self, ResolveHint};
use crate::db;
use crate::error::EngineResult;
use crate::model::{AssignmentStatus, Question};
use crate::progress;
use crate::responses;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreOutcome {
    pub raw_score: f64,
    pub total_points: f64,
    pub percentage_score: f64,
    pub passed: bool,
    pub correct_question_ids: Vec<String>,
    pub incorrect_question_ids: Vec<String>,
}

/// Scores `answers` against `questions`.
///
/// Answer keys that match no question (by id, then by the original template
/// question id) are ignored. Each question is scored at most once and an exact
/// id key wins over its original-id alias. The denominator is every
/// question's points, answered or not.
pub fn score_answers(questions: &[Question], answers: &BTreeMap<String, String>, threshold: f64) -> ScoreOutcome {
    let by_original: HashMap<&str, &str> = questions
        .iter()
        .filter_map(|q| q.original_question_id.as_deref().map(|o| (o, q.id.as_str())))
        .collect();

    let mut chosen: HashMap<&str, &str> = HashMap::new();
    for q in questions {
        if let Some(answer) = answers.get(q.id.as_str()) {
            chosen.insert(q.id.as_str(), answer.as_str());
        }
    }
    for (key, answer) in answers {
        if let Some(qid) = by_original.get(key.as_str()) {
            chosen.entry(*qid).or_insert(answer.as_str());
        }
    }

    let mut raw_score = 0.0;
    let mut correct = Vec::new();
    let mut incorrect = Vec::new();
    let mut scored = HashSet::new();

    for q in questions {
        let Some(answer) = chosen.get(q.id.as_str()) else {
            continue;
        };
        if !scored.insert(q.id.as_str()) {
            continue;
        }
        match q.correct_option_id() {
            Some(right) if right == *answer => {
                raw_score += q.points();
                correct.push(q.id.clone());
            }
            _ => incorrect.push(q.id.clone()),
        }
    }

    let total_points: f64 = questions.iter().map(Question::points).sum();
    // Multiply first so whole-number ratios such as 29/100 stay exact.
    let percentage_score = if total_points > 0.0 {
        raw_score * 100.0 / total_points
    } else {
        0.0
    };

    ScoreOutcome {
        raw_score,
        total_points,
        percentage_score,
        passed: percentage_score >= threshold,
        correct_question_ids: correct,
        incorrect_question_ids: incorrect,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub response_id: String,
    pub assessment_id: String,
    pub is_customized: bool,
    pub attempt_number: i64,
    #[serde(flatten)]
    pub score: ScoreOutcome,
}

/// Scores a submission and commits Response, Assignment and progress together.
#[tracing::instrument(skip(conn, catalog, answers), fields(answers = answers.len()))]
pub fn submit_response(
    conn: &Connection,
    catalog: &CategoryCatalog,
    assessment_id: &str,
    student_id: &str,
    answers: BTreeMap<String, String>,
) -> EngineResult<SubmissionResult> {
    let tx = db::begin_write(conn)?;
    let mut response = responses::require_response(&tx, assessment_id, student_id)?;

    let effective = content::resolve_effective(
        &tx,
        ResolveHint {
            template_id: &response.template_id,
            customized_assessment_id: response
                .customized_assessment_id
                .as_deref()
                .filter(|_| response.has_customization),
        },
    )?;
    let outcome = score_answers(effective.questions(), &answers, effective.passing_threshold());

    let now_dt = chrono::Utc::now();
    let now = db::now_rfc3339();
    let time_spent = response
        .started_at
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|start| (now_dt - start.with_timezone(&chrono::Utc)).num_seconds().max(0))
        .unwrap_or(0);

    response.answers = answers;
    response.raw_score = Some(outcome.raw_score);
    response.total_points = Some(outcome.total_points);
    response.percentage_score = Some(outcome.percentage_score);
    response.passed = Some(outcome.passed);
    response.correct_question_ids = Some(outcome.correct_question_ids.clone());
    response.incorrect_question_ids = Some(outcome.incorrect_question_ids.clone());
    response.attempt_number += 1;
    response.time_spent_secs = Some(time_spent);
    response.ended_at = Some(now.clone());
    response.completed_at = Some(now.clone());
    response.completed = true;
    responses::save_scored(&tx, &response)?;

    tx.execute(
        "UPDATE assignment_students SET status = ?, updated_at = ? WHERE assignment_id = ? AND student_id = ?",
        (AssignmentStatus::Completed.as_str(), &now, &response.assignment_id, &response.student_id),
    )?;
    tx.execute(
        "UPDATE assignments SET completion_count = 1, completion_rate = 100 WHERE id = ?",
        [&response.assignment_id],
    )?;

    let category_name = tx.query_row(
        "SELECT category_name FROM assignments WHERE id = ?",
        [&response.assignment_id],
        |r| r.get::<_, String>(0),
    )?;
    let mut ledger = progress::load_or_skeleton(&tx, &response.student_id, catalog)?;
    ledger.record_main_result(
        response.category_id,
        &category_name,
        outcome.percentage_score,
        outcome.passed,
        &now,
    );
    progress::save_progress(&tx, &mut ledger)?;

    tx.commit()?;
    tracing::info!(
        response_id = %response.id,
        effective_assessment = effective.id(),
        percentage = outcome.percentage_score,
        passed = outcome.passed,
        attempt = response.attempt_number,
        "response scored"
    );

    Ok(SubmissionResult {
        response_id: response.id,
        assessment_id: effective.id().to_string(),
        is_customized: effective.is_customized(),
        attempt_number: response.attempt_number,
        score: outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionOption;

    fn q(id: &str, right: &str, points: Option<f64>) -> Question {
        Question {
            id: id.to_string(),
            text: String::new(),
            options: ["a", "b", "c"]
                .iter()
                .map(|o| QuestionOption {
                    id: o.to_string(),
                    text: o.to_uppercase(),
                    is_correct: *o == right,
                })
                .collect(),
            point_value: points,
            content: None,
            original_question_id: None,
        }
    }

    fn answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn unanswered_questions_still_count_toward_total() {
        let qs = vec![q("q1", "a", None), q("q2", "b", None), q("q3", "c", Some(2.0))];
        let out = score_answers(&qs, &answers(&[("q1", "a")]), 75.0);
        assert_eq!(out.raw_score, 1.0);
        assert_eq!(out.total_points, 4.0);
        assert_eq!(out.percentage_score, 25.0);
        assert!(!out.passed);
        assert_eq!(out.correct_question_ids, vec!["q1".to_string()]);
        assert!(out.incorrect_question_ids.is_empty());
    }

    #[test]
    fn stray_keys_are_ignored() {
        let qs = vec![q("q1", "a", None)];
        let out = score_answers(&qs, &answers(&[("q1", "b"), ("zz", "a")]), 75.0);
        assert_eq!(out.raw_score, 0.0);
        assert_eq!(out.incorrect_question_ids, vec!["q1".to_string()]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let qs = vec![q("q1", "a", None), q("q2", "a", None), q("q3", "a", None), q("q4", "a", None)];
        let at = score_answers(&qs, &answers(&[("q1", "a"), ("q2", "a"), ("q3", "a")]), 75.0);
        assert_eq!(at.percentage_score, 75.0);
        assert!(at.passed);
        let below = score_answers(&qs, &answers(&[("q1", "a"), ("q2", "a")]), 75.0);
        assert_eq!(below.percentage_score, 50.0);
        assert!(!below.passed);

        let hundred: Vec<Question> = (0..100).map(|i| q(&format!("q{i}"), "a", None)).collect();
        let right: Vec<(String, String)> = (0..29).map(|i| (format!("q{i}"), "a".to_string())).collect();
        let exact = score_answers(&hundred, &right.iter().cloned().collect::<BTreeMap<_, _>>(), 29.0);
        assert_eq!(exact.percentage_score, 29.0);
        assert!(exact.passed);
        let short = score_answers(&hundred, &right[..28].iter().cloned().collect::<BTreeMap<_, _>>(), 29.0);
        assert!(!short.passed);
    }

    #[test]
    fn empty_assessment_scores_zero_and_fails() {
        let out = score_answers(&[], &answers(&[("q1", "a")]), 75.0);
        assert_eq!(out.percentage_score, 0.0);
        assert!(!out.passed);
    }

    #[test]
    fn customized_questions_accept_original_ids() {
        let mut cq = q("q1-1a2b3c4d", "b", None);
        cq.original_question_id = Some("q1".into());
        let out = score_answers(&[cq], &answers(&[("q1", "b")]), 75.0);
        assert_eq!(out.correct_question_ids, vec!["q1-1a2b3c4d".to_string()]);
        assert!(out.passed);
    }

    #[test]
    fn new_id_and_original_id_score_a_question_once() {
        let mut c1 = q("q1-1a2b3c4d", "a", None);
        c1.original_question_id = Some("q1".into());
        let mut c2 = q("q2-5e6f7a8b", "b", None);
        c2.original_question_id = Some("q2".into());
        let out = score_answers(&[c1, c2], &answers(&[("q1", "a"), ("q1-1a2b3c4d", "a")]), 75.0);
        assert_eq!(out.raw_score, 1.0);
        assert_eq!(out.total_points, 2.0);
        assert_eq!(out.percentage_score, 50.0);
        assert!(!out.passed);
        assert_eq!(out.correct_question_ids, vec!["q1-1a2b3c4d".to_string()]);
    }

    #[test]
    fn exact_id_wins_over_original_alias() {
        let mut c1 = q("q1-1a2b3c4d", "a", None);
        c1.original_question_id = Some("q1".into());
        let out = score_answers(&[c1], &answers(&[("q1", "a"), ("q1-1a2b3c4d", "c")]), 75.0);
        assert_eq!(out.raw_score, 0.0);
        assert_eq!(out.incorrect_question_ids, vec!["q1-1a2b3c4d".to_string()]);
    }

    #[test]
    fn question_without_correct_option_is_always_incorrect() {
        let mut qq = q("q1", "a", None);
        qq.options.iter_mut().for_each(|o| o.is_correct = false);
        let out = score_answers(&[qq], &answers(&[("q1", "a")]), 0.0);
        assert_eq!(out.raw_score, 0.0);
        assert_eq!(out.incorrect_question_ids.len(), 1);
        assert!(out.passed);
    }

    #[test]
    fn scoring_is_deterministic() {
        let qs = vec![q("q1", "a", Some(3.0)), q("q2", "b", None)];
        let a = answers(&[("q2", "b"), ("q1", "c")]);
        let first = score_answers(&qs, &a, 75.0);
        for _ in 0..5 {
            assert_eq!(score_answers(&qs, &a, 75.0), first);
        }
    }
}
