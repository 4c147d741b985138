use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;

use crate::error::EngineResult;
use crate::progress::{self, CategoryEntry, CategoryStatus};
use crate::responses;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub category_id: i64,
    pub category_name: String,
    pub score: f64,
    pub status: CategoryStatus,
    pub passed: bool,
    pub attempts: i64,
    pub last_attempt_date: Option<String>,
    pub completion_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    FocusedPractice,
    AdditionalPractice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub urgency: Urgency,
    pub category_id: i64,
    pub category_name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentResponse {
    pub response_id: String,
    pub assessment_id: String,
    pub category_id: i64,
    pub percentage_score: f64,
    pub passed: bool,
    pub attempt_number: i64,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub student_id: String,
    pub completed_responses: usize,
    pub average_score: f64,
    pub completed_categories: i64,
    pub overall_progress: f64,
    pub category_breakdown: Vec<CategoryBreakdown>,
    pub strengths: Vec<CategoryBreakdown>,
    pub weaknesses: Vec<CategoryBreakdown>,
    pub recommendation: Option<Recommendation>,
    pub recent_responses: Vec<RecentResponse>,
}

fn breakdown(e: &CategoryEntry) -> CategoryBreakdown {
    CategoryBreakdown {
        category_id: e.category_id,
        category_name: e.category_name.clone(),
        score: e.main_assessment_score.unwrap_or(0.0),
        status: e.status,
        passed: e.passed,
        attempts: e.attempt_count,
        last_attempt_date: e.last_attempt_date.clone(),
        completion_date: e.completion_date.clone(),
    }
}

fn by_score_desc(a: &CategoryBreakdown, b: &CategoryBreakdown) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.category_id.cmp(&b.category_id))
}

/// `<50` focused practice (high), `<70` additional practice (medium), else nothing.
pub fn recommend(weakest: &CategoryBreakdown) -> Option<Recommendation> {
    let (kind, urgency) = if weakest.score < 50.0 {
        (RecommendationKind::FocusedPractice, Urgency::High)
    } else if weakest.score < 70.0 {
        (RecommendationKind::AdditionalPractice, Urgency::Medium)
    } else {
        return None;
    };
    Some(Recommendation {
        kind,
        urgency,
        category_id: weakest.category_id,
        category_name: weakest.category_name.clone(),
        score: weakest.score,
    })
}

/// Read-only rollup over a student's completed responses and progress ledger.
pub fn student_analytics(conn: &Connection, student_id: &str) -> EngineResult<AnalyticsSummary> {
    let completed = responses::completed_for_student(conn, student_id)?;
    let ledger = progress::load_progress(conn, student_id)?;

    let scores: Vec<f64> = completed.iter().filter_map(|r| r.percentage_score).collect();
    let average_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let category_breakdown: Vec<CategoryBreakdown> = ledger
        .as_ref()
        .map(|p| {
            p.categories
                .iter()
                .filter(|c| matches!(c.status, CategoryStatus::InProgress | CategoryStatus::Completed))
                .map(breakdown)
                .collect()
        })
        .unwrap_or_default();

    let mut ranked = category_breakdown.clone();
    ranked.sort_by(by_score_desc);
    let strengths: Vec<CategoryBreakdown> = ranked.iter().take(2).cloned().collect();
    let weaknesses: Vec<CategoryBreakdown> = ranked.iter().rev().take(2).cloned().collect();
    let recommendation = weaknesses.first().and_then(recommend);

    let recent_responses = completed
        .iter()
        .take(5)
        .map(|r| RecentResponse {
            response_id: r.id.clone(),
            assessment_id: r.assessment_id.clone(),
            category_id: r.category_id,
            percentage_score: r.percentage_score.unwrap_or(0.0),
            passed: r.passed.unwrap_or(false),
            attempt_number: r.attempt_number,
            completed_at: r.completed_at.clone(),
        })
        .collect();

    Ok(AnalyticsSummary {
        student_id: student_id.to_string(),
        completed_responses: completed.len(),
        average_score,
        completed_categories: ledger.as_ref().map(|p| p.completed_categories).unwrap_or(0),
        overall_progress: ledger.as_ref().map(|p| p.overall_progress).unwrap_or(0.0),
        category_breakdown,
        strengths,
        weaknesses,
        recommendation,
        recent_responses,
    })
}
