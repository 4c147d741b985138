use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::config::CategoryCatalog;
use crate::db::{self, json_col};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Locked,
    Pending,
    InProgress,
    Completed,
}

impl CategoryStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "locked" => Some(CategoryStatus::Locked),
            "pending" => Some(CategoryStatus::Pending),
            "in_progress" => Some(CategoryStatus::InProgress),
            "completed" => Some(CategoryStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryStatus::Locked => "locked",
            CategoryStatus::Pending => "pending",
            CategoryStatus::InProgress => "in_progress",
            CategoryStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryEntry {
    pub category_id: i64,
    pub category_name: String,
    pub status: CategoryStatus,
    pub pre_assessment_completed: bool,
    pub pre_assessment_score: Option<f64>,
    pub main_assessment_id: Option<String>,
    pub main_assessment_completed: bool,
    pub main_assessment_score: Option<f64>,
    pub passed: bool,
    pub attempt_count: i64,
    pub last_attempt_date: Option<String>,
    pub completion_date: Option<String>,
}

impl CategoryEntry {
    fn new(category_id: i64, category_name: &str, status: CategoryStatus) -> Self {
        CategoryEntry {
            category_id,
            category_name: category_name.to_string(),
            status,
            pre_assessment_completed: false,
            pre_assessment_score: None,
            main_assessment_id: None,
            main_assessment_completed: false,
            main_assessment_score: None,
            passed: false,
            attempt_count: 0,
            last_attempt_date: None,
            completion_date: None,
        }
    }
}

/// Per-student rollup across the catalog's categories.
///
/// `completed_categories` and `overall_progress` are derived; every mutator
/// calls [`CategoryProgress::recompute`] before the document is written.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryProgress {
    pub student_id: String,
    pub catalog_version: u32,
    pub categories: Vec<CategoryEntry>,
    pub completed_categories: i64,
    pub total_categories: i64,
    pub overall_progress: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl CategoryProgress {
    pub fn skeleton(student_id: &str, catalog: &CategoryCatalog) -> Self {
        let now = db::now_rfc3339();
        let mut p = CategoryProgress {
            student_id: student_id.to_string(),
            catalog_version: catalog.version,
            categories: catalog
                .categories
                .iter()
                .map(|c| {
                    let status = if c.locked {
                        CategoryStatus::Locked
                    } else {
                        CategoryStatus::Pending
                    };
                    CategoryEntry::new(c.id, &c.name, status)
                })
                .collect(),
            completed_categories: 0,
            total_categories: catalog.len() as i64,
            overall_progress: 0.0,
            created_at: now.clone(),
            updated_at: now,
        };
        p.recompute();
        p
    }

    /// Returns the entry for `category_id`, appending a pending one if the
    /// document predates that category.
    pub fn entry_mut(&mut self, category_id: i64, category_name: &str) -> &mut CategoryEntry {
        let pos = match self.categories.iter().position(|c| c.category_id == category_id) {
            Some(pos) => pos,
            None => {
                self.categories
                    .push(CategoryEntry::new(category_id, category_name, CategoryStatus::Pending));
                self.categories.len() - 1
            }
        };
        &mut self.categories[pos]
    }

    pub fn entry(&self, category_id: i64) -> Option<&CategoryEntry> {
        self.categories.iter().find(|c| c.category_id == category_id)
    }

    pub fn recompute(&mut self) {
        self.completed_categories = self
            .categories
            .iter()
            .filter(|c| c.status == CategoryStatus::Completed)
            .count() as i64;
        self.total_categories = self.total_categories.max(self.categories.len() as i64);
        self.overall_progress = if self.total_categories > 0 {
            self.completed_categories as f64 / self.total_categories as f64 * 100.0
        } else {
            0.0
        };
    }

    /// Assignment made: category becomes in progress and tracks the in-effect assessment.
    /// `last_attempt` is only stamped on documents that already existed.
    pub fn mark_assigned(
        &mut self,
        category_id: i64,
        category_name: &str,
        assessment_id: &str,
        last_attempt: Option<&str>,
    ) {
        let e = self.entry_mut(category_id, category_name);
        e.status = CategoryStatus::InProgress;
        e.pre_assessment_completed = true;
        e.main_assessment_id = Some(assessment_id.to_string());
        if let Some(now) = last_attempt {
            e.last_attempt_date = Some(now.to_string());
        }
        self.recompute();
    }

    /// Main assessment scored.
    pub fn record_main_result(&mut self, category_id: i64, category_name: &str, score: f64, passed: bool, now: &str) {
        let e = self.entry_mut(category_id, category_name);
        e.main_assessment_completed = true;
        e.main_assessment_score = Some(score);
        e.passed = passed;
        e.attempt_count += 1;
        e.last_attempt_date = Some(now.to_string());
        e.completion_date = Some(now.to_string());
        e.status = if passed {
            CategoryStatus::Completed
        } else {
            CategoryStatus::InProgress
        };
        self.recompute();
    }

    /// Manual override from a teacher.
    pub fn set_status(&mut self, category_id: i64, category_name: &str, status: CategoryStatus, now: &str) {
        let e = self.entry_mut(category_id, category_name);
        e.status = status;
        if status == CategoryStatus::Completed {
            e.main_assessment_completed = true;
            if e.completion_date.is_none() {
                e.completion_date = Some(now.to_string());
            }
        }
        self.recompute();
    }
}

pub fn load_progress(conn: &Connection, student_id: &str) -> EngineResult<Option<CategoryProgress>> {
    Ok(conn
        .query_row(
            "SELECT student_id, catalog_version, categories, completed_categories, total_categories,
                    overall_progress, created_at, updated_at
             FROM category_progress WHERE student_id = ?",
            [student_id],
            |r| {
                Ok(CategoryProgress {
                    student_id: r.get(0)?,
                    catalog_version: r.get(1)?,
                    categories: json_col(r, 2)?,
                    completed_categories: r.get(3)?,
                    total_categories: r.get(4)?,
                    overall_progress: r.get(5)?,
                    created_at: r.get(6)?,
                    updated_at: r.get(7)?,
                })
            },
        )
        .optional()?)
}

pub fn load_or_skeleton(conn: &Connection, student_id: &str, catalog: &CategoryCatalog) -> EngineResult<CategoryProgress> {
    match load_progress(conn, student_id)? {
        Some(p) => Ok(p),
        None => {
            tracing::debug!(student_id, catalog_version = catalog.version, "creating progress skeleton");
            Ok(CategoryProgress::skeleton(student_id, catalog))
        }
    }
}

pub fn save_progress(conn: &Connection, progress: &mut CategoryProgress) -> EngineResult<()> {
    progress.recompute();
    progress.updated_at = db::now_rfc3339();
    conn.execute(
        "INSERT INTO category_progress(student_id, catalog_version, categories, completed_categories,
           total_categories, overall_progress, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           catalog_version = excluded.catalog_version,
           categories = excluded.categories,
           completed_categories = excluded.completed_categories,
           total_categories = excluded.total_categories,
           overall_progress = excluded.overall_progress,
           updated_at = excluded.updated_at",
        rusqlite::params![
            progress.student_id,
            progress.catalog_version,
            serde_json::to_string(&progress.categories)?,
            progress.completed_categories,
            progress.total_categories,
            progress.overall_progress,
            progress.created_at,
            progress.updated_at,
        ],
    )?;
    Ok(())
}

/// Manual status override, in its own transaction.
pub fn update_category_status(
    conn: &Connection,
    catalog: &CategoryCatalog,
    student_id: &str,
    category_id: i64,
    status: &str,
) -> EngineResult<CategoryProgress> {
    let status = CategoryStatus::parse(status)
        .ok_or_else(|| EngineError::validation(format!("invalid category status '{status}'")))?;
    let tx = db::begin_write(conn)?;
    let mut progress = load_progress(&tx, student_id)?
        .ok_or_else(|| EngineError::not_found("progress", student_id))?;
    let name = progress
        .entry(category_id)
        .map(|e| e.category_name.clone())
        .or_else(|| catalog.get(category_id).map(|c| c.name.clone()))
        .ok_or_else(|| EngineError::validation(format!("unknown categoryId {category_id}")))?;
    progress.set_status(category_id, &name, status, &db::now_rfc3339());
    save_progress(&tx, &mut progress)?;
    tx.commit()?;
    tracing::info!(student_id, category_id, status = status.as_str(), "category status overridden");
    Ok(progress)
}
