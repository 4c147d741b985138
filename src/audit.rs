use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{self, json_col};
use crate::error::EngineResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEvent {
    pub id: String,
    pub student_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// Destination for profile-update events. Delivery is best-effort: a sink
/// failure is logged and never fails the unit of work that emitted it.
pub trait AuditSink {
    fn record(&self, conn: &Connection, student_id: &str, kind: &str, payload: serde_json::Value) -> EngineResult<()>;
}

/// Appends events to the `profile_events` table.
pub struct TableSink;

impl AuditSink for TableSink {
    fn record(&self, conn: &Connection, student_id: &str, kind: &str, payload: serde_json::Value) -> EngineResult<()> {
        conn.execute(
            "INSERT INTO profile_events(id, student_id, kind, payload, created_at) VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                kind,
                payload.to_string(),
                db::now_rfc3339(),
            ),
        )?;
        Ok(())
    }
}

pub fn emit(sink: &dyn AuditSink, conn: &Connection, student_id: &str, kind: &str, payload: serde_json::Value) {
    if let Err(e) = sink.record(conn, student_id, kind, payload) {
        tracing::warn!(student_id, kind, error = %e, "audit sink rejected event");
    }
}

pub fn list_events(conn: &Connection, student_id: &str) -> EngineResult<Vec<ProfileEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, kind, payload, created_at
         FROM profile_events
         WHERE student_id = ?
         ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(ProfileEvent {
                id: r.get(0)?,
                student_id: r.get(1)?,
                kind: r.get(2)?,
                payload: json_col(r, 3)?,
                created_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
