use rusqlite::ErrorCode;
use serde_json::json;
use thiserror::Error;

/// Every failure the engine can hand back to a caller.
///
/// Callers pick retry vs. surface-to-user by kind: only `Conflict` is
/// retryable, `Customization` never leaves the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("customization failed: {0}")]
    Customization(String),

    #[error("storage failure: {0}")]
    Persistence(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "bad_params",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Conflict(_) => "tx_conflict",
            EngineError::Customization(_) => "customization_failed",
            EngineError::Persistence(_) => "db_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            EngineError::NotFound { what, id } => {
                json!({ "retryable": false, "entity": what, "id": id })
            }
            _ => json!({ "retryable": self.is_retryable() }),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                EngineError::Conflict(e.to_string())
            }
            _ => EngineError::Persistence(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Persistence(format!("corrupt stored document: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_locked_map_to_retryable_conflict() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        let e = EngineError::from(busy);
        assert_eq!(e.code(), "tx_conflict");
        assert!(e.is_retryable());
        assert_eq!(e.details()["retryable"], json!(true));
    }

    #[test]
    fn other_sqlite_failures_are_persistence() {
        let e = EngineError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(e.code(), "db_error");
        assert!(!e.is_retryable());
    }

    #[test]
    fn not_found_carries_entity_details() {
        let e = EngineError::not_found("response", "MA-1-x");
        assert_eq!(e.code(), "not_found");
        assert_eq!(e.details()["entity"], json!("response"));
        assert_eq!(e.to_string(), "response not found: MA-1-x");
    }
}
