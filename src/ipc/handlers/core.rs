use crate::config::EngineConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "catalogVersion": state.config.catalog.version,
            "batchAtomicity": state.config.batch_atomicity.as_str(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // Config is read before the store so a broken file leaves the previous workspace selected.
    let config = match EngineConfig::load_from_workspace(&path) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "config_invalid", format!("{e:#}"), None),
    };

    match db::open_db(&path, Duration::from_millis(config.busy_timeout_ms)) {
        Ok(conn) => {
            tracing::info!(
                workspace = %path.display(),
                catalog_version = config.catalog.version,
                atomicity = config.batch_atomicity.as_str(),
                "workspace opened"
            );
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.config = config;
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "catalog": state.config.catalog,
                    "batchAtomicity": state.config.batch_atomicity.as_str(),
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
