use crate::backup;
use crate::error::ServiceError;
use crate::ipc::error::{err, ok, service_err};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{actor, conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Transaction, TransactionBehavior};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

fn handle_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let checked = conn(state)
        .and_then(|conn| actor(conn, &req.params))
        .and_then(|who| who.require_admin());
    if let Err(e) = checked {
        return service_err(&req.id, &e);
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return service_err(&req.id, &e),
    };

    // Hold the write lock so other processes cannot commit mid-copy.
    let exported = match state.db.as_ref() {
        Some(conn) => match Transaction::new_unchecked(conn, TransactionBehavior::Immediate) {
            Ok(_lock) => backup::export_workspace_bundle(&workspace, &out_path),
            Err(e) => return service_err(&req.id, &ServiceError::Database(e)),
        },
        None => return err(&req.id, "no_workspace", "select a workspace first", None),
    };

    match exported {
        Ok(summary) => {
            info!(out = %out_path.display(), sha256 = %summary.db_sha256, "workspace bundle exported");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "path": out_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "dbSha256": summary.db_sha256,
                }),
            )
        }
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

fn handle_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let checked = conn(state)
        .and_then(|conn| actor(conn, &req.params))
        .and_then(|who| who.require_admin());
    if let Err(e) = checked {
        return service_err(&req.id, &e);
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match required_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return service_err(&req.id, &e),
    };

    // The database file is replaced underneath us; close it first.
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    if let Err(e) = open_workspace(state, workspace.clone()) {
        error!(error = %format!("{e:#}"), "failed to reopen workspace after import");
        return err(&req.id, "db_open_failed", format!("{e:#}"), None);
    }

    match imported {
        Ok(summary) => {
            info!(bundle = %in_path.display(), sha256 = %summary.db_sha256, "workspace bundle imported");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256,
                }),
            )
        }
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_workspace_bundle(state, req)),
        _ => None,
    }
}
