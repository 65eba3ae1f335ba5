use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiResult, AppState};
use crate::errors::DaemonError;

/// Server identity and feature flags for clients.
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "homeDir": state.paths.hangar_dir().to_string_lossy(),
        "capabilities": {
            "webhooks": state.config.webhook_secret.is_some(),
            "branchSuggester": state.config.suggester_url.is_some(),
        },
        "serverPid": std::process::id(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub path: String,
}

/// Open a path with the OS default handler.
pub async fn open_path(
    State(_state): State<AppState>,
    Json(request): Json<OpenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if !std::path::Path::new(&request.path).exists() {
        return Err(ApiError(DaemonError::validation(format!(
            "path does not exist: '{}'",
            request.path
        ))));
    }
    open::that_detached(&request.path)
        .map_err(|e| DaemonError::validation(format!("open failed: {}", e)))?;
    Ok(Json(json!({ "success": true })))
}

pub async fn open_in_vscode(
    State(_state): State<AppState>,
    Json(request): Json<OpenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if !std::path::Path::new(&request.path).exists() {
        return Err(ApiError(DaemonError::validation(format!(
            "path does not exist: '{}'",
            request.path
        ))));
    }
    open::with_detached(&request.path, "code")
        .map_err(|e| DaemonError::validation(format!("open in vscode failed: {}", e)))?;
    Ok(Json(json!({ "success": true })))
}
