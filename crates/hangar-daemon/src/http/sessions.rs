use std::path::Path;
use std::time::Duration;

use axum::Json;
use axum::extract::{Multipart, Path as UrlPath, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiResult, AppState};
use crate::errors::DaemonError;
use crate::gitio;
use crate::sessions::manager::UpdateSessionRequest;
use crate::sessions::{CreateSessionRequest, CreateWorkerRequest};
use hangar_core::types::worker::WorkerKind;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let sessions = state.sessions.get_all_sessions()?;
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let session = state.sessions.create_session(request)?;
    Ok((StatusCode::CREATED, Json(json!({ "session": session }))))
}

pub async fn get_one(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.session_view(&id)?;
    Ok(Json(json!({ "session": session })))
}

pub async fn delete_one(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.sessions.delete_session(&id)?;
    Ok(Json(json!({ "success": true })))
}

pub async fn update(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(request): Json<UpdateSessionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.update_session_metadata(&id, request).await?;
    Ok(Json(json!({ "session": session })))
}

pub async fn pause(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.sessions.pause_session(&id)?;
    Ok(Json(json!({ "success": true })))
}

pub async fn resume(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.resume_session(&id)?;
    Ok(Json(json!({ "session": session })))
}

pub async fn validate(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let invalid = state.sessions.validate_all_sessions()?;
    Ok(Json(json!({ "invalid": invalid })))
}

/// Remove a session whose location disappeared; never touches workers.
pub async fn delete_invalid(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.session_view(&id)?;
    if Path::new(&session.session.location_path).is_dir() {
        return Err(ApiError(DaemonError::validation(
            "session location still exists; use DELETE /sessions/:id",
        )));
    }
    state.sessions.force_delete_session(&id)?;
    Ok(Json(json!({ "success": true })))
}

/// Multipart message: a `text` field plus up to `max_message_files`
/// attachments saved under `uploads/` and forwarded as paths.
pub async fn post_message(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut text = String::new();
    let mut file_paths: Vec<String> = Vec::new();
    let mut total_size: u64 = 0;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DaemonError::validation(format!("multipart: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "text" {
            text = field
                .text()
                .await
                .map_err(|e| DaemonError::validation(format!("multipart text: {}", e)))?;
            continue;
        }

        if file_paths.len() >= state.config.max_message_files {
            return Err(ApiError(DaemonError::validation(format!(
                "too many files (max {})",
                state.config.max_message_files
            ))));
        }
        let original_name = field.file_name().unwrap_or("upload.bin").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DaemonError::validation(format!("multipart file: {}", e)))?;
        total_size += bytes.len() as u64;
        if total_size > state.config.max_total_file_size {
            return Err(ApiError(DaemonError::validation(format!(
                "files exceed {} bytes",
                state.config.max_total_file_size
            ))));
        }

        let safe_name = original_name.replace(['/', '\\'], "_");
        let target = state
            .paths
            .uploads_dir()
            .join(format!("{}-{}", hangar_core::new_id(), safe_name));
        std::fs::create_dir_all(state.paths.uploads_dir()).map_err(DaemonError::from)?;
        std::fs::write(&target, &bytes).map_err(DaemonError::from)?;
        file_paths.push(target.to_string_lossy().into_owned());
    }

    if text.is_empty() && file_paths.is_empty() {
        return Err(ApiError(DaemonError::validation("message is empty")));
    }
    state.sessions.send_message(&id, &text, &file_paths)?;
    Ok(Json(json!({ "success": true })))
}

// --- Workers ---

pub async fn list_workers(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.sessions.session_view(&id)?;
    Ok(Json(json!({ "workers": view.workers })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateWorkerQuery {
    #[serde(default, rename = "continue")]
    pub continue_conversation: bool,
}

pub async fn create_worker(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Query(query): Query<CreateWorkerQuery>,
    Json(request): Json<CreateWorkerRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let worker = state
        .sessions
        .create_worker(&id, request, query.continue_conversation)?;
    Ok((StatusCode::CREATED, Json(json!({ "worker": worker }))))
}

pub async fn delete_worker(
    State(state): State<AppState>,
    UrlPath((id, wid)): UrlPath<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.sessions.delete_worker(&id, &wid)?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RestartRequest {
    #[serde(default, rename = "continueConversation")]
    pub continue_conversation: bool,
}

pub async fn restart_worker(
    State(state): State<AppState>,
    UrlPath((id, wid)): UrlPath<(String, String)>,
    body: axum::body::Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    // The body is optional; an empty one means a fresh conversation.
    let continue_conversation = if body.is_empty() {
        false
    } else {
        serde_json::from_slice::<RestartRequest>(&body)
            .map_err(|e| DaemonError::validation(format!("body: {}", e)))?
            .continue_conversation
    };
    let worker = state
        .sessions
        .restart_agent_worker(&id, &wid, continue_conversation)?;
    Ok(Json(json!({ "worker": worker })))
}

// --- Git views ---

async fn diff_output(
    state: &AppState,
    session_id: &str,
    worker_id: &str,
    file: Option<&str>,
) -> Result<String, DaemonError> {
    let view = state.sessions.session_view(session_id)?;
    let worker = view
        .workers
        .iter()
        .find(|w| w.id == worker_id)
        .ok_or_else(|| DaemonError::not_found("worker", worker_id))?;
    if worker.kind != WorkerKind::GitDiff {
        return Err(DaemonError::validation("worker is not a git-diff worker"));
    }
    let base = worker
        .base_commit
        .clone()
        .ok_or_else(|| DaemonError::validation("git-diff worker has no base commit"))?;

    let location = Path::new(&view.session.location_path);
    let mut args = vec!["diff", base.as_str()];
    if let Some(file) = file {
        args.push("--");
        args.push(file);
    }
    let output = gitio::git(location, &args).await?;
    gitio::expect_success(&output, "git diff")?;
    Ok(output.stdout)
}

pub async fn diff(
    State(state): State<AppState>,
    UrlPath((id, wid)): UrlPath<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let diff = diff_output(&state, &id, &wid, None).await?;
    Ok(Json(json!({ "diff": diff })))
}

pub async fn diff_file(
    State(state): State<AppState>,
    UrlPath((id, wid, file)): UrlPath<(String, String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let diff = diff_output(&state, &id, &wid, Some(&file)).await?;
    Ok(Json(json!({ "diff": diff })))
}

pub async fn branches(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.sessions.session_view(&id)?;
    let branches = gitio::list_branches(Path::new(&view.session.location_path))?;
    let current = gitio::current_branch(Path::new(&view.session.location_path))?;
    Ok(Json(json!({ "branches": branches, "current": current })))
}

pub async fn commits(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.sessions.session_view(&id)?;
    let output = gitio::git(
        Path::new(&view.session.location_path),
        &["log", "-n", "20", "--pretty=format:%H%x09%an%x09%ad%x09%s", "--date=iso-strict"],
    )
    .await?;
    gitio::expect_success(&output, "git log")?;
    let commits: Vec<serde_json::Value> = output
        .stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(4, '\t');
            Some(json!({
                "sha": parts.next()?,
                "author": parts.next()?,
                "date": parts.next()?,
                "message": parts.next().unwrap_or(""),
            }))
        })
        .collect();
    Ok(Json(json!({ "commits": commits })))
}

pub async fn pr_link(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.sessions.session_view(&id)?;
    let output = gitio::gh(
        Path::new(&view.session.location_path),
        &["pr", "view", "--json", "url", "--jq", ".url"],
        Duration::from_millis(state.config.outbound_timeout_ms),
    )
    .await?;
    if !output.success() {
        // No PR for the branch is an empty answer, not an error.
        return Ok(Json(json!({ "url": null })));
    }
    let url = output.stdout.trim().to_string();
    Ok(Json(json!({ "url": if url.is_empty() { None } else { Some(url) } })))
}
