use std::path::Path;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{ApiError, ApiResult, AppState};
use crate::errors::DaemonError;
use crate::events::types::Event;
use crate::gitio;
use crate::sessions::CreateWorkerRequest;
use crate::worktrees::{BranchMode, CreateWorktreeRequest};
use hangar_core::Repository;
use hangar_core::types::worker::WorkerKind;
use hangar_store::SlackConfig;
use hangar_store::repositories::RepositoryPatch;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let repositories = state.store.list_repositories()?;
    Ok(Json(json!({ "repositories": repositories })))
}

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub setup_command: Option<String>,
    #[serde(default)]
    pub cleanup_command: Option<String>,
    #[serde(default)]
    pub env_vars: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_agent_id: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateRepositoryRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    Repository::validate_path(&request.path).map_err(DaemonError::validation)?;
    let name = request.name.clone().unwrap_or_else(|| {
        Path::new(&request.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repository")
            .to_string()
    });
    let default_branch = gitio::default_branch(Path::new(&request.path)).ok();
    let repository = Repository {
        id: hangar_core::new_id(),
        name,
        path: request.path,
        setup_command: request.setup_command,
        cleanup_command: request.cleanup_command,
        env_vars: request.env_vars,
        description: request.description,
        default_agent_id: request.default_agent_id,
        default_branch,
        created_at: hangar_core::now_rfc3339(),
        updated_at: hangar_core::now_rfc3339(),
    };
    state.store.insert_repository(&repository)?;
    let repository = state.store.get_repository(&repository.id)?;
    state.hub.publish(Event::RepositoryCreated {
        repository: repository.clone(),
    });
    Ok((StatusCode::CREATED, Json(json!({ "repository": repository }))))
}

pub async fn get_one(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.get_repository(&id)?;
    Ok(Json(json!({ "repository": repository })))
}

pub async fn update(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(patch): Json<RepositoryPatchRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.update_repository(&id, &patch.into_patch())?;
    state.hub.publish(Event::RepositoryUpdated {
        repository: repository.clone(),
    });
    Ok(Json(json!({ "repository": repository })))
}

/// Double-optional PATCH body: a field absent leaves the column, `null`
/// clears it.
#[derive(Debug, Default, Deserialize)]
pub struct RepositoryPatchRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub setup_command: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub cleanup_command: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub env_vars: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub default_agent_id: Option<Option<String>>,
}

/// Field present (even as `null`) → `Some(inner)`; absent → `None` via
/// `#[serde(default)]`.
pub(crate) fn double_option<'de, D>(
    deserializer: D,
) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    Ok(Some(Option::deserialize(deserializer)?))
}

impl RepositoryPatchRequest {
    fn into_patch(self) -> RepositoryPatch {
        RepositoryPatch {
            name: self.name,
            setup_command: self.setup_command,
            cleanup_command: self.cleanup_command,
            env_vars: self.env_vars,
            description: self.description,
            default_agent_id: self.default_agent_id,
            default_branch: None,
        }
    }
}

pub async fn delete_one(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.get_repository(&id)?;
    let in_use = state.sessions.get_sessions_using_repository(&id)?;
    if !in_use.is_empty() {
        return Err(ApiError(DaemonError::conflict(format!(
            "repository '{}' has {} session(s)",
            repository.name,
            in_use.len()
        ))));
    }
    state.store.delete_repository(&id)?;

    // Managed directory cleanup happens in the background.
    let (org, repo_name) = repository.org_repo();
    let managed = state.paths.repo_dir(&org, &repo_name);
    if let Err(e) = state.queue.enqueue(
        crate::jobs::REPOSITORY_CLEANUP,
        json!({ "path": managed.to_string_lossy() }),
        Default::default(),
    ) {
        warn!(event = "daemon.repository.cleanup_enqueue_failed", error = %e);
    }

    state.hub.publish(Event::RepositoryDeleted {
        repository_id: id.clone(),
    });
    Ok(Json(json!({ "success": true })))
}

// --- Worktrees ---

pub async fn list_worktrees(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.get_repository(&id)?;
    let worktrees = state.worktrees.list_worktrees(&repository).await?;
    Ok(Json(json!({ "worktrees": worktrees })))
}

#[derive(Debug, Deserialize)]
pub struct CreateWorktreeBody {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(flatten)]
    pub branch_mode: BranchMode,
    #[serde(default, rename = "agentId")]
    pub agent_id: Option<String>,
    #[serde(default, rename = "initialPrompt")]
    pub initial_prompt: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "useRemote")]
    pub use_remote: bool,
}

/// 202-style async creation: the result is broadcast over the event hub
/// using the caller-supplied task id.
pub async fn create_worktree(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(body): Json<CreateWorktreeBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let repository = state.store.get_repository(&id)?;
    let task_id = body.task_id.clone();
    let request = CreateWorktreeRequest {
        branch_mode: body.branch_mode.clone(),
        initial_prompt: body.initial_prompt.clone(),
        title: body.title.clone(),
        use_remote: body.use_remote,
    };

    tokio::spawn(async move {
        let outcome = state.worktrees.create_worktree(&repository, &request).await;
        match outcome {
            Ok(outcome) => {
                state.sessions.adopt(outcome.session.clone());
                // Spawn the initial agent worker when one is resolvable;
                // its absence downgrades to a worktree without an agent.
                let worker_request = CreateWorkerRequest {
                    kind: WorkerKind::Agent,
                    name: None,
                    agent_id: body.agent_id.clone(),
                    cols: None,
                    rows: None,
                };
                if let Err(e) =
                    state
                        .sessions
                        .create_worker(&outcome.session.id, worker_request, false)
                {
                    warn!(
                        event = "daemon.worktree.agent_spawn_failed",
                        session_id = %outcome.session.id,
                        error = %e,
                    );
                }
                match state.sessions.session_view(&outcome.session.id) {
                    Ok(view) => {
                        info!(
                            event = "daemon.worktree.task_completed",
                            task_id = %task_id,
                            session_id = %outcome.session.id,
                        );
                        state.hub.publish(Event::WorktreeCreationCompleted {
                            task_id,
                            repository_id: repository.id.clone(),
                            session: view,
                        });
                    }
                    Err(e) => {
                        state.hub.publish(Event::WorktreeCreationFailed {
                            task_id,
                            repository_id: repository.id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                warn!(event = "daemon.worktree.task_failed", error = %e);
                state.hub.publish(Event::WorktreeCreationFailed {
                    task_id,
                    repository_id: repository.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}

#[derive(Debug, Deserialize)]
pub struct DeleteWorktreeBody {
    pub path: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default, rename = "taskId")]
    pub task_id: Option<String>,
}

/// Async removal with task progress events.
pub async fn delete_worktree(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(body): Json<DeleteWorktreeBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let repository = state.store.get_repository(&id)?;
    // The boundary check runs here too, so an obviously bad request fails
    // synchronously with 400 instead of a task event.
    if !state.worktrees.is_worktree_of(&repository, &body.path)? {
        return Err(ApiError(DaemonError::validation(format!(
            "'{}' is not a worktree of repository '{}'",
            body.path, repository.name
        ))));
    }

    let task_id = body.task_id.clone().unwrap_or_else(hangar_core::new_id);
    state.hub.publish(Event::WorktreeDeletionTaskCreated {
        task_id: task_id.clone(),
        path: body.path.clone(),
    });

    tokio::spawn(async move {
        // Sessions pinned to the worktree go first.
        if let Ok(sessions) = state.sessions.get_sessions_using_repository(&repository.id) {
            for session in sessions {
                if session.location_path == body.path {
                    state.hub.publish(Event::WorktreeDeletionTaskProgressing {
                        task_id: task_id.clone(),
                        message: format!("deleting session {}", session.id),
                    });
                    if let Err(e) = state.sessions.delete_session(&session.id) {
                        warn!(event = "daemon.worktree.session_delete_failed", error = %e);
                    }
                }
            }
        }
        state.hub.publish(Event::WorktreeDeletionTaskProgressing {
            task_id: task_id.clone(),
            message: "removing worktree".to_string(),
        });
        match state
            .worktrees
            .remove_worktree(&repository, &body.path, body.force)
            .await
        {
            Ok(()) => {
                state
                    .hub
                    .publish(Event::WorktreeDeletionTaskCompleted { task_id });
            }
            Err(e) => {
                state.hub.publish(Event::WorktreeDeletionTaskFailed {
                    task_id,
                    error: e.to_string(),
                });
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}

// --- Git operations ---

pub async fn branches(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.get_repository(&id)?;
    let branches = gitio::list_branches(Path::new(&repository.path))?;
    Ok(Json(json!({ "branches": branches })))
}

pub async fn refresh_default_branch(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.get_repository(&id)?;
    let output = gitio::git_with_timeout(
        Path::new(&repository.path),
        &["remote", "set-head", "origin", "--auto"],
        Duration::from_millis(state.config.outbound_timeout_ms),
    )
    .await?;
    if !output.success() {
        warn!(
            event = "daemon.repository.set_head_failed",
            stderr = %output.stderr.trim(),
        );
    }
    let default_branch = gitio::default_branch(Path::new(&repository.path))?;
    let repository = state.store.update_repository(
        &id,
        &RepositoryPatch {
            default_branch: Some(Some(default_branch.clone())),
            ..Default::default()
        },
    )?;
    state.hub.publish(Event::RepositoryUpdated {
        repository: repository.clone(),
    });
    Ok(Json(json!({ "repository": repository })))
}

pub async fn fetch(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.get_repository(&id)?;
    let output = gitio::git_with_timeout(
        Path::new(&repository.path),
        &["fetch", "--prune"],
        Duration::from_millis(state.config.outbound_timeout_ms),
    )
    .await?;
    gitio::expect_success(&output, "git fetch")?;
    Ok(Json(json!({ "success": true })))
}

// --- Slack subresources ---

pub async fn get_slack(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.get_repository(&id)?;
    let config = state.store.get_slack_config(&id)?;
    Ok(Json(json!({ "slack": config })))
}

#[derive(Debug, Deserialize)]
pub struct PutSlackBody {
    #[serde(rename = "webhookUrl")]
    pub webhook_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn put_slack(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(body): Json<PutSlackBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.get_repository(&id)?;
    if !body.webhook_url.starts_with("https://") {
        return Err(ApiError(DaemonError::validation(
            "webhookUrl must be an https URL",
        )));
    }
    let config = SlackConfig {
        repository_id: id,
        webhook_url: body.webhook_url,
        enabled: body.enabled,
    };
    state.store.upsert_slack_config(&config)?;
    Ok(Json(json!({ "slack": config })))
}

pub async fn delete_slack(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.delete_slack_config(&id)?;
    Ok(Json(json!({ "success": true })))
}

pub async fn test_slack(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.get_repository(&id)?;
    state.store.get_slack_config(&id)?.ok_or_else(|| {
        ApiError(DaemonError::not_found("slack config", &id))
    })?;
    state.queue.enqueue(
        crate::jobs::SLACK_NOTIFY,
        json!({
            "repository_id": id,
            "text": format!("hangar: test notification for '{}'", repository.name),
        }),
        Default::default(),
    )?;
    Ok(Json(json!({ "success": true })))
}

// --- GitHub issue prefill ---

#[derive(Debug, Deserialize)]
pub struct GithubIssueBody {
    pub number: u64,
}

pub async fn github_issue(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(body): Json<GithubIssueBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let repository = state.store.get_repository(&id)?;
    let number = body.number.to_string();
    let output = gitio::gh(
        Path::new(&repository.path),
        &["issue", "view", &number, "--json", "number,title,body,url"],
        Duration::from_millis(state.config.outbound_timeout_ms),
    )
    .await?;
    if !output.success() {
        return Err(ApiError(DaemonError::validation(format!(
            "gh issue view: {}",
            output.stderr.trim()
        ))));
    }
    let issue: serde_json::Value = serde_json::from_str(&output.stdout)
        .map_err(|e| DaemonError::validation(format!("gh output: {}", e)))?;
    Ok(Json(json!({ "issue": issue })))
}
