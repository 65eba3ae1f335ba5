//! HTTP/WS surface: a thin translation layer. Each handler validates and
//! calls into the managers; errors map onto the four API kinds through one
//! JSON shape.

pub mod agents;
pub mod jobs;
pub mod repositories;
pub mod sessions;
pub mod system;
pub mod webhooks;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;

use crate::config::DaemonConfig;
use crate::errors::DaemonError;
use crate::events::EventHub;
use crate::sessions::SessionManager;
use crate::worktrees::WorktreeService;
use crate::ws;
use hangar_paths::HangarPaths;
use hangar_queue::JobQueue;
use hangar_store::Store;

/// Shared state for every HTTP/WS handler.
#[derive(Clone)]
pub struct AppState {
    pub config: DaemonConfig,
    pub paths: HangarPaths,
    pub store: Store,
    pub queue: JobQueue,
    pub hub: Arc<EventHub>,
    pub sessions: SessionManager,
    pub worktrees: WorktreeService,
}

/// Uniform error envelope: `{"error": message, "code": kind}`.
pub struct ApiError(pub DaemonError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::Json(serde_json::json!({
            "error": self.0.to_string(),
            "code": kind.as_str(),
        }));
        (status, body).into_response()
    }
}

impl<E: Into<DaemonError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(system::get_config))
        // Sessions
        .route("/api/sessions", get(sessions::list).post(sessions::create))
        .route("/api/sessions/validate", get(sessions::validate))
        .route(
            "/api/sessions/:id",
            get(sessions::get_one)
                .delete(sessions::delete_one)
                .patch(sessions::update),
        )
        .route("/api/sessions/:id/invalid", delete(sessions::delete_invalid))
        .route("/api/sessions/:id/pause", post(sessions::pause))
        .route("/api/sessions/:id/resume", post(sessions::resume))
        .route("/api/sessions/:id/messages", post(sessions::post_message))
        .route(
            "/api/sessions/:id/workers",
            get(sessions::list_workers).post(sessions::create_worker),
        )
        .route(
            "/api/sessions/:id/workers/:wid",
            delete(sessions::delete_worker),
        )
        .route(
            "/api/sessions/:id/workers/:wid/restart",
            post(sessions::restart_worker),
        )
        .route("/api/sessions/:id/workers/:wid/diff", get(sessions::diff))
        .route(
            "/api/sessions/:id/workers/:wid/diff/*file",
            get(sessions::diff_file),
        )
        .route("/api/sessions/:id/branches", get(sessions::branches))
        .route("/api/sessions/:id/commits", get(sessions::commits))
        .route("/api/sessions/:id/pr-link", get(sessions::pr_link))
        // Repositories
        .route(
            "/api/repositories",
            get(repositories::list).post(repositories::create),
        )
        .route(
            "/api/repositories/:id",
            get(repositories::get_one)
                .patch(repositories::update)
                .delete(repositories::delete_one),
        )
        .route(
            "/api/repositories/:id/worktrees",
            get(repositories::list_worktrees)
                .post(repositories::create_worktree)
                .delete(repositories::delete_worktree),
        )
        .route("/api/repositories/:id/branches", get(repositories::branches))
        .route(
            "/api/repositories/:id/refresh-default-branch",
            post(repositories::refresh_default_branch),
        )
        .route("/api/repositories/:id/fetch", post(repositories::fetch))
        .route(
            "/api/repositories/:id/slack",
            get(repositories::get_slack)
                .put(repositories::put_slack)
                .delete(repositories::delete_slack),
        )
        .route("/api/repositories/:id/slack/test", post(repositories::test_slack))
        .route(
            "/api/repositories/:id/github-issue",
            post(repositories::github_issue),
        )
        // Agents
        .route("/api/agents", get(agents::list).post(agents::create))
        .route(
            "/api/agents/:id",
            get(agents::get_one).patch(agents::update).delete(agents::delete_one),
        )
        // Jobs
        .route("/api/jobs", get(jobs::list))
        .route("/api/jobs/stats", get(jobs::stats))
        .route("/api/jobs/:id", get(jobs::get_one))
        .route("/api/jobs/:id/retry", post(jobs::retry))
        .route("/api/jobs/:id/cancel", post(jobs::cancel))
        // System
        .route("/api/system/open", post(system::open_path))
        .route("/api/system/open-in-vscode", post(system::open_in_vscode))
        // Webhooks
        .route("/api/webhooks/github", post(webhooks::github))
        // WebSockets
        .route("/ws", get(ws::app::upgrade))
        .route("/ws/sessions/:sid/workers/:wid", get(ws::worker::upgrade))
        .layer(CorsLayer::permissive())
        // Default axum body cap is 2 MB; message uploads need headroom up
        // to the configured total plus multipart framing.
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_total_file_size as usize + 1024 * 1024,
        ))
        .with_state(state)
}
