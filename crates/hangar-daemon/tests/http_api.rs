//! HTTP surface tests: the real router with in-memory state, driven via
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

use hangar_daemon::config::DaemonConfig;
use hangar_daemon::events::EventHub;
use hangar_daemon::http::{self, AppState};
use hangar_daemon::output::OutputLog;
use hangar_daemon::sessions::SessionManager;
use hangar_daemon::workers::WorkerRegistry;
use hangar_daemon::worktrees::WorktreeService;
use hangar_paths::HangarPaths;
use hangar_queue::JobQueue;
use hangar_store::Store;

struct TestApp {
    _dir: tempfile::TempDir,
    router: Router,
    store: Store,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DaemonConfig::default();
    config.home = dir.path().to_path_buf();
    config.webhook_secret = Some("s3cret".to_string());

    let paths = HangarPaths::from_dir(config.home.clone());
    let store = Store::open_in_memory().unwrap();
    let queue = JobQueue::new(store.clone(), 2);
    let hub = Arc::new(EventHub::new(64));
    let output = OutputLog::new(
        paths.clone(),
        config.flush_threshold,
        Duration::from_millis(config.flush_interval_ms),
        config.file_max_size,
    );
    let (activity_tx, _activity_rx) = tokio::sync::mpsc::unbounded_channel();
    let registry = WorkerRegistry::new(
        config.clone(),
        store.clone(),
        queue.clone(),
        output,
        hub.clone(),
        activity_tx,
    );
    let sessions = SessionManager::new(
        store.clone(),
        registry,
        hub.clone(),
        queue.clone(),
    );
    let worktrees = WorktreeService::new(config.clone(), paths.clone(), store.clone());

    let state = AppState {
        config,
        paths,
        store: store.clone(),
        queue,
        hub,
        sessions,
        worktrees,
    };
    TestApp {
        _dir: dir,
        router: http::router(state),
        store,
    }
}

async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_get_config_reports_identity() {
    let app = test_app();
    let (status, body) = request(&app.router, "GET", "/api/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["serverPid"], std::process::id());
    assert_eq!(body["capabilities"]["webhooks"], true);
}

#[tokio::test]
async fn test_repository_validation_and_conflict() {
    let app = test_app();

    // Not a git checkout: validation error with the uniform envelope.
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/repositories",
        Some(serde_json::json!({ "path": dir.path() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    // A real checkout registers; a second registration conflicts.
    std::fs::create_dir(dir.path().join(".git")).unwrap();
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/repositories",
        Some(serde_json::json!({ "path": dir.path() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{:?}", body);
    let repo_id = body["repository"]["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/repositories",
        Some(serde_json::json!({ "path": dir.path() })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, body) =
        request(&app.router, "GET", &format!("/api/repositories/{}", repo_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["repository"]["id"], repo_id.as_str());
}

#[tokio::test]
async fn test_agent_lifecycle_and_guards() {
    let app = test_app();

    // ReDoS-shaped patterns are rejected at creation.
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/agents",
        Some(serde_json::json!({
            "name": "bad",
            "commandTemplate": "bad \"{{prompt}}\"",
            "askingPatterns": ["(a+)+"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    // Missing {{prompt}} is rejected too.
    let (status, _body) = request(
        &app.router,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "name": "bad2", "commandTemplate": "bad" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/agents",
        Some(serde_json::json!({
            "name": "helper",
            "commandTemplate": "helper \"{{prompt}}\"",
            "askingPatterns": ["continue\\?"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let agent_id = body["agent"]["id"].as_str().unwrap().to_string();

    // A persisted session referencing the agent blocks deletion.
    app.store
        .insert_session(&hangar_core::Session {
            id: "s1".to_string(),
            kind: hangar_core::SessionKind::Quick,
            location_path: "/tmp".to_string(),
            repository_id: None,
            worktree_id: None,
            server_pid: None,
            title: None,
            initial_prompt: None,
            created_at: String::new(),
            updated_at: String::new(),
        })
        .unwrap();
    app.store
        .insert_worker(&hangar_core::types::worker::Worker {
            id: "w1".to_string(),
            session_id: "s1".to_string(),
            kind: hangar_core::types::worker::WorkerKind::Agent,
            name: "agent".to_string(),
            agent_id: Some(agent_id.clone()),
            pid: None,
            base_commit: None,
            created_at: String::new(),
        })
        .unwrap();

    let (status, body) =
        request(&app.router, "DELETE", &format!("/api/agents/{}", agent_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    // Once the session is gone the agent can be deleted.
    app.store.delete_session("s1").unwrap();
    let (status, _body) =
        request(&app.router, "DELETE", &format!("/api/agents/{}", agent_id), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_jobs_endpoints() {
    let app = test_app();
    app.store.insert_job("j1", "cleanup", "{}", 0, 5, 0).unwrap();

    let (status, body) = request(&app.router, "GET", "/api/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = request(&app.router, "GET", "/api/jobs/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["pending"], 1);

    // Retrying a pending job is a conflict; cancelling it succeeds.
    let (status, _body) = request(&app.router, "POST", "/api/jobs/j1/retry", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _body) = request(&app.router, "POST", "/api/jobs/j1/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _body) = request(&app.router, "GET", "/api/jobs/j1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = request(&app.router, "GET", "/api/jobs?status=zombie", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn test_webhook_signature_gate() {
    let app = test_app();
    let payload = serde_json::json!({
        "repository": { "full_name": "acme/widget" },
        "action": "opened",
    })
    .to_string();

    // Missing signature.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/github")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Valid signature enqueues and answers 200; the redelivery is 200 too.
    let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret").unwrap();
    mac.update(payload.as_bytes());
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/github")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header("x-hub-signature-256", &signature)
                    .header("x-github-delivery", "delivery-1")
                    .header("x-github-event", "issues")
                    .body(Body::from(payload.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(app.store.get_job("delivery-1").unwrap().job_type, "github-inbound");
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let app = test_app();
    let (status, body) = request(&app.router, "GET", "/api/sessions/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}
