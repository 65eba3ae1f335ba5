//! Daemon server entrypoint: wiring, recovery, serve, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hangar_core::AgentDefinition;
use hangar_core::types::agent::AgentType;
use hangar_paths::HangarPaths;
use hangar_queue::JobQueue;
use hangar_store::Store;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activity::ActivityTransition;
use crate::config::DaemonConfig;
use crate::errors::DaemonError;
use crate::events::EventHub;
use crate::events::types::Event;
use crate::http::{self, AppState};
use crate::output::OutputLog;
use crate::sessions::SessionManager;
use crate::workers::WorkerRegistry;
use crate::worktrees::WorktreeService;
use crate::{jobs, pid};
use hangar_core::ActivityState;

/// Run the daemon.
///
/// 1. Refuses to double-start (pid file).
/// 2. Opens the store, seeds built-in agents, starts the job queue
///    (crash recovery inside).
/// 3. Adopts recoverable sessions.
/// 4. Serves HTTP/WS on localhost until SIGTERM/SIGINT.
/// 5. Shuts down: stop queue, kill live PTYs, remove pid file.
pub async fn run_server(config: DaemonConfig) -> Result<(), DaemonError> {
    let paths = HangarPaths::from_dir(config.home.clone());
    std::fs::create_dir_all(paths.hangar_dir())?;

    let pid_path = paths.daemon_pid_file();
    if let Some(existing) = pid::check_daemon_running(&pid_path) {
        return Err(DaemonError::AlreadyRunning(existing));
    }
    pid::write_pid_file(&pid_path)?;

    let store = Store::open(&paths.store_db())?;
    seed_builtin_agents(&store)?;

    let hub = Arc::new(EventHub::new(config.subscriber_queue_size));
    let queue = JobQueue::new(store.clone(), config.queue_concurrency);
    let output = OutputLog::new(
        paths.clone(),
        config.flush_threshold,
        Duration::from_millis(config.flush_interval_ms),
        config.file_max_size,
    );
    let (activity_tx, activity_rx) = mpsc::unbounded_channel();
    let registry = WorkerRegistry::new(
        config.clone(),
        store.clone(),
        queue.clone(),
        output.clone(),
        hub.clone(),
        activity_tx,
    );
    let sessions = SessionManager::new(
        store.clone(),
        registry.clone(),
        hub.clone(),
        queue.clone(),
    );
    let worktrees = WorktreeService::new(config.clone(), paths.clone(), store.clone());

    jobs::register_handlers(
        &queue,
        store.clone(),
        output.clone(),
        registry.clone(),
        paths.clone(),
        Duration::from_millis(config.outbound_timeout_ms),
    );
    queue.start()?;

    spawn_activity_forwarder(activity_rx, hub.clone(), store.clone(), queue.clone());
    spawn_job_update_forwarder(&queue, hub.clone());
    spawn_uploads_gc_timer(queue.clone());

    sessions.recover_sessions()?;

    let state = AppState {
        config: config.clone(),
        paths: paths.clone(),
        store,
        queue: queue.clone(),
        hub,
        sessions: sessions.clone(),
        worktrees,
    };
    let router = http::router(state);

    // Localhost bind; there is no end-user auth layer.
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(event = "daemon.server.bind_failed", addr = %addr, error = %e);
        DaemonError::Io(e)
    })?;
    info!(
        event = "daemon.server.started",
        pid = std::process::id(),
        addr = %addr,
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await?;

    info!(event = "daemon.server.shutdown_started");
    queue.stop();
    sessions.stop_all();
    pid::remove_pid_file(&pid_path);
    info!(event = "daemon.server.shutdown_completed");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!(event = "daemon.server.signal_handler_failed", error = %e);
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!(event = "daemon.server.signal_received");
        shutdown.cancel();
    });
}

/// Activity transitions become hub events; `waiting` on a Slack-enabled
/// repository also queues a notification.
fn spawn_activity_forwarder(
    mut activity_rx: mpsc::UnboundedReceiver<ActivityTransition>,
    hub: Arc<EventHub>,
    store: Store,
    queue: JobQueue,
) {
    tokio::spawn(async move {
        while let Some(transition) = activity_rx.recv().await {
            hub.publish(Event::WorkerActivityState {
                session_id: transition.session_id.clone(),
                worker_id: transition.worker_id.clone(),
                state: transition.state,
                timestamp: transition.timestamp.clone(),
            });

            if transition.state != ActivityState::Waiting {
                continue;
            }
            let repository_id = store
                .get_session(&transition.session_id)
                .ok()
                .and_then(|s| s.repository_id);
            let Some(repository_id) = repository_id else {
                continue;
            };
            let enabled = store
                .get_slack_config(&repository_id)
                .ok()
                .flatten()
                .map(|c| c.enabled)
                .unwrap_or(false);
            if !enabled {
                continue;
            }
            let payload = serde_json::json!({
                "repository_id": repository_id,
                "text": format!(
                    "hangar: agent in session {} is waiting for input",
                    transition.session_id
                ),
            });
            if let Err(e) = queue.enqueue(jobs::SLACK_NOTIFY, payload, Default::default()) {
                warn!(event = "daemon.activity.slack_enqueue_failed", error = %e);
            }
        }
    });
}

fn spawn_job_update_forwarder(queue: &JobQueue, hub: Arc<EventHub>) {
    let mut updates_rx = queue.subscribe_updates();
    tokio::spawn(async move {
        loop {
            match updates_rx.recv().await {
                Ok(job) => hub.publish(Event::JobUpdated { job }),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(event = "daemon.jobs.updates_lagged", skipped = skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Hourly upload garbage collection.
fn spawn_uploads_gc_timer(queue: JobQueue) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        // The immediate first tick collects leftovers from previous runs.
        loop {
            interval.tick().await;
            if let Err(e) =
                queue.enqueue(jobs::UPLOADS_GC, serde_json::json!({}), Default::default())
            {
                warn!(event = "daemon.uploads.gc_enqueue_failed", error = %e);
            }
        }
    });
}

/// Ship a default agent so a fresh install can create workers immediately.
/// Built-ins are undeletable.
fn seed_builtin_agents(store: &Store) -> Result<(), DaemonError> {
    if !store.list_agents()?.is_empty() {
        return Ok(());
    }
    let agent = AgentDefinition {
        id: hangar_core::new_id(),
        name: "claude".to_string(),
        agent_type: AgentType::Pty,
        command_template: "claude \"{{prompt}}\"".to_string(),
        continue_template: Some("claude --continue".to_string()),
        headless_template: Some("claude -p \"{{prompt}}\"".to_string()),
        description: Some("Claude Code CLI".to_string()),
        is_built_in: true,
        asking_patterns: vec![
            "Do you want to .*\\?".to_string(),
            "\\[y/N\\]".to_string(),
            "❯ 1\\. Yes".to_string(),
        ],
        created_at: hangar_core::now_rfc3339(),
        updated_at: hangar_core::now_rfc3339(),
    };
    agent
        .validate()
        .map_err(DaemonError::validation)?;
    store.insert_agent(&agent)?;
    info!(event = "daemon.agents.builtin_seeded", name = %agent.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_builtin_agents_once() {
        let store = Store::open_in_memory().unwrap();
        seed_builtin_agents(&store).unwrap();
        let agents = store.list_agents().unwrap();
        assert_eq!(agents.len(), 1);
        assert!(agents[0].is_built_in);

        // Second boot does not duplicate.
        seed_builtin_agents(&store).unwrap();
        assert_eq!(store.list_agents().unwrap().len(), 1);
    }

    #[test]
    fn test_builtin_patterns_compile() {
        let store = Store::open_in_memory().unwrap();
        seed_builtin_agents(&store).unwrap();
        let agent = &store.list_agents().unwrap()[0];
        assert!(
            hangar_core::patterns::compile_asking_patterns(&agent.asking_patterns).is_ok()
        );
    }
}
