//! Background job handlers registered at boot.
//!
//! Handlers are idempotent: delivery is at-least-once and a crash mid-run
//! re-claims the job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hangar_paths::HangarPaths;
use hangar_queue::JobQueue;
use hangar_store::Store;
use tracing::{debug, info, warn};

use crate::output::OutputLog;
use crate::workers::WorkerRegistry;

pub const SESSION_OUTPUTS_CLEANUP: &str = "session-outputs-cleanup";
pub const WORKER_OUTPUT_CLEANUP: &str = "worker-output-cleanup";
pub const REPOSITORY_CLEANUP: &str = "repository-cleanup";
pub const GITHUB_INBOUND: &str = "github-inbound";
pub const SLACK_NOTIFY: &str = "slack-notify";
pub const UPLOADS_GC: &str = "uploads-gc";

/// Age past which upload files are collected.
const UPLOAD_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Register every job handler on the queue.
pub fn register_handlers(
    queue: &JobQueue,
    store: Store,
    output: OutputLog,
    registry: WorkerRegistry,
    paths: HangarPaths,
    outbound_timeout: Duration,
) {
    {
        let output = output.clone();
        queue.register_handler(SESSION_OUTPUTS_CLEANUP, move |payload| {
            let output = output.clone();
            async move {
                let session_id = require_str(&payload, "session_id")?;
                output.delete_session(&session_id);
                debug!(event = "jobs.session_outputs_cleaned", session_id = %session_id);
                Ok(())
            }
        });
    }

    {
        let output = output.clone();
        queue.register_handler(WORKER_OUTPUT_CLEANUP, move |payload| {
            let output = output.clone();
            async move {
                let session_id = require_str(&payload, "session_id")?;
                let worker_id = require_str(&payload, "worker_id")?;
                output.delete_worker(&session_id, &worker_id);
                Ok(())
            }
        });
    }

    {
        let repositories_root = paths.repositories_dir();
        queue.register_handler(REPOSITORY_CLEANUP, move |payload| {
            let repositories_root = repositories_root.clone();
            async move {
                let path = PathBuf::from(require_str(&payload, "path")?);
                // Only directories under the managed root are deletable.
                if !path.starts_with(&repositories_root) {
                    return Err(format!(
                        "refusing to delete '{}' outside {}",
                        path.display(),
                        repositories_root.display()
                    ));
                }
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(format!("remove {}: {}", path.display(), e)),
                }
            }
        });
    }

    {
        let store = store.clone();
        let registry = registry.clone();
        queue.register_handler(GITHUB_INBOUND, move |payload| {
            let store = store.clone();
            let registry = registry.clone();
            async move { process_github_inbound(&store, &registry, payload).await }
        });
    }

    {
        let store = store.clone();
        let timeout = outbound_timeout;
        queue.register_handler(SLACK_NOTIFY, move |payload| {
            let store = store.clone();
            async move {
                let repository_id = require_str(&payload, "repository_id")?;
                let text = require_str(&payload, "text")?;
                let Some(config) = store
                    .get_slack_config(&repository_id)
                    .map_err(|e| e.to_string())?
                else {
                    return Ok(());
                };
                if !config.enabled {
                    return Ok(());
                }
                post_slack(&config.webhook_url, &text, timeout).await
            }
        });
    }

    {
        let uploads_dir = paths.uploads_dir();
        queue.register_handler(UPLOADS_GC, move |_payload| {
            let uploads_dir = uploads_dir.clone();
            async move {
                collect_stale_uploads(&uploads_dir);
                Ok(())
            }
        });
    }

    info!(event = "jobs.handlers_registered");
}

/// Route an inbound GitHub event to agent workers of sessions on the
/// matching repository. The `inbound_event_notifications` unique key makes
/// redelivery a no-op per (job, session, worker, handler).
async fn process_github_inbound(
    store: &Store,
    registry: &WorkerRegistry,
    payload: serde_json::Value,
) -> Result<(), String> {
    let job_id = require_str(&payload, "job_id")?;
    let repo_full_name = payload["repository"].as_str().unwrap_or_default().to_string();
    let text = payload["text"].as_str().unwrap_or_default().to_string();
    if repo_full_name.is_empty() || text.is_empty() {
        // Nothing routable; complete rather than retry forever.
        return Ok(());
    }

    let repositories = store.list_repositories().map_err(|e| e.to_string())?;
    let Some(repo) = repositories.iter().find(|r| {
        let (org, name) = r.org_repo();
        format!("{}/{}", org, name) == repo_full_name || r.name == repo_full_name
    }) else {
        debug!(event = "jobs.github_inbound_unmatched", repository = %repo_full_name);
        return Ok(());
    };

    let sessions = store
        .sessions_using_repository(&repo.id)
        .map_err(|e| e.to_string())?;
    for session in sessions {
        let workers = store.list_workers(&session.id).map_err(|e| e.to_string())?;
        for worker in workers {
            if worker.kind != hangar_core::types::worker::WorkerKind::Agent {
                continue;
            }
            if !registry.is_live(&session.id, &worker.id) {
                continue;
            }
            let fresh = store
                .record_inbound_notification(
                    &hangar_core::new_id(),
                    &job_id,
                    &session.id,
                    &worker.id,
                    GITHUB_INBOUND,
                )
                .map_err(|e| e.to_string())?;
            if !fresh {
                continue;
            }
            let message = format!("\n# GitHub event\n{}\n", text);
            if let Err(e) = registry.write_input(&session.id, &worker.id, message.as_bytes()) {
                warn!(
                    event = "jobs.github_inbound_write_failed",
                    session_id = %session.id,
                    worker_id = %worker.id,
                    error = %e,
                );
            }
        }
    }
    Ok(())
}

async fn post_slack(webhook_url: &str, text: &str, timeout: Duration) -> Result<(), String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;
    let response = client
        .post(webhook_url)
        .json(&serde_json::json!({ "text": text }))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("slack returned {}", response.status()));
    }
    Ok(())
}

fn collect_stale_uploads(uploads_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(uploads_dir) else {
        return;
    };
    let now = std::time::SystemTime::now();
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let stale = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .map(|age| age > UPLOAD_MAX_AGE)
            .unwrap_or(false);
        if stale {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(event = "jobs.upload_gc_failed", error = %e);
            }
        }
    }
}

fn require_str(payload: &serde_json::Value, field: &str) -> Result<String, String> {
    payload[field]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| format!("payload missing '{}'", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_str() {
        let payload = serde_json::json!({"session_id": "s1"});
        assert_eq!(require_str(&payload, "session_id").unwrap(), "s1");
        assert!(require_str(&payload, "worker_id").is_err());
    }

    #[test]
    fn test_collect_stale_uploads_ignores_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.png"), b"x").unwrap();
        collect_stale_uploads(dir.path());
        assert!(dir.path().join("fresh.png").exists());
    }

    #[test]
    fn test_collect_stale_uploads_missing_dir() {
        collect_stale_uploads(Path::new("/definitely/not/here"));
    }
}
