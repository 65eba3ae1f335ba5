//! Session lifecycle orchestration.
//!
//! Owns the in-memory map of active sessions and mirrors every mutation to
//! the store. Delegates live-worker mechanics to the worker registry and
//! publishes lifecycle events on the hub. The registry knows nothing about
//! sessions beyond their ids; this manager is the only component that
//! composes both.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use hangar_core::types::worker::{Worker, WorkerKind};
use hangar_core::{AgentDefinition, Repository, Session, SessionKind, template};
use hangar_queue::JobQueue;
use hangar_store::Store;
use serde::Deserialize;
use sysinfo::{Pid, System};
use tracing::{info, warn};

use crate::errors::DaemonError;
use crate::events::EventHub;
use crate::events::types::{Event, SessionView};
use crate::gitio;
use crate::workers::{WorkerRegistry, WorkerSpawn};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(rename = "type")]
    pub kind: SessionKind,
    #[serde(default)]
    pub location_path: Option<String>,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub worktree_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub initial_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkerRequest {
    #[serde(rename = "type")]
    pub kind: WorkerKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

struct ManagerInner {
    store: Store,
    registry: WorkerRegistry,
    hub: Arc<EventHub>,
    queue: JobQueue,
    /// Sessions with live workers owned by this process.
    active: Mutex<HashMap<String, Session>>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        store: Store,
        registry: WorkerRegistry,
        hub: Arc<EventHub>,
        queue: JobQueue,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                registry,
                hub,
                queue,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.inner.registry
    }

    // --- Session lifecycle ---

    /// Create a session. Quick sessions pin any existing directory;
    /// worktree sessions must reference a registered worktree whose
    /// resolved path becomes the location.
    pub fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<SessionView, DaemonError> {
        let session = match request.kind {
            SessionKind::Quick => {
                let location = request
                    .location_path
                    .clone()
                    .ok_or_else(|| DaemonError::validation("location_path is required"))?;
                if !Path::new(&location).is_dir() {
                    return Err(DaemonError::validation(format!(
                        "location does not exist: '{}'",
                        location
                    )));
                }
                Session {
                    id: hangar_core::new_id(),
                    kind: SessionKind::Quick,
                    location_path: location,
                    repository_id: None,
                    worktree_id: None,
                    server_pid: Some(std::process::id()),
                    title: request.title.clone().or_else(|| {
                        request.initial_prompt.as_deref().map(Session::derive_title)
                    }),
                    initial_prompt: request.initial_prompt.clone(),
                    created_at: hangar_core::now_rfc3339(),
                    updated_at: hangar_core::now_rfc3339(),
                }
            }
            SessionKind::Worktree => {
                let repository_id = request
                    .repository_id
                    .clone()
                    .ok_or_else(|| DaemonError::validation("repository_id is required"))?;
                let worktree_id = request
                    .worktree_id
                    .clone()
                    .ok_or_else(|| DaemonError::validation("worktree_id is required"))?;
                let worktree = self.inner.store.get_worktree(&worktree_id)?;
                if worktree.repository_id != repository_id {
                    return Err(DaemonError::validation(
                        "worktree does not belong to the repository",
                    ));
                }
                Session {
                    id: hangar_core::new_id(),
                    kind: SessionKind::Worktree,
                    // The invariant: location is the worktree's resolved
                    // path, nothing caller-supplied.
                    location_path: worktree.path.clone(),
                    repository_id: Some(repository_id),
                    worktree_id: Some(worktree_id),
                    server_pid: Some(std::process::id()),
                    title: request.title.clone().or_else(|| {
                        request.initial_prompt.as_deref().map(Session::derive_title)
                    }),
                    initial_prompt: request.initial_prompt.clone(),
                    created_at: hangar_core::now_rfc3339(),
                    updated_at: hangar_core::now_rfc3339(),
                }
            }
        };
        session.validate().map_err(DaemonError::validation)?;
        self.inner.store.insert_session(&session)?;
        self.adopt(session.clone());

        info!(
            event = "daemon.session.create_completed",
            session_id = %session.id,
            session_type = session.kind.as_str(),
        );
        let view = SessionView {
            session,
            workers: Vec::new(),
        };
        self.inner.hub.publish(Event::SessionCreated {
            session: view.clone(),
        });
        Ok(view)
    }

    /// Register an externally created session (worktree creation flow,
    /// startup adoption) in the active map.
    pub fn adopt(&self, session: Session) {
        let mut active = lock_unpoisoned(&self.inner.active);
        active.insert(session.id.clone(), session);
    }

    /// Synchronously kill live workers, remove persistence, enqueue output
    /// cleanup.
    pub fn delete_session(&self, id: &str) -> Result<(), DaemonError> {
        // Must exist somewhere (active map or store).
        let _session = self.inner.store.get_session(id)?;
        info!(event = "daemon.session.delete_started", session_id = id);

        self.inner.registry.remove_session_workers(id);
        {
            let mut active = lock_unpoisoned(&self.inner.active);
            active.remove(id);
        }
        self.inner.store.delete_session(id)?;

        let payload = serde_json::json!({ "session_id": id });
        if let Err(e) =
            self.inner
                .queue
                .enqueue(crate::jobs::SESSION_OUTPUTS_CLEANUP, payload, Default::default())
        {
            warn!(event = "daemon.session.cleanup_enqueue_failed", error = %e);
        }

        self.inner.hub.publish(Event::SessionDeleted {
            session_id: id.to_string(),
        });
        info!(event = "daemon.session.delete_completed", session_id = id);
        Ok(())
    }

    /// Remove persistence only — used for orphaned sessions whose workers
    /// this process never owned.
    pub fn force_delete_session(&self, id: &str) -> Result<(), DaemonError> {
        self.inner.store.get_session(id)?;
        {
            let mut active = lock_unpoisoned(&self.inner.active);
            active.remove(id);
        }
        self.inner.store.delete_session(id)?;
        let payload = serde_json::json!({ "session_id": id });
        if let Err(e) =
            self.inner
                .queue
                .enqueue(crate::jobs::SESSION_OUTPUTS_CLEANUP, payload, Default::default())
        {
            warn!(event = "daemon.session.cleanup_enqueue_failed", error = %e);
        }
        self.inner.hub.publish(Event::SessionDeleted {
            session_id: id.to_string(),
        });
        Ok(())
    }

    /// Kill live workers but keep the row; worktree sessions only. Output
    /// logs are preserved for resume.
    pub fn pause_session(&self, id: &str) -> Result<(), DaemonError> {
        let session = self.inner.store.get_session(id)?;
        if session.kind != SessionKind::Worktree {
            return Err(DaemonError::validation("only worktree sessions can be paused"));
        }
        info!(event = "daemon.session.pause_started", session_id = id);

        self.inner.registry.remove_session_workers(id);
        for worker in self.inner.store.list_workers(id)? {
            if worker.kind.is_pty() && worker.pid.is_some() {
                self.inner.store.update_worker_pid(id, &worker.id, None)?;
            }
        }
        self.inner.store.update_session_server_pid(id, None)?;
        {
            let mut active = lock_unpoisoned(&self.inner.active);
            active.remove(id);
        }

        self.inner.hub.publish(Event::SessionPaused {
            session_id: id.to_string(),
        });
        info!(event = "daemon.session.pause_completed", session_id = id);
        Ok(())
    }

    /// Re-create live workers from the persisted rows; agents resume with
    /// the continue template when their definition has one.
    pub fn resume_session(&self, id: &str) -> Result<SessionView, DaemonError> {
        let mut session = self.inner.store.get_session(id)?;
        if !Path::new(&session.location_path).is_dir() {
            return Err(DaemonError::validation(format!(
                "session location no longer exists: '{}'",
                session.location_path
            )));
        }
        info!(event = "daemon.session.resume_started", session_id = id);

        self.inner.store.update_session_server_pid(id, Some(std::process::id()))?;
        session.server_pid = Some(std::process::id());
        self.adopt(session.clone());

        let workers = self.inner.store.list_workers(id)?;
        let mut revived = Vec::new();
        for worker in workers {
            let spawn = match worker.kind {
                WorkerKind::Agent => {
                    let agent_id = worker
                        .agent_id
                        .clone()
                        .ok_or_else(|| DaemonError::validation("agent worker has no agent_id"))?;
                    let agent = self.inner.store.get_agent(&agent_id)?;
                    let command = self.render_agent_command(&agent, &session, true);
                    WorkerSpawn::Agent {
                        agent,
                        command,
                        repo_env: self.repo_env(&session)?,
                    }
                }
                WorkerKind::Terminal => WorkerSpawn::Terminal {
                    shell: user_shell(),
                    repo_env: self.repo_env(&session)?,
                },
                WorkerKind::GitDiff => WorkerSpawn::GitDiff {
                    base_commit: worker
                        .base_commit
                        .clone()
                        .unwrap_or_else(|| "HEAD".to_string()),
                },
            };
            let record = self.inner.registry.create_worker_with_id(
                id,
                Path::new(&session.location_path),
                worker.id.clone(),
                worker.name.clone(),
                spawn,
                worker_cols(None),
                worker_rows(None),
            )?;
            if record.pid != worker.pid {
                self.inner.store.update_worker_pid(id, &worker.id, record.pid)?;
            }
            revived.push(record);
        }

        let view = SessionView {
            session,
            workers: revived,
        };
        self.inner.hub.publish(Event::SessionResumed {
            session: view.clone(),
        });
        info!(event = "daemon.session.resume_completed", session_id = id);
        Ok(view)
    }

    /// Update title in place; a branch change on a worktree session renames
    /// the local git branch and restarts the agent worker so the process
    /// sees the new name.
    pub async fn update_session_metadata(
        &self,
        id: &str,
        request: UpdateSessionRequest,
    ) -> Result<SessionView, DaemonError> {
        let session = self.inner.store.get_session(id)?;

        if let Some(title) = &request.title {
            self.inner.store.update_session_title(id, Some(title))?;
        }

        if let Some(new_branch) = &request.branch {
            if session.kind != SessionKind::Worktree {
                return Err(DaemonError::validation(
                    "branch can only be changed on worktree sessions",
                ));
            }
            let new_branch = gitio::validate_branch_name(new_branch)?;
            let location = Path::new(&session.location_path);
            let current = gitio::current_branch(location)?
                .ok_or_else(|| DaemonError::validation("worktree is in detached HEAD state"))?;
            if current != new_branch {
                let output =
                    gitio::git(location, &["branch", "-m", &current, &new_branch]).await?;
                gitio::expect_success(&output, "git branch -m")?;
                info!(
                    event = "daemon.session.branch_renamed",
                    session_id = id,
                    from = %current,
                    to = %new_branch,
                );
                for worker in self.inner.store.list_workers(id)? {
                    if worker.kind == WorkerKind::Agent
                        && self.inner.registry.is_live(id, &worker.id)
                    {
                        self.restart_agent_worker(id, &worker.id, true)?;
                    }
                }
            }
        }

        let view = self.session_view(id)?;
        self.inner.hub.publish(Event::SessionUpdated {
            session: view.clone(),
        });
        Ok(view)
    }

    // --- Workers ---

    /// Create a worker in a session. PTY spawn happens first; if the row
    /// insert fails the spawned PTY is rolled back and the original error
    /// surfaces.
    pub fn create_worker(
        &self,
        session_id: &str,
        request: CreateWorkerRequest,
        continue_conversation: bool,
    ) -> Result<Worker, DaemonError> {
        let session = {
            let active = lock_unpoisoned(&self.inner.active);
            active
                .get(session_id)
                .cloned()
                .ok_or_else(|| DaemonError::not_found("session", session_id))?
        };

        let spawn = match request.kind {
            WorkerKind::Agent => {
                let agent = self.resolve_agent(&session, request.agent_id.as_deref())?;
                let command =
                    self.render_agent_command(&agent, &session, continue_conversation);
                WorkerSpawn::Agent {
                    agent,
                    command,
                    repo_env: self.repo_env(&session)?,
                }
            }
            WorkerKind::Terminal => WorkerSpawn::Terminal {
                shell: user_shell(),
                repo_env: self.repo_env(&session)?,
            },
            WorkerKind::GitDiff => {
                let base = self.diff_base(&session)?;
                WorkerSpawn::GitDiff { base_commit: base }
            }
        };

        let name = self.unique_worker_name(session_id, request.name, request.kind)?;
        let record = self.inner.registry.create_worker(
            session_id,
            Path::new(&session.location_path),
            name,
            spawn,
            worker_cols(request.cols),
            worker_rows(request.rows),
        )?;

        if let Err(e) = self.inner.store.insert_worker(&record) {
            warn!(
                event = "daemon.worker.persist_failed",
                session_id = session_id,
                worker_id = %record.id,
                error = %e,
            );
            if let Err(rollback) = self.inner.registry.remove_worker(session_id, &record.id) {
                warn!(event = "daemon.worker.rollback_failed", error = %rollback);
            }
            return Err(e.into());
        }

        self.inner.hub.publish(Event::WorkerCreated {
            worker: record.clone(),
        });
        Ok(record)
    }

    pub fn delete_worker(&self, session_id: &str, worker_id: &str) -> Result<(), DaemonError> {
        // Live teardown tolerates a worker that only exists as a row.
        let row = self.inner.store.get_worker(session_id, worker_id)?;
        if self.inner.registry.get_live(session_id, worker_id).is_some() {
            self.inner.registry.delete_worker(session_id, worker_id)?;
        } else {
            let payload = serde_json::json!({
                "session_id": session_id,
                "worker_id": worker_id,
            });
            if let Err(e) = self.inner.queue.enqueue(
                crate::jobs::WORKER_OUTPUT_CLEANUP,
                payload,
                Default::default(),
            ) {
                warn!(event = "daemon.worker.cleanup_enqueue_failed", error = %e);
            }
        }
        self.inner.store.delete_worker(session_id, worker_id)?;
        self.inner.hub.publish(Event::WorkerDeleted {
            session_id: session_id.to_string(),
            worker_id: row.id,
        });
        Ok(())
    }

    /// Restart an agent worker in place, optionally with conversation
    /// continuation.
    pub fn restart_agent_worker(
        &self,
        session_id: &str,
        worker_id: &str,
        continue_conversation: bool,
    ) -> Result<Worker, DaemonError> {
        let session = self.inner.store.get_session(session_id)?;
        let row = self.inner.store.get_worker(session_id, worker_id)?;
        if row.kind != WorkerKind::Agent {
            return Err(DaemonError::validation("only agent workers can be restarted"));
        }
        let agent_id = row
            .agent_id
            .ok_or_else(|| DaemonError::validation("agent worker has no agent_id"))?;
        let agent = self.inner.store.get_agent(&agent_id)?;
        let command = self.render_agent_command(&agent, &session, continue_conversation);
        self.inner.registry.restart_agent(
            session_id,
            worker_id,
            agent,
            command,
            self.repo_env(&session)?,
            Path::new(&session.location_path),
        )
    }

    /// Forward a user message (plus any uploaded file paths) to the
    /// session's first live agent worker as PTY input.
    pub fn send_message(
        &self,
        session_id: &str,
        text: &str,
        file_paths: &[String],
    ) -> Result<(), DaemonError> {
        let workers = self.inner.store.list_workers(session_id)?;
        let agent = workers
            .iter()
            .find(|w| {
                w.kind == WorkerKind::Agent && self.inner.registry.is_live(session_id, &w.id)
            })
            .ok_or_else(|| DaemonError::WorkerNotLive("no live agent worker".to_string()))?;

        let mut input = text.to_string();
        for path in file_paths {
            input.push(' ');
            input.push_str(path);
        }
        input.push('\n');
        self.inner
            .registry
            .write_input(session_id, &agent.id, input.as_bytes())
    }

    /// Recent output lines of the session's agent worker.
    pub fn get_messages(&self, session_id: &str, n_lines: usize) -> Result<Vec<u8>, DaemonError> {
        let workers = self.inner.store.list_workers(session_id)?;
        let agent = workers
            .iter()
            .find(|w| w.kind == WorkerKind::Agent)
            .ok_or_else(|| DaemonError::not_found("worker", "agent"))?;
        Ok(self.inner.registry.read_tail(session_id, &agent.id, n_lines))
    }

    // --- Queries ---

    pub fn get_all_sessions(&self) -> Result<Vec<SessionView>, DaemonError> {
        let sessions = self.inner.store.list_sessions()?;
        sessions
            .into_iter()
            .map(|session| self.view_of(session))
            .collect()
    }

    pub fn session_view(&self, id: &str) -> Result<SessionView, DaemonError> {
        let session = self.inner.store.get_session(id)?;
        self.view_of(session)
    }

    pub fn get_sessions_using_agent(&self, agent_id: &str) -> Result<Vec<Session>, DaemonError> {
        Ok(self.inner.store.sessions_using_agent(agent_id)?)
    }

    pub fn get_sessions_using_repository(
        &self,
        repository_id: &str,
    ) -> Result<Vec<Session>, DaemonError> {
        Ok(self.inner.store.sessions_using_repository(repository_id)?)
    }

    /// Sessions whose pinned location no longer exists on disk.
    pub fn validate_all_sessions(&self) -> Result<Vec<Session>, DaemonError> {
        let sessions = self.inner.store.list_sessions()?;
        Ok(sessions
            .into_iter()
            .filter(|s| !Path::new(&s.location_path).is_dir())
            .collect())
    }

    pub fn is_active(&self, id: &str) -> bool {
        lock_unpoisoned(&self.inner.active).contains_key(id)
    }

    /// Kill every live worker of every active session (shutdown path).
    pub fn stop_all(&self) {
        let ids: Vec<String> = {
            let active = lock_unpoisoned(&self.inner.active);
            active.keys().cloned().collect()
        };
        for id in ids {
            self.inner.registry.remove_session_workers(&id);
        }
    }

    /// Startup recovery: adopt sessions owned by this pid, orphaned by a
    /// dead server, or paused (null pid) — as long as their location still
    /// exists. Git-diff workers are revived (cheap); PTY workers stay
    /// inactive until an explicit resume.
    pub fn recover_sessions(&self) -> Result<usize, DaemonError> {
        let system = System::new_all();
        let own_pid = std::process::id();
        let mut adopted = 0;

        for session in self.inner.store.list_sessions()? {
            if !Path::new(&session.location_path).is_dir() {
                continue;
            }
            let adoptable = match session.server_pid {
                None => true,
                Some(pid) if pid == own_pid => true,
                Some(pid) => !system.processes().contains_key(&Pid::from_u32(pid)),
            };
            if !adoptable {
                continue;
            }

            if session.server_pid != Some(own_pid) {
                self.inner
                    .store
                    .update_session_server_pid(&session.id, Some(own_pid))?;
            }
            for worker in self.inner.store.list_workers(&session.id)? {
                match worker.kind {
                    WorkerKind::GitDiff => {
                        let spawn = WorkerSpawn::GitDiff {
                            base_commit: worker
                                .base_commit
                                .clone()
                                .unwrap_or_else(|| "HEAD".to_string()),
                        };
                        if let Err(e) = self.inner.registry.create_worker_with_id(
                            &session.id,
                            Path::new(&session.location_path),
                            worker.id.clone(),
                            worker.name.clone(),
                            spawn,
                            80,
                            24,
                        ) {
                            warn!(event = "daemon.session.recover_diff_failed", error = %e);
                        }
                    }
                    WorkerKind::Agent | WorkerKind::Terminal => {
                        if worker.pid.is_some() {
                            self.inner
                                .store
                                .update_worker_pid(&session.id, &worker.id, None)?;
                        }
                    }
                }
            }
            self.adopt(session);
            adopted += 1;
        }

        info!(event = "daemon.session.recovery_completed", adopted = adopted);
        Ok(adopted)
    }

    // --- Helpers ---

    fn view_of(&self, session: Session) -> Result<SessionView, DaemonError> {
        let mut workers = self.inner.store.list_workers(&session.id)?;
        // Live registry state wins over possibly stale rows.
        for worker in &mut workers {
            if let Some(live) = self.inner.registry.get_live(&session.id, &worker.id) {
                worker.pid = live.pid;
            }
        }
        Ok(SessionView { session, workers })
    }

    fn resolve_agent(
        &self,
        session: &Session,
        agent_id: Option<&str>,
    ) -> Result<AgentDefinition, DaemonError> {
        if let Some(id) = agent_id {
            return Ok(self.inner.store.get_agent(id)?);
        }
        if let Some(repo_id) = &session.repository_id {
            let repo = self.inner.store.get_repository(repo_id)?;
            if let Some(default_id) = &repo.default_agent_id {
                return Ok(self.inner.store.get_agent(default_id)?);
            }
        }
        Err(DaemonError::validation(
            "agent_id is required (repository has no default agent)",
        ))
    }

    fn render_agent_command(
        &self,
        agent: &AgentDefinition,
        session: &Session,
        continue_conversation: bool,
    ) -> String {
        let template_text = if continue_conversation {
            agent
                .continue_template
                .as_deref()
                .unwrap_or(&agent.command_template)
        } else {
            &agent.command_template
        };
        let prompt = session.initial_prompt.as_deref().unwrap_or("");
        template::render_command(template_text, prompt, &session.location_path)
    }

    fn repo_env(&self, session: &Session) -> Result<Vec<(String, String)>, DaemonError> {
        let Some(repo_id) = &session.repository_id else {
            return Ok(Vec::new());
        };
        let repo = self.inner.store.get_repository(repo_id)?;
        Ok(repo
            .env_vars
            .as_deref()
            .map(hangar_core::env_policy::parse_dotenv)
            .unwrap_or_default())
    }

    fn repository_of(&self, session: &Session) -> Result<Option<Repository>, DaemonError> {
        match &session.repository_id {
            Some(id) => Ok(Some(self.inner.store.get_repository(id)?)),
            None => Ok(None),
        }
    }

    /// Merge-base of HEAD and the repo's default branch at creation time.
    fn diff_base(&self, session: &Session) -> Result<String, DaemonError> {
        let location = Path::new(&session.location_path);
        let default = match self.repository_of(session)? {
            Some(repo) => match repo.default_branch {
                Some(branch) => branch,
                None => gitio::default_branch(Path::new(&repo.path))?,
            },
            None => gitio::default_branch(location)?,
        };
        gitio::merge_base(location, &default)
    }

    fn unique_worker_name(
        &self,
        session_id: &str,
        requested: Option<String>,
        kind: WorkerKind,
    ) -> Result<String, DaemonError> {
        let base = requested.unwrap_or_else(|| kind.default_name().to_string());
        let taken: Vec<String> = self
            .inner
            .store
            .list_workers(session_id)?
            .into_iter()
            .map(|w| w.name)
            .collect();
        if !taken.contains(&base) {
            return Ok(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{} {}", base, n);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

fn user_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

fn worker_cols(cols: Option<u16>) -> u16 {
    cols.filter(|&c| c > 0).unwrap_or(80)
}

fn worker_rows(rows: Option<u16>) -> u16 {
    rows.filter(|&r| r > 0).unwrap_or(24)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_dimensions_default() {
        assert_eq!(worker_cols(None), 80);
        assert_eq!(worker_rows(None), 24);
        assert_eq!(worker_cols(Some(0)), 80);
        assert_eq!(worker_cols(Some(120)), 120);
    }

    #[test]
    fn test_user_shell_fallback() {
        // SHELL is set in almost every environment; just assert non-empty.
        assert!(!user_shell().is_empty());
    }
}
