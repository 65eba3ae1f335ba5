//! Worker registry: owns every live worker in the process.
//!
//! A live worker composes the PTY handle, the worker's output-log handle,
//! the activity detector (agents only) and the per-subscriber fan-out list.
//! One pump task per PTY worker serializes delivery: bytes reach the output
//! log, the detector and every attached listener in exactly the order the
//! PTY produced them. Attaching a listener snapshots the log offset under
//! the same lock the pump appends under, so (history up to offset) +
//! (live from offset) has no gaps and no duplicates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hangar_core::types::worker::{Worker, WorkerKind};
use hangar_core::{ActivityState, AgentDefinition};
use hangar_queue::JobQueue;
use hangar_store::Store;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::activity::{ActivityDetector, ActivityTransition};
use crate::config::DaemonConfig;
use crate::errors::DaemonError;
use crate::events::types::Event;
use crate::events::EventHub;
use crate::output::OutputLog;
use crate::pty::{self, PtyEvent, PtyHandle, SpawnSpec};

/// What to run for a new worker. The session manager resolves agent
/// definitions, renders command templates and computes base commits; the
/// registry only spawns and wires.
#[derive(Debug, Clone)]
pub enum WorkerSpawn {
    Agent {
        agent: AgentDefinition,
        /// Fully rendered command line.
        command: String,
        repo_env: Vec<(String, String)>,
    },
    Terminal {
        shell: String,
        repo_env: Vec<(String, String)>,
    },
    GitDiff {
        base_commit: String,
    },
}

impl WorkerSpawn {
    fn kind(&self) -> WorkerKind {
        match self {
            WorkerSpawn::Agent { .. } => WorkerKind::Agent,
            WorkerSpawn::Terminal { .. } => WorkerKind::Terminal,
            WorkerSpawn::GitDiff { .. } => WorkerKind::GitDiff,
        }
    }
}

/// Events delivered to attached worker-stream listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerStreamEvent {
    Data(Vec<u8>),
    Exit { exit_code: Option<i32> },
}

pub type ListenerId = u64;

/// State shared between a live worker and its pump task.
struct WorkerShared {
    session_id: String,
    worker_id: String,
    /// Listener map doubling as the delivery lock: the pump holds it across
    /// append + fan-out, attach holds it across offset snapshot + insert.
    listeners: Mutex<HashMap<ListenerId, mpsc::UnboundedSender<WorkerStreamEvent>>>,
    next_listener_id: AtomicU64,
    /// Set when this spawn generation is torn down (delete, restart). A
    /// retired pump must not touch the log or the registry again — a
    /// restart may already own the same worker id.
    retired: std::sync::atomic::AtomicBool,
}

struct LiveWorker {
    record: Worker,
    pty: Option<Arc<PtyHandle>>,
    detector: Option<ActivityDetector>,
    shared: Arc<WorkerShared>,
}

type WorkerKey = (String, String);

struct RegistryInner {
    config: DaemonConfig,
    store: Store,
    queue: JobQueue,
    output: OutputLog,
    hub: Arc<EventHub>,
    activity_tx: mpsc::UnboundedSender<ActivityTransition>,
    live: Mutex<HashMap<WorkerKey, LiveWorker>>,
}

/// Handle to the worker registry. Cheap to clone.
#[derive(Clone)]
pub struct WorkerRegistry {
    inner: Arc<RegistryInner>,
}

impl WorkerRegistry {
    pub fn new(
        config: DaemonConfig,
        store: Store,
        queue: JobQueue,
        output: OutputLog,
        hub: Arc<EventHub>,
        activity_tx: mpsc::UnboundedSender<ActivityTransition>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                store,
                queue,
                output,
                hub,
                activity_tx,
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn output(&self) -> &OutputLog {
        &self.inner.output
    }

    /// Spawn and register a live worker. The caller persists the returned
    /// row; on persistence failure it must call `remove_worker` to roll the
    /// spawn back.
    pub fn create_worker(
        &self,
        session_id: &str,
        location_path: &std::path::Path,
        name: String,
        spawn: WorkerSpawn,
        cols: u16,
        rows: u16,
    ) -> Result<Worker, DaemonError> {
        let worker_id = hangar_core::new_id();
        self.create_worker_with_id(session_id, location_path, worker_id, name, spawn, cols, rows)
    }

    /// As `create_worker` but with a caller-fixed worker id (restart and
    /// session resume retain ids).
    pub fn create_worker_with_id(
        &self,
        session_id: &str,
        location_path: &std::path::Path,
        worker_id: String,
        name: String,
        spawn: WorkerSpawn,
        cols: u16,
        rows: u16,
    ) -> Result<Worker, DaemonError> {
        let kind = spawn.kind();
        info!(
            event = "daemon.worker.create_started",
            session_id = session_id,
            worker_id = %worker_id,
            worker_type = kind.as_str(),
        );

        let mut record = Worker {
            id: worker_id.clone(),
            session_id: session_id.to_string(),
            kind,
            name,
            agent_id: None,
            pid: None,
            base_commit: None,
            created_at: hangar_core::now_rfc3339(),
        };

        let shared = Arc::new(WorkerShared {
            session_id: session_id.to_string(),
            worker_id: worker_id.clone(),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            retired: std::sync::atomic::AtomicBool::new(false),
        });

        let (pty, detector) = match &spawn {
            WorkerSpawn::GitDiff { base_commit } => {
                record.base_commit = Some(base_commit.clone());
                (None, None)
            }
            WorkerSpawn::Agent { agent, command, repo_env } => {
                record.agent_id = Some(agent.id.clone());
                let patterns = hangar_core::patterns::compile_asking_patterns(
                    &agent.asking_patterns,
                )
                .map_err(|e| DaemonError::validation(e.to_string()))?;
                let detector = ActivityDetector::new(
                    session_id,
                    &worker_id,
                    patterns,
                    Duration::from_millis(self.inner.config.idle_timeout_ms),
                    self.inner.activity_tx.clone(),
                );
                let handle = self.spawn_pump(
                    shared.clone(),
                    Some(detector.clone()),
                    command,
                    location_path,
                    repo_env.clone(),
                    cols,
                    rows,
                )?;
                record.pid = handle.pid();
                (Some(handle), Some(detector))
            }
            WorkerSpawn::Terminal { shell, repo_env } => {
                let handle = self.spawn_pump(
                    shared.clone(),
                    None,
                    shell,
                    location_path,
                    repo_env.clone(),
                    cols,
                    rows,
                )?;
                record.pid = handle.pid();
                (Some(handle), None)
            }
        };

        let live = LiveWorker {
            record: record.clone(),
            pty,
            detector,
            shared,
        };
        let key = (session_id.to_string(), worker_id.clone());
        {
            let mut map = lock_unpoisoned(&self.inner.live);
            map.insert(key, live);
        }

        info!(
            event = "daemon.worker.create_completed",
            session_id = session_id,
            worker_id = %worker_id,
            pid = ?record.pid,
        );
        Ok(record)
    }

    fn spawn_pump(
        &self,
        shared: Arc<WorkerShared>,
        detector: Option<ActivityDetector>,
        command: &str,
        cwd: &std::path::Path,
        repo_env: Vec<(String, String)>,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<PtyHandle>, DaemonError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(pty::spawn_pty(
            &SpawnSpec {
                command: command.to_string(),
                cwd: cwd.to_path_buf(),
                cols,
                rows,
                repo_env,
            },
            events_tx,
        )?);

        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if shared.retired.load(Ordering::Acquire) {
                    break;
                }
                match event {
                    PtyEvent::Data(data) => {
                        let listeners = lock_unpoisoned(&shared.listeners);
                        registry
                            .inner
                            .output
                            .append(&shared.session_id, &shared.worker_id, &data);
                        if let Some(detector) = &detector {
                            detector.feed(&data);
                        }
                        fan_out(listeners, WorkerStreamEvent::Data(data));
                    }
                    PtyEvent::Exit { exit_code } => {
                        registry.handle_exit(&shared, exit_code);
                        break;
                    }
                }
            }
        });

        Ok(handle)
    }

    /// Exit side effects: final flush, mark dead, notify listeners and the
    /// hub. A retired generation exits silently.
    fn handle_exit(&self, shared: &WorkerShared, exit_code: Option<i32>) {
        if shared.retired.load(Ordering::Acquire) {
            return;
        }
        info!(
            event = "daemon.worker.pty_exited",
            session_id = %shared.session_id,
            worker_id = %shared.worker_id,
            exit_code = ?exit_code,
        );
        self.inner
            .output
            .flush(&shared.session_id, &shared.worker_id);

        {
            let mut map = lock_unpoisoned(&self.inner.live);
            if let Some(live) =
                map.get_mut(&(shared.session_id.clone(), shared.worker_id.clone()))
            {
                live.pty = None;
                live.record.pid = None;
                if let Some(detector) = &live.detector {
                    detector.cancel();
                }
            }
        }
        if let Err(e) =
            self.inner
                .store
                .update_worker_pid(&shared.session_id, &shared.worker_id, None)
        {
            // Row may already be gone when the exit races a delete.
            debug!(event = "daemon.worker.pid_clear_skipped", error = %e);
        }

        {
            let listeners = lock_unpoisoned(&shared.listeners);
            fan_out(listeners, WorkerStreamEvent::Exit { exit_code });
        }
        self.inner.hub.publish(Event::WorkerExited {
            session_id: shared.session_id.clone(),
            worker_id: shared.worker_id.clone(),
            exit_code,
        });
    }

    /// Forward input bytes to the PTY.
    pub fn write_input(
        &self,
        session_id: &str,
        worker_id: &str,
        data: &[u8],
    ) -> Result<(), DaemonError> {
        let pty = self.live_pty(session_id, worker_id)?;
        pty.write(data)
    }

    pub fn resize(
        &self,
        session_id: &str,
        worker_id: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(), DaemonError> {
        let pty = self.live_pty(session_id, worker_id)?;
        pty.resize(cols, rows)
    }

    /// Atomic agent restart: kill the PTY, reset the output log, rebuild the
    /// PTY from the caller-rendered command. The worker id is retained.
    pub fn restart_agent(
        &self,
        session_id: &str,
        worker_id: &str,
        agent: AgentDefinition,
        command: String,
        repo_env: Vec<(String, String)>,
        location_path: &std::path::Path,
    ) -> Result<Worker, DaemonError> {
        info!(
            event = "daemon.worker.restart_started",
            session_id = session_id,
            worker_id = worker_id,
        );
        let name = {
            let mut map = lock_unpoisoned(&self.inner.live);
            let key = (session_id.to_string(), worker_id.to_string());
            let Some(live) = map.remove(&key) else {
                return Err(DaemonError::not_found("worker", worker_id));
            };
            if live.record.kind != WorkerKind::Agent {
                map.insert(key, live);
                return Err(DaemonError::validation("only agent workers can be restarted"));
            }
            live.shared.retired.store(true, Ordering::Release);
            if let Some(detector) = &live.detector {
                detector.cancel();
            }
            if let Some(pty) = &live.pty {
                if let Some(pid) = pty.pid() {
                    self.kill_with_grace(pid);
                }
                pty.kill();
            }
            live.record.name
        };

        self.inner.output.reset(session_id, worker_id);

        let record = self.create_worker_with_id(
            session_id,
            location_path,
            worker_id.to_string(),
            name,
            WorkerSpawn::Agent {
                agent,
                command,
                repo_env,
            },
            80,
            24,
        )?;
        if let Err(e) = self
            .inner
            .store
            .update_worker_pid(session_id, worker_id, record.pid)
        {
            warn!(event = "daemon.worker.restart_pid_update_failed", error = %e);
        }
        self.inner.hub.publish(Event::WorkerUpdated {
            worker: record.clone(),
        });
        info!(
            event = "daemon.worker.restart_completed",
            session_id = session_id,
            worker_id = worker_id,
            pid = ?record.pid,
        );
        Ok(record)
    }

    /// Kill (PTY workers), unregister, and enqueue output cleanup.
    pub fn delete_worker(&self, session_id: &str, worker_id: &str) -> Result<(), DaemonError> {
        self.remove_worker(session_id, worker_id)?;
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
        Ok(())
    }

    /// Kill and unregister without enqueuing cleanup (pause, rollback,
    /// session-level delete).
    pub fn remove_worker(&self, session_id: &str, worker_id: &str) -> Result<(), DaemonError> {
        let live = {
            let mut map = lock_unpoisoned(&self.inner.live);
            map.remove(&(session_id.to_string(), worker_id.to_string()))
                .ok_or_else(|| DaemonError::not_found("worker", worker_id))?
        };
        self.teardown(live);
        debug!(
            event = "daemon.worker.removed",
            session_id = session_id,
            worker_id = worker_id,
        );
        Ok(())
    }

    /// Kill and unregister every live worker of a session.
    pub fn remove_session_workers(&self, session_id: &str) {
        let removed: Vec<LiveWorker> = {
            let mut map = lock_unpoisoned(&self.inner.live);
            let keys: Vec<WorkerKey> = map
                .keys()
                .filter(|(sid, _)| sid == session_id)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| map.remove(&k)).collect()
        };
        for live in removed {
            self.teardown(live);
        }
    }

    fn teardown(&self, live: LiveWorker) {
        live.shared.retired.store(true, Ordering::Release);
        if let Some(detector) = &live.detector {
            detector.cancel();
        }
        if let Some(pty) = &live.pty {
            if let Some(pid) = pty.pid() {
                self.kill_with_grace(pid);
            }
        }
        // Dropping the handle closes the master; the reader sees EOF and the
        // pump winds down.
    }

    fn kill_with_grace(&self, pid: u32) {
        let grace = Duration::from_millis(self.inner.config.kill_grace_ms);
        tokio::spawn(pty::terminate_pid(pid, grace));
    }

    /// Subscribe to a worker's live stream. Returns the listener id, the
    /// log offset at attach time, and the event receiver. History up to the
    /// offset plus the stream from it is the complete byte sequence.
    pub fn attach_listener(
        &self,
        session_id: &str,
        worker_id: &str,
    ) -> Result<
        (
            ListenerId,
            u64,
            mpsc::UnboundedReceiver<WorkerStreamEvent>,
        ),
        DaemonError,
    > {
        let shared = {
            let map = lock_unpoisoned(&self.inner.live);
            map.get(&(session_id.to_string(), worker_id.to_string()))
                .map(|live| live.shared.clone())
                .ok_or_else(|| DaemonError::not_found("worker", worker_id))?
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = lock_unpoisoned(&shared.listeners);
        // Snapshot under the delivery lock: every byte is either ≤ offset
        // (history) or delivered to the new listener, never both.
        let offset = self.inner.output.current_offset(session_id, worker_id);
        let id = shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        listeners.insert(id, tx);
        Ok((id, offset, rx))
    }

    pub fn detach_listener(&self, session_id: &str, worker_id: &str, listener_id: ListenerId) {
        let map = lock_unpoisoned(&self.inner.live);
        if let Some(live) = map.get(&(session_id.to_string(), worker_id.to_string())) {
            let mut listeners = lock_unpoisoned(&live.shared.listeners);
            listeners.remove(&listener_id);
        }
    }

    // --- Queries ---

    pub fn is_live(&self, session_id: &str, worker_id: &str) -> bool {
        let map = lock_unpoisoned(&self.inner.live);
        map.get(&(session_id.to_string(), worker_id.to_string()))
            .map(|live| live.pty.is_some() || live.record.kind == WorkerKind::GitDiff)
            .unwrap_or(false)
    }

    pub fn get_live(&self, session_id: &str, worker_id: &str) -> Option<Worker> {
        let map = lock_unpoisoned(&self.inner.live);
        map.get(&(session_id.to_string(), worker_id.to_string()))
            .map(|live| live.record.clone())
    }

    pub fn activity_state(&self, session_id: &str, worker_id: &str) -> Option<ActivityState> {
        let map = lock_unpoisoned(&self.inner.live);
        map.get(&(session_id.to_string(), worker_id.to_string()))
            .and_then(|live| live.detector.as_ref().map(|d| d.state()))
    }

    pub fn current_output_offset(&self, session_id: &str, worker_id: &str) -> u64 {
        self.inner.output.current_offset(session_id, worker_id)
    }

    pub fn read_history(
        &self,
        session_id: &str,
        worker_id: &str,
        from_offset: Option<u64>,
    ) -> (Vec<u8>, u64) {
        self.inner.output.read(session_id, worker_id, from_offset)
    }

    /// Read log bytes in `[from_offset, end_offset)`. Replay uses this with
    /// the attach-time (or stream-cursor) offset as the bound: bytes past
    /// it are already queued for the live stream, and including them in a
    /// history payload would deliver them twice.
    pub fn read_history_until(
        &self,
        session_id: &str,
        worker_id: &str,
        from_offset: Option<u64>,
        end_offset: u64,
    ) -> Vec<u8> {
        let from = from_offset.unwrap_or(0).min(end_offset);
        let (mut data, _) = self
            .inner
            .output
            .read(session_id, worker_id, Some(from));
        data.truncate((end_offset - from) as usize);
        data
    }

    pub fn read_tail(&self, session_id: &str, worker_id: &str, n_lines: usize) -> Vec<u8> {
        self.inner.output.read_last_n_lines(session_id, worker_id, n_lines)
    }

    fn live_pty(&self, session_id: &str, worker_id: &str) -> Result<Arc<PtyHandle>, DaemonError> {
        let map = lock_unpoisoned(&self.inner.live);
        let live = map
            .get(&(session_id.to_string(), worker_id.to_string()))
            .ok_or_else(|| DaemonError::not_found("worker", worker_id))?;
        live.pty
            .clone()
            .ok_or_else(|| DaemonError::WorkerNotLive(worker_id.to_string()))
    }
}

fn fan_out(
    mut listeners: std::sync::MutexGuard<'_, HashMap<ListenerId, mpsc::UnboundedSender<WorkerStreamEvent>>>,
    event: WorkerStreamEvent,
) {
    listeners.retain(|_, tx| tx.send(event.clone()).is_ok());
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
