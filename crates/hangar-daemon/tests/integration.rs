//! Integration tests wiring the real store, queue, output log, registry and
//! session manager together (no HTTP in between).

use std::sync::Arc;
use std::time::{Duration, Instant};

use hangar_core::types::job::JobStatus;
use hangar_core::types::worker::WorkerKind;
use hangar_core::SessionKind;
use hangar_daemon::config::DaemonConfig;
use hangar_daemon::events::types::Event;
use hangar_daemon::events::EventHub;
use hangar_daemon::output::OutputLog;
use hangar_daemon::sessions::{CreateSessionRequest, CreateWorkerRequest, SessionManager};
use hangar_daemon::workers::{WorkerRegistry, WorkerStreamEvent};
use hangar_paths::HangarPaths;
use hangar_queue::JobQueue;
use hangar_store::Store;
use serial_test::serial;

struct Harness {
    _dir: tempfile::TempDir,
    manager: SessionManager,
    registry: WorkerRegistry,
    hub: Arc<EventHub>,
    store: Store,
    queue: JobQueue,
    workspace: std::path::PathBuf,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DaemonConfig::default();
    config.home = dir.path().join("home");
    config.kill_grace_ms = 100;

    let paths = HangarPaths::from_dir(config.home.clone());
    let store = Store::open_in_memory().unwrap();
    let queue = JobQueue::new(store.clone(), 2);
    let hub = Arc::new(EventHub::new(64));
    let output = OutputLog::new(
        paths,
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
    let manager = SessionManager::new(
        store.clone(),
        registry.clone(),
        hub.clone(),
        queue.clone(),
    );

    let workspace = dir.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    Harness {
        _dir: dir,
        manager,
        registry,
        hub,
        store,
        queue,
        workspace,
    }
}

fn quick_session(h: &Harness) -> String {
    let view = h
        .manager
        .create_session(CreateSessionRequest {
            kind: SessionKind::Quick,
            location_path: Some(h.workspace.to_string_lossy().into_owned()),
            repository_id: None,
            worktree_id: None,
            title: None,
            initial_prompt: None,
        })
        .unwrap();
    view.session.id
}

/// Run a terminal worker whose "shell" is a short script, collecting its
/// stream until exit.
async fn collect_stream(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<WorkerStreamEvent>,
) -> (Vec<u8>, Option<i32>) {
    let mut bytes = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let Ok(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await else {
            break;
        };
        match event {
            Some(WorkerStreamEvent::Data(data)) => bytes.extend_from_slice(&data),
            Some(WorkerStreamEvent::Exit { exit_code }) => return (bytes, exit_code),
            None => break,
        }
    }
    (bytes, None)
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_terminal_worker_streams_and_logs() {
    let h = harness();
    let session_id = quick_session(&h);

    // SHELL is the spawned command for terminal workers; a script stands
    // in. The sleep keeps the PTY alive until the listener is attached.
    temp_shell(&h, "sleep 0.5; printf 'hello from pty'; exit 0");
    let worker = h
        .manager
        .create_worker(
            &session_id,
            CreateWorkerRequest {
                kind: WorkerKind::Terminal,
                name: None,
                agent_id: None,
                cols: None,
                rows: None,
            },
            false,
        )
        .unwrap();
    assert_eq!(worker.name, "terminal");
    assert!(worker.pid.is_some());

    let (_listener_id, offset_at_attach, rx) = h
        .registry
        .attach_listener(&session_id, &worker.id)
        .unwrap();
    let (streamed, exit_code) = collect_stream(rx).await;
    assert_eq!(exit_code, Some(0));

    // Log = history-before-attach + streamed bytes, with no gap and no
    // duplication.
    let (log_bytes, _) = h.registry.read_history(&session_id, &worker.id, None);
    let (history, _) = h
        .registry
        .read_history(&session_id, &worker.id, Some(0));
    assert_eq!(history.len() as u64, log_bytes.len() as u64);
    let mut reconstructed = log_bytes[..offset_at_attach as usize].to_vec();
    reconstructed.extend_from_slice(&streamed);
    assert_eq!(reconstructed, log_bytes);
    assert!(String::from_utf8_lossy(&log_bytes).contains("hello from pty"));

    // The row's pid is cleared after exit.
    wait_until(|| h.store.get_worker(&session_id, &worker.id).unwrap().pid.is_none()).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_offset_replay_sees_only_new_bytes() {
    let h = harness();
    let session_id = quick_session(&h);

    temp_shell(&h, "printf 'hello\\nworld\\n'; read _; printf '!'");
    let worker = h
        .manager
        .create_worker(
            &session_id,
            CreateWorkerRequest {
                kind: WorkerKind::Terminal,
                name: None,
                agent_id: None,
                cols: None,
                rows: None,
            },
            false,
        )
        .unwrap();

    wait_until(|| {
        let (data, _) = h.registry.read_history(&session_id, &worker.id, None);
        String::from_utf8_lossy(&data).contains("world")
    })
    .await;

    let k = h.registry.current_output_offset(&session_id, &worker.id);
    h.registry
        .write_input(&session_id, &worker.id, b"\n")
        .unwrap();

    wait_until(|| {
        let (data, _) = h.registry.read_history(&session_id, &worker.id, Some(k));
        String::from_utf8_lossy(&data).contains('!')
    })
    .await;

    let (tail, new_offset) = h.registry.read_history(&session_id, &worker.id, Some(k));
    let text = String::from_utf8_lossy(&tail);
    assert!(!text.contains("hello"), "replay from k leaked old bytes: {}", text);
    assert!(new_offset > k);

    let (full, _) = h.registry.read_history(&session_id, &worker.id, Some(0));
    let full_text = String::from_utf8_lossy(&full);
    assert!(full_text.contains("hello"));
    assert!(full_text.contains('!'));

    // The bounded read used for WS replay stops exactly at the given
    // offset: nothing past it leaks into a history payload.
    let bounded = h
        .registry
        .read_history_until(&session_id, &worker.id, None, k);
    assert_eq!(bounded, full[..k as usize]);
    assert!(
        h.registry
            .read_history_until(&session_id, &worker.id, Some(k), k)
            .is_empty()
    );
    assert!(
        h.registry
            .read_history_until(&session_id, &worker.id, Some(k + 100), k)
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_worker_exit_event_reaches_hub() {
    let h = harness();
    let (_sub, mut events_rx) = h.hub.subscribe();
    let session_id = quick_session(&h);

    temp_shell(&h, "exit 7");
    let worker = h
        .manager
        .create_worker(
            &session_id,
            CreateWorkerRequest {
                kind: WorkerKind::Terminal,
                name: None,
                agent_id: None,
                cols: None,
                rows: None,
            },
            false,
        )
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(Instant::now() < deadline, "no worker-exited event");
        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("hub went quiet")
            .expect("hub closed");
        if let Event::WorkerExited {
            worker_id,
            exit_code,
            ..
        } = event
        {
            assert_eq!(worker_id, worker.id);
            assert_eq!(exit_code, Some(7));
            break;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_delete_session_enqueues_cleanup() {
    let h = harness();
    let session_id = quick_session(&h);

    temp_shell(&h, "sleep 30");
    h.manager
        .create_worker(
            &session_id,
            CreateWorkerRequest {
                kind: WorkerKind::Terminal,
                name: None,
                agent_id: None,
                cols: None,
                rows: None,
            },
            false,
        )
        .unwrap();

    h.manager.delete_session(&session_id).unwrap();
    assert!(h.store.get_session(&session_id).is_err());
    assert!(h.store.list_workers(&session_id).unwrap().is_empty());

    let jobs = h
        .queue
        .get_jobs(&hangar_store::jobs::JobFilter {
            job_type: Some("session-outputs-cleanup".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Pending);
    assert!(jobs[0].payload.contains(&session_id));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_pause_rejects_quick_sessions() {
    let h = harness();
    let session_id = quick_session(&h);
    let err = h.manager.pause_session(&session_id).unwrap_err();
    assert_eq!(err.kind(), hangar_core::ErrorKind::Validation);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_write_to_dead_worker_is_rejected() {
    let h = harness();
    let session_id = quick_session(&h);

    temp_shell(&h, "exit 0");
    let worker = h
        .manager
        .create_worker(
            &session_id,
            CreateWorkerRequest {
                kind: WorkerKind::Terminal,
                name: None,
                agent_id: None,
                cols: None,
                rows: None,
            },
            false,
        )
        .unwrap();

    wait_until(|| !h.registry.is_live(&session_id, &worker.id)).await;
    let err = h
        .registry
        .write_input(&session_id, &worker.id, b"too late\n")
        .unwrap_err();
    assert_eq!(err.error_code(), "worker_not_live");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_worker_names_deduplicate() {
    let h = harness();
    let session_id = quick_session(&h);
    temp_shell(&h, "sleep 30");

    let request = CreateWorkerRequest {
        kind: WorkerKind::Terminal,
        name: None,
        agent_id: None,
        cols: None,
        rows: None,
    };
    let first = h.manager.create_worker(&session_id, request.clone(), false).unwrap();
    let second = h.manager.create_worker(&session_id, request, false).unwrap();
    assert_eq!(first.name, "terminal");
    assert_eq!(second.name, "terminal 2");

    h.manager.delete_session(&session_id).unwrap();
}

// --- helpers ---

/// Point $SHELL at a script so terminal workers run it. The manager reads
/// the variable at spawn time.
fn temp_shell(h: &Harness, script: &str) {
    let path = h.workspace.join("fake-shell.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
    // Terminal workers run $SHELL through `/bin/sh -c`; a plain script path
    // works without the executable bit.
    unsafe { std::env::set_var("SHELL", format!("sh {}", path.display())) };
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(condition(), "condition not reached within deadline");
}
