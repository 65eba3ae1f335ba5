//! End-to-end queue behavior: retry pacing, priority ordering, and claim
//! exclusivity against a real (in-memory) store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use hangar_core::types::job::JobStatus;
use hangar_queue::{EnqueueOptions, JobQueue};
use hangar_store::Store;
use tokio::sync::Mutex;

async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_with_backoff_then_success() {
    let store = Store::open_in_memory().unwrap();
    let queue = JobQueue::new(store.clone(), 4);

    let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let handler_calls = calls.clone();
    queue.register_handler("flaky", move |_payload| {
        let calls = handler_calls.clone();
        async move {
            let mut calls = calls.lock().await;
            calls.push(Instant::now());
            if calls.len() < 3 {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    });

    let id = queue
        .enqueue(
            "flaky",
            serde_json::json!({}),
            EnqueueOptions {
                max_attempts: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
    queue.start().unwrap();

    let check_store = store.clone();
    let check_id = id.clone();
    assert!(
        wait_for(
            || {
                check_store
                    .get_job(&check_id)
                    .map(|j| j.status == JobStatus::Completed)
                    .unwrap_or(false)
            },
            Duration::from_secs(10),
        )
        .await,
        "job never completed"
    );

    let calls = calls.lock().await;
    assert_eq!(calls.len(), 3);
    // Attempt gaps follow backoff(1)=1s and backoff(2)=2s, with 10% slack.
    let gap1 = calls[1].duration_since(calls[0]);
    let gap2 = calls[2].duration_since(calls[1]);
    assert!(gap1 >= Duration::from_millis(900), "gap1 was {:?}", gap1);
    assert!(gap2 >= Duration::from_millis(1800), "gap2 was {:?}", gap2);

    let job = store.get_job(&id).unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error.as_deref(), Some("boom"));

    queue.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stalls_after_max_attempts() {
    let store = Store::open_in_memory().unwrap();
    let queue = JobQueue::new(store.clone(), 4);
    queue.register_handler("doomed", |_payload| async { Err("always".to_string()) });

    let id = queue
        .enqueue(
            "doomed",
            serde_json::json!({}),
            EnqueueOptions {
                max_attempts: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
    queue.start().unwrap();

    let check_store = store.clone();
    let check_id = id.clone();
    assert!(
        wait_for(
            || {
                check_store
                    .get_job(&check_id)
                    .map(|j| j.status == JobStatus::Stalled)
                    .unwrap_or(false)
            },
            Duration::from_secs(10),
        )
        .await
    );

    let job = store.get_job(&id).unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error.as_deref(), Some("always"));

    // retry_job resets attempts and goes again.
    let retried = queue.retry_job(&id).unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 0);

    queue.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_priority_ordering_with_single_worker() {
    let store = Store::open_in_memory().unwrap();
    let queue = JobQueue::new(store.clone(), 1);

    let order = Arc::new(Mutex::new(Vec::<String>::new()));
    let handler_order = order.clone();
    queue.register_handler("ordered", move |payload| {
        let order = handler_order.clone();
        async move {
            let name = payload["name"].as_str().unwrap_or("?").to_string();
            order.lock().await.push(name);
            Ok(())
        }
    });

    for (name, priority) in [("a", 0), ("b", 10), ("c", 5)] {
        queue
            .enqueue(
                "ordered",
                serde_json::json!({"name": name}),
                EnqueueOptions {
                    priority,
                    ..Default::default()
                },
            )
            .unwrap();
    }
    queue.start().unwrap();

    let check_order = order.clone();
    assert!(
        wait_for(
            || check_order.try_lock().map(|o| o.len() == 3).unwrap_or(false),
            Duration::from_secs(5),
        )
        .await
    );
    assert_eq!(*order.lock().await, vec!["b", "c", "a"]);

    queue.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_claims_never_share_a_job() {
    let store = Store::open_in_memory().unwrap();
    for i in 0..3 {
        store
            .insert_job(&format!("j{}", i), "noop", "{}", 0, 5, 0)
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..3 {
        let store = store.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            store.claim_job(1_000).unwrap().map(|j| j.id)
        }));
    }
    let mut claimed: Vec<String> = Vec::new();
    for handle in handles {
        if let Some(id) = handle.await.unwrap() {
            claimed.push(id);
        }
    }
    claimed.sort();
    assert_eq!(claimed, vec!["j0", "j1", "j2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_crash_recovery_reclaims_processing_jobs() {
    let store = Store::open_in_memory().unwrap();
    store.insert_job("j1", "noop", "{}", 0, 5, 0).unwrap();
    // Simulate a crash mid-processing.
    store.claim_job(1).unwrap().unwrap();

    let queue = JobQueue::new(store.clone(), 1);
    let ran = Arc::new(AtomicUsize::new(0));
    let handler_ran = ran.clone();
    queue.register_handler("noop", move |_payload| {
        let ran = handler_ran.clone();
        async move {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    queue.start().unwrap();

    let check = ran.clone();
    assert!(wait_for(|| check.load(Ordering::SeqCst) == 1, Duration::from_secs(5)).await);
    assert_eq!(store.get_job("j1").unwrap().status, JobStatus::Completed);

    queue.stop();
}
