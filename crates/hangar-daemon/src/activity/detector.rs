//! Pattern-driven activity state machine over a worker's PTY output.
//!
//! The detector keeps a fixed tail window of recent output. On every chunk:
//! an asking-pattern match on the tail means `waiting`, otherwise fresh
//! bytes mean `active`. Silence is handled by a timer: after the idle
//! timeout it re-checks the tail — a still-matching asking pattern keeps
//! the worker `waiting`, otherwise `active`/`unknown` demote to `idle`.
//! Only state changes are emitted.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hangar_core::ActivityState;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::debug;

/// Tail window size in bytes.
const TAIL_CAPACITY: usize = 2048;

/// Emitted on every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityTransition {
    pub session_id: String,
    pub worker_id: String,
    pub state: ActivityState,
    pub timestamp: String,
}

struct DetectorInner {
    session_id: String,
    worker_id: String,
    patterns: Vec<Regex>,
    tail: Vec<u8>,
    state: ActivityState,
    last_byte_at: Option<Instant>,
    idle_timer: Option<tokio::task::JoinHandle<()>>,
    transitions_tx: mpsc::UnboundedSender<ActivityTransition>,
}

impl DetectorInner {
    fn transition(&mut self, next: ActivityState) {
        if self.state == next {
            return;
        }
        debug!(
            event = "daemon.activity.transition",
            session_id = %self.session_id,
            worker_id = %self.worker_id,
            from = %self.state,
            to = %next,
        );
        self.state = next;
        let _ = self.transitions_tx.send(ActivityTransition {
            session_id: self.session_id.clone(),
            worker_id: self.worker_id.clone(),
            state: next,
            timestamp: hangar_core::now_rfc3339(),
        });
    }

    fn tail_matches_asking(&self) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let tail = String::from_utf8_lossy(&self.tail);
        self.patterns.iter().any(|p| p.is_match(&tail))
    }

    fn push_tail(&mut self, data: &[u8]) {
        self.tail.extend_from_slice(data);
        if self.tail.len() > TAIL_CAPACITY {
            let excess = self.tail.len() - TAIL_CAPACITY;
            self.tail.drain(..excess);
        }
    }
}

/// Per-agent-worker detector handle. Cheap to clone; `cancel` releases the
/// tail and the idle timer.
#[derive(Clone)]
pub struct ActivityDetector {
    inner: Arc<Mutex<DetectorInner>>,
    idle_timeout: Duration,
}

impl ActivityDetector {
    pub fn new(
        session_id: &str,
        worker_id: &str,
        patterns: Vec<Regex>,
        idle_timeout: Duration,
        transitions_tx: mpsc::UnboundedSender<ActivityTransition>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DetectorInner {
                session_id: session_id.to_string(),
                worker_id: worker_id.to_string(),
                patterns,
                tail: Vec::new(),
                state: ActivityState::Unknown,
                last_byte_at: None,
                idle_timer: None,
                transitions_tx,
            })),
            idle_timeout,
        }
    }

    pub fn state(&self) -> ActivityState {
        lock_unpoisoned(&self.inner).state
    }

    /// Feed an output chunk: update the tail, evaluate, re-arm the idle
    /// timer.
    pub fn feed(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.push_tail(data);
            inner.last_byte_at = Some(Instant::now());
            if inner.tail_matches_asking() {
                inner.transition(ActivityState::Waiting);
            } else {
                inner.transition(ActivityState::Active);
            }
            if let Some(timer) = inner.idle_timer.take() {
                timer.abort();
            }
        }
        self.arm_idle_timer();
    }

    fn arm_idle_timer(&self) {
        let detector = self.clone();
        let timeout = self.idle_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut inner = lock_unpoisoned(&detector.inner);
            inner.idle_timer = None;
            let silent_long_enough = inner
                .last_byte_at
                .map(|at| at.elapsed() >= timeout)
                .unwrap_or(true);
            if !silent_long_enough {
                return;
            }
            // An unanswered question stays waiting under silence.
            if inner.tail_matches_asking() {
                inner.transition(ActivityState::Waiting);
            } else {
                inner.transition(ActivityState::Idle);
            }
        });
        let mut inner = lock_unpoisoned(&self.inner);
        if let Some(previous) = inner.idle_timer.replace(timer) {
            previous.abort();
        }
    }

    /// Release the tail and cancel the idle timer. Called when the worker
    /// is deleted or the session stops.
    pub fn cancel(&self) {
        let mut inner = lock_unpoisoned(&self.inner);
        if let Some(timer) = inner.idle_timer.take() {
            timer.abort();
        }
        inner.tail.clear();
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
