//! Per-worker append-only output log with an in-memory write buffer.
//!
//! Offsets are measured in bytes over (flushed file + pending buffer); they
//! are the cursor clients use for incremental sync. The front-truncation
//! policy is the only path that moves the starting byte of the log, and it
//! always lands on a UTF-8 leading byte so readers never see a partial
//! sequence at position zero.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::read::GzDecoder;
use hangar_paths::HangarPaths;
use tracing::{debug, warn};

use crate::errors::DaemonError;

/// Truncation keeps this fraction of `file_max_size`.
const TRUNCATE_KEEP_RATIO: f64 = 0.8;

struct WorkerBuffer {
    buffer: Vec<u8>,
    flush_timer: Option<tokio::task::JoinHandle<()>>,
}

type WorkerKey = (String, String);

/// Process-wide output log registry. Cheap to clone.
#[derive(Clone)]
pub struct OutputLog {
    inner: Arc<OutputLogInner>,
}

struct OutputLogInner {
    paths: HangarPaths,
    flush_threshold: usize,
    flush_interval: Duration,
    file_max_size: u64,
    /// One buffer per live worker; the per-worker mutex is what guards
    /// buffer ↔ flush.
    workers: Mutex<HashMap<WorkerKey, Arc<Mutex<WorkerBuffer>>>>,
}

impl OutputLog {
    pub fn new(
        paths: HangarPaths,
        flush_threshold: usize,
        flush_interval: Duration,
        file_max_size: u64,
    ) -> Self {
        Self {
            inner: Arc::new(OutputLogInner {
                paths,
                flush_threshold,
                flush_interval,
                file_max_size,
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn entry(&self, session_id: &str, worker_id: &str) -> Arc<Mutex<WorkerBuffer>> {
        let key = (session_id.to_string(), worker_id.to_string());
        let mut workers = lock_unpoisoned(&self.inner.workers);
        workers
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(WorkerBuffer {
                    buffer: Vec::new(),
                    flush_timer: None,
                }))
            })
            .clone()
    }

    /// Append bytes to the worker's buffer. Flushes immediately past the
    /// threshold, otherwise arms the flush timer if not already armed.
    pub fn append(&self, session_id: &str, worker_id: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let entry = self.entry(session_id, worker_id);
        let mut state = lock_unpoisoned(&entry);
        state.buffer.extend_from_slice(data);

        if state.buffer.len() >= self.inner.flush_threshold {
            let pending = std::mem::take(&mut state.buffer);
            if let Some(timer) = state.flush_timer.take() {
                timer.abort();
            }
            // Written under the per-worker lock: a reader must never see the
            // buffer emptied before the bytes are in the file, or offsets
            // would regress.
            self.write_out(session_id, worker_id, &pending);
        } else if state.flush_timer.is_none() {
            let log = self.clone();
            let sid = session_id.to_string();
            let wid = worker_id.to_string();
            let interval = self.inner.flush_interval;
            state.flush_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                log.flush(&sid, &wid);
            }));
        }
    }

    /// Take the buffer, append it to the file, disarm the timer. The write
    /// happens under the per-worker lock so buffer and file always account
    /// for every byte exactly once.
    pub fn flush(&self, session_id: &str, worker_id: &str) {
        let entry = self.entry(session_id, worker_id);
        let mut state = lock_unpoisoned(&entry);
        if let Some(timer) = state.flush_timer.take() {
            timer.abort();
        }
        let pending = std::mem::take(&mut state.buffer);
        if !pending.is_empty() {
            self.write_out(session_id, worker_id, &pending);
        }
    }

    /// Read bytes from `from_offset` (flushed file then pending buffer).
    /// Returns the data and the new offset. Offsets at or past the end
    /// return empty data with the current offset.
    pub fn read(
        &self,
        session_id: &str,
        worker_id: &str,
        from_offset: Option<u64>,
    ) -> (Vec<u8>, u64) {
        let entry = self.entry(session_id, worker_id);
        let state = lock_unpoisoned(&entry);
        let file_bytes = self.read_file(session_id, worker_id);
        let total = file_bytes.len() as u64 + state.buffer.len() as u64;
        let from = from_offset.unwrap_or(0);
        if from >= total {
            return (Vec::new(), total);
        }

        let mut combined = file_bytes;
        combined.extend_from_slice(&state.buffer);
        (combined.split_off(from as usize), total)
    }

    /// Read the full log trimmed to the last `n` line-separated segments
    /// (both `\n` and `\r\n` terminators count).
    pub fn read_last_n_lines(&self, session_id: &str, worker_id: &str, n: usize) -> Vec<u8> {
        let (data, _) = self.read(session_id, worker_id, None);
        tail_lines(&data, n)
    }

    /// Flush synchronously, then report the log size. The flush is what
    /// keeps a reader taking this offset consistent with a concurrent
    /// writer.
    pub fn current_offset(&self, session_id: &str, worker_id: &str) -> u64 {
        self.flush(session_id, worker_id);
        let entry = self.entry(session_id, worker_id);
        let state = lock_unpoisoned(&entry);
        self.file_len(session_id, worker_id) + state.buffer.len() as u64
    }

    /// Clear buffer, cancel the timer, and recreate an empty file.
    pub fn reset(&self, session_id: &str, worker_id: &str) {
        let entry = self.entry(session_id, worker_id);
        let mut state = lock_unpoisoned(&entry);
        state.buffer.clear();
        if let Some(timer) = state.flush_timer.take() {
            timer.abort();
        }
        let path = self.inner.paths.worker_log(session_id, worker_id);
        let gz_path = self.inner.paths.worker_log_gz(session_id, worker_id);
        let _ = std::fs::remove_file(&gz_path);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, b"") {
            warn!(
                event = "output.reset_failed",
                session_id = session_id,
                worker_id = worker_id,
                error = %e,
            );
        }
    }

    /// Remove a worker's log files. Tolerates missing files.
    pub fn delete_worker(&self, session_id: &str, worker_id: &str) {
        let key = (session_id.to_string(), worker_id.to_string());
        let entry = {
            let mut workers = lock_unpoisoned(&self.inner.workers);
            workers.remove(&key)
        };
        if let Some(entry) = entry {
            let mut state = lock_unpoisoned(&entry);
            if let Some(timer) = state.flush_timer.take() {
                timer.abort();
            }
        }
        let _ = std::fs::remove_file(self.inner.paths.worker_log(session_id, worker_id));
        let _ = std::fs::remove_file(self.inner.paths.worker_log_gz(session_id, worker_id));
    }

    /// Remove a session's whole output directory. Tolerates missing.
    pub fn delete_session(&self, session_id: &str) {
        {
            let mut workers = lock_unpoisoned(&self.inner.workers);
            workers.retain(|(sid, _), entry| {
                if sid == session_id {
                    let mut state = lock_unpoisoned(entry);
                    if let Some(timer) = state.flush_timer.take() {
                        timer.abort();
                    }
                    false
                } else {
                    true
                }
            });
        }
        let _ = std::fs::remove_dir_all(self.inner.paths.session_outputs_dir(session_id));
    }

    // --- File plumbing ---

    /// Append to the log file, migrating a legacy `.log.gz` on first write
    /// and applying the size cap afterwards. I/O errors are logged and
    /// swallowed; losing output beats crashing a worker.
    fn write_out(&self, session_id: &str, worker_id: &str, data: &[u8]) {
        let path = self.inner.paths.worker_log(session_id, worker_id);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(event = "output.mkdir_failed", error = %e);
                return;
            }
        }

        self.migrate_legacy(session_id, worker_id);

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(data));
        if let Err(e) = result {
            warn!(
                event = "output.append_failed",
                session_id = session_id,
                worker_id = worker_id,
                error = %e,
            );
            return;
        }

        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if size > self.inner.file_max_size {
            self.truncate_front(session_id, worker_id, size);
        }
    }

    /// Rewrite the file keeping the last 80% of the cap, advancing the
    /// slice point to a UTF-8 leading byte.
    fn truncate_front(&self, session_id: &str, worker_id: &str, size: u64) {
        let path = self.inner.paths.worker_log(session_id, worker_id);
        let keep = (self.inner.file_max_size as f64 * TRUNCATE_KEEP_RATIO) as usize;
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(event = "output.truncate_read_failed", error = %e);
                return;
            }
        };
        let mut start = contents.len().saturating_sub(keep);
        while start < contents.len() && (contents[start] & 0xC0) == 0x80 {
            start += 1;
        }
        if let Err(e) = std::fs::write(&path, &contents[start..]) {
            warn!(event = "output.truncate_write_failed", error = %e);
            return;
        }
        debug!(
            event = "output.truncated",
            session_id = session_id,
            worker_id = worker_id,
            from = size,
            to = contents.len() - start,
        );
    }

    /// Decompress a legacy `.log.gz` into the uncompressed file once.
    fn migrate_legacy(&self, session_id: &str, worker_id: &str) {
        let gz_path = self.inner.paths.worker_log_gz(session_id, worker_id);
        if !gz_path.exists() {
            return;
        }
        let path = self.inner.paths.worker_log(session_id, worker_id);
        match std::fs::File::open(&gz_path) {
            Ok(file) => {
                let mut decoder = GzDecoder::new(file);
                let mut contents = Vec::new();
                if let Err(e) = decoder.read_to_end(&mut contents) {
                    warn!(event = "output.gz_migrate_read_failed", error = %e);
                    return;
                }
                if let Err(e) = std::fs::write(&path, &contents) {
                    warn!(event = "output.gz_migrate_write_failed", error = %e);
                    return;
                }
                let _ = std::fs::remove_file(&gz_path);
                debug!(
                    event = "output.gz_migrated",
                    session_id = session_id,
                    worker_id = worker_id,
                );
            }
            Err(e) => warn!(event = "output.gz_migrate_open_failed", error = %e),
        }
    }

    fn read_file(&self, session_id: &str, worker_id: &str) -> Vec<u8> {
        let path = self.inner.paths.worker_log(session_id, worker_id);
        if let Ok(contents) = std::fs::read(&path) {
            return contents;
        }
        // Legacy compressed logs are readable transparently.
        let gz_path = self.inner.paths.worker_log_gz(session_id, worker_id);
        if let Ok(file) = std::fs::File::open(&gz_path) {
            let mut decoder = GzDecoder::new(file);
            let mut contents = Vec::new();
            if decoder.read_to_end(&mut contents).is_ok() {
                return contents;
            }
        }
        Vec::new()
    }

    fn file_len(&self, session_id: &str, worker_id: &str) -> u64 {
        let path = self.inner.paths.worker_log(session_id, worker_id);
        if let Ok(meta) = std::fs::metadata(&path) {
            return meta.len();
        }
        // Legacy gz length is its decompressed length.
        let gz_path = self.inner.paths.worker_log_gz(session_id, worker_id);
        if gz_path.exists() {
            return self.read_file(session_id, worker_id).len() as u64;
        }
        0
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Trim `data` to its last `n` line-separated segments.
fn tail_lines(data: &[u8], n: usize) -> Vec<u8> {
    if n == 0 || data.is_empty() {
        return Vec::new();
    }
    // A trailing newline closes the final segment rather than opening an
    // empty one.
    let effective_end = if data.ends_with(b"\n") {
        data.len() - 1
    } else {
        data.len()
    };
    let mut seen = 0;
    let mut start = 0;
    for i in (0..effective_end).rev() {
        if data[i] == b'\n' {
            seen += 1;
            if seen == n {
                start = i + 1;
                break;
            }
        }
    }
    data[start..].to_vec()
}
