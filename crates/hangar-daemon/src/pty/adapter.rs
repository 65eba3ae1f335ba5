//! PTY adapter: spawns a child process in a pseudo-terminal with a curated
//! environment and pumps its output into a per-worker channel.
//!
//! Environment assembly happens here and nowhere else. Blocked variables are
//! unset in a shell prefix (the spawn primitive merges the parent env, so a
//! builder-level unset is not enough), repository overrides are filtered
//! against the protected list, and the terminal identity variables are
//! forced last.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hangar_core::env_policy;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, error, info, warn};

use crate::errors::DaemonError;

/// Events pumped out of a PTY: raw output bytes, then exactly one exit.
#[derive(Debug, Clone, PartialEq)]
pub enum PtyEvent {
    Data(Vec<u8>),
    Exit { exit_code: Option<i32> },
}

/// What to spawn and where.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Full shell command line; run through `/bin/sh -c`.
    pub command: String,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    /// Repository-level env overrides (already dotenv-parsed). Protected
    /// names are dropped here.
    pub repo_env: Vec<(String, String)>,
}

/// Handle to a live PTY child.
pub struct PtyHandle {
    /// Master end. Used for resize.
    master: Mutex<Box<dyn MasterPty + Send>>,
    /// Child handle shared with the exit-watcher thread.
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    /// Writer to PTY stdin. Wrapped because take_writer() can only be
    /// called once but writes come from multiple contexts.
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    pid: Option<u32>,
}

impl PtyHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write bytes to PTY stdin.
    pub fn write(&self, data: &[u8]) -> Result<(), DaemonError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| DaemonError::Pty(format!("lock writer: {}", e)))?;
        writer
            .write_all(data)
            .map_err(|e| DaemonError::Pty(format!("write stdin: {}", e)))?;
        writer
            .flush()
            .map_err(|e| DaemonError::Pty(format!("flush stdin: {}", e)))?;
        Ok(())
    }

    /// Resize the PTY.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), DaemonError> {
        self.master
            .lock()
            .map_err(|e| DaemonError::Pty(format!("lock master: {}", e)))?
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DaemonError::Pty(format!("resize: {}", e)))?;
        debug!(event = "daemon.pty.resize_completed", cols = cols, rows = rows);
        Ok(())
    }

    /// Kill the child immediately (SIGKILL). For graceful shutdown use
    /// `terminate_pid` first.
    pub fn kill(&self) {
        if let Ok(mut child) = self.child.lock() {
            if let Err(e) = child.kill() {
                warn!(event = "daemon.pty.kill_failed", error = %e);
            }
        }
    }
}

/// Spawn a child in a PTY and a blocking reader that forwards output and a
/// single exit event to `events_tx`.
pub fn spawn_pty(
    spec: &SpawnSpec,
    events_tx: tokio::sync::mpsc::UnboundedSender<PtyEvent>,
) -> Result<PtyHandle, DaemonError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| DaemonError::Pty(format!("openpty: {}", e)))?;

    // Blocked server-internal variables are stripped in a shell prefix.
    let command_line = format!("{}{}", env_policy::unset_prefix(), spec.command);
    let mut cmd = CommandBuilder::new("/bin/sh");
    cmd.args(["-c", &command_line]);
    cmd.cwd(&spec.cwd);

    for (key, value) in env_policy::filter_repo_env(spec.repo_env.clone()) {
        cmd.env(key, value);
    }
    // Forced last so repository configs cannot shadow them.
    for (key, value) in env_policy::FORCED_ENV_VARS {
        cmd.env(key, value);
    }

    info!(
        event = "daemon.pty.spawn_started",
        command = %spec.command,
        cwd = %spec.cwd.display(),
        cols = spec.cols,
        rows = spec.rows,
    );

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| DaemonError::Pty(format!("spawn: {}", e)))?;
    let pid = child.process_id();

    let writer = pair
        .master
        .take_writer()
        .map_err(|e| DaemonError::Pty(format!("take writer: {}", e)))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| DaemonError::Pty(format!("clone reader: {}", e)))?;

    let child = Arc::new(Mutex::new(child));
    spawn_pty_reader(reader, child.clone(), events_tx);

    info!(event = "daemon.pty.spawn_completed", pid = ?pid);

    Ok(PtyHandle {
        master: Mutex::new(pair.master),
        child,
        writer: Arc::new(Mutex::new(writer)),
        pid,
    })
}

/// Blocking reader loop. Exits on EOF (child ended) or read error, then
/// reaps the child and emits the exit event exactly once.
fn spawn_pty_reader(
    mut reader: Box<dyn Read + Send>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    events_tx: tokio::sync::mpsc::UnboundedSender<PtyEvent>,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(event = "daemon.pty.reader_eof");
                    break;
                }
                Ok(n) => {
                    // No receivers means the worker is being torn down.
                    if events_tx.send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!(event = "daemon.pty.reader_error", error = %e);
                    break;
                }
            }
        }

        let exit_code = match child.lock() {
            Ok(mut child) => match child.wait() {
                Ok(status) => Some(status.exit_code() as i32),
                Err(e) => {
                    warn!(event = "daemon.pty.wait_failed", error = %e);
                    None
                }
            },
            Err(_) => None,
        };
        let _ = events_tx.send(PtyEvent::Exit { exit_code });
    });
}

/// SIGTERM the process group, escalating to SIGKILL after `grace`.
///
/// The child is a shell, so signalling the negative pid reaches the whole
/// group.
pub async fn terminate_pid(pid: u32, grace: Duration) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let target = Pid::from_raw(-(pid as i32));
    if kill(target, Signal::SIGTERM).is_err() {
        // Group signalling can fail for a reaped child; try the pid itself.
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    tokio::time::sleep(grace).await;

    // SIGKILL is a no-op for an already-gone process.
    if kill(target, Signal::SIGKILL).is_err() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &str) -> SpawnSpec {
        SpawnSpec {
            command: command.to_string(),
            cwd: std::env::temp_dir(),
            cols: 80,
            rows: 24,
            repo_env: Vec::new(),
        }
    }

    async fn collect_until_exit(
        mut rx: tokio::sync::mpsc::UnboundedReceiver<PtyEvent>,
    ) -> (Vec<u8>, Option<i32>) {
        let mut output = Vec::new();
        let mut exit_code = None;
        while let Some(event) = rx.recv().await {
            match event {
                PtyEvent::Data(data) => output.extend_from_slice(&data),
                PtyEvent::Exit { exit_code: code } => {
                    exit_code = code;
                    break;
                }
            }
        }
        (output, exit_code)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_spawn_echo_and_exit() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_pty(&spec("printf 'hello-pty'"), tx).unwrap();
        assert!(handle.pid().is_some());

        let (output, exit_code) =
            tokio::time::timeout(Duration::from_secs(10), collect_until_exit(rx))
                .await
                .expect("pty did not exit");
        assert!(String::from_utf8_lossy(&output).contains("hello-pty"));
        assert_eq!(exit_code, Some(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exit_code_propagates() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = spawn_pty(&spec("exit 3"), tx).unwrap();
        let (_, exit_code) =
            tokio::time::timeout(Duration::from_secs(10), collect_until_exit(rx))
                .await
                .expect("pty did not exit");
        assert_eq!(exit_code, Some(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_forced_env_and_blocked_unset() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut spec = spec("printf '%s|%s' \"$TERM\" \"${HANGAR_WEBHOOK_SECRET:-unset}\"");
        spec.repo_env = vec![("TERM".to_string(), "dumb".to_string())];
        let _handle = spawn_pty(&spec, tx).unwrap();

        let (output, _) = tokio::time::timeout(Duration::from_secs(10), collect_until_exit(rx))
            .await
            .expect("pty did not exit");
        let text = String::from_utf8_lossy(&output);
        // The protected TERM override was dropped and the forced value won;
        // the blocked variable is unset even if the server had it.
        assert!(text.contains("xterm-256color|unset"), "got: {}", text);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_reaches_child() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_pty(&spec("read line; printf 'got:%s' \"$line\""), tx).unwrap();
        handle.write(b"ping\n").unwrap();

        let (output, _) = tokio::time::timeout(Duration::from_secs(10), collect_until_exit(rx))
            .await
            .expect("pty did not exit");
        assert!(String::from_utf8_lossy(&output).contains("got:ping"));
    }
}
