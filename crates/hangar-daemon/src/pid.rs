//! Daemon pid file: refuse double starts, clean up on shutdown.

use std::path::Path;

use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Returns the pid of a live daemon recorded in the pid file, if any.
/// A stale file (dead process, garbage content) is removed.
pub fn check_daemon_running(pid_path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(pid_path).ok()?;
    let pid: u32 = match contents.trim().parse() {
        Ok(pid) => pid,
        Err(_) => {
            warn!(event = "daemon.pid.stale_content", path = %pid_path.display());
            let _ = std::fs::remove_file(pid_path);
            return None;
        }
    };

    let system = System::new_all();
    if system.processes().contains_key(&Pid::from_u32(pid)) {
        Some(pid)
    } else {
        debug!(event = "daemon.pid.stale_removed", pid = pid);
        let _ = std::fs::remove_file(pid_path);
        None
    }
}

pub fn write_pid_file(pid_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(pid_path, std::process::id().to_string())
}

pub fn remove_pid_file(pid_path: &Path) {
    if let Err(e) = std::fs::remove_file(pid_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(event = "daemon.pid.cleanup_failed", error = %e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_detect_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("hangard.pid");
        write_pid_file(&pid_path).unwrap();
        assert_eq!(check_daemon_running(&pid_path), Some(std::process::id()));
        remove_pid_file(&pid_path);
        assert!(check_daemon_running(&pid_path).is_none());
    }

    #[test]
    fn test_garbage_pid_file_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("hangard.pid");
        std::fs::write(&pid_path, "not a pid").unwrap();
        assert!(check_daemon_running(&pid_path).is_none());
        assert!(!pid_path.exists());
    }
}
