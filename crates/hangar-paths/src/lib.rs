use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("home directory not found — set $HOME environment variable")]
    HomeNotFound,
}

/// Centralized path construction for the `~/.hangar/` directory layout.
///
/// Single source of truth for every path under the config root. Use
/// `resolve()` in production code and `from_dir()` in tests.
#[derive(Debug, Clone)]
pub struct HangarPaths {
    hangar_dir: PathBuf,
}

impl HangarPaths {
    /// Resolve paths from `$HANGAR_HOME` if set, otherwise `~/.hangar`.
    pub fn resolve() -> Result<Self, PathError> {
        if let Ok(dir) = std::env::var("HANGAR_HOME") {
            return Ok(Self {
                hangar_dir: PathBuf::from(dir),
            });
        }
        let home = dirs::home_dir().ok_or(PathError::HomeNotFound)?;
        Ok(Self {
            hangar_dir: home.join(".hangar"),
        })
    }

    /// Create paths from an explicit base directory. Use in tests.
    pub fn from_dir(hangar_dir: PathBuf) -> Self {
        Self { hangar_dir }
    }

    /// The config root directory.
    pub fn hangar_dir(&self) -> &Path {
        &self.hangar_dir
    }

    // --- Top-level files ---

    pub fn store_db(&self) -> PathBuf {
        self.hangar_dir.join("store.db")
    }

    pub fn daemon_pid_file(&self) -> PathBuf {
        self.hangar_dir.join("hangard.pid")
    }

    pub fn user_config(&self) -> PathBuf {
        self.hangar_dir.join("config.toml")
    }

    // --- Top-level subdirectories ---

    pub fn outputs_dir(&self) -> PathBuf {
        self.hangar_dir.join("outputs")
    }

    pub fn repositories_dir(&self) -> PathBuf {
        self.hangar_dir.join("repositories")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.hangar_dir.join("uploads")
    }

    /// Global worktree template files, applied when a repository has no
    /// `.hangar/` template directory of its own.
    pub fn global_templates_dir(&self) -> PathBuf {
        self.hangar_dir.join("templates")
    }

    // --- Output log paths ---

    pub fn session_outputs_dir(&self, session_id: &str) -> PathBuf {
        self.outputs_dir().join(session_id)
    }

    pub fn worker_log(&self, session_id: &str, worker_id: &str) -> PathBuf {
        self.session_outputs_dir(session_id)
            .join(format!("{}.log", worker_id))
    }

    /// Legacy compressed log location, readable but never written.
    pub fn worker_log_gz(&self, session_id: &str, worker_id: &str) -> PathBuf {
        self.session_outputs_dir(session_id)
            .join(format!("{}.log.gz", worker_id))
    }

    // --- Managed repository paths ---

    /// Per-repository directory under the config root, keyed by the
    /// `<org>/<repo>` suffix of the checkout path.
    pub fn repo_dir(&self, org: &str, repo: &str) -> PathBuf {
        self.repositories_dir().join(org).join(repo)
    }

    pub fn repo_worktrees_dir(&self, org: &str, repo: &str) -> PathBuf {
        self.repo_dir(org, repo).join("worktrees")
    }

    pub fn repo_templates_dir(&self, org: &str, repo: &str) -> PathBuf {
        self.repo_dir(org, repo).join("templates")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> HangarPaths {
        HangarPaths::from_dir(PathBuf::from("/tmp/.hangar-test"))
    }

    #[test]
    fn test_top_level_files() {
        let p = paths();
        assert_eq!(p.store_db(), PathBuf::from("/tmp/.hangar-test/store.db"));
        assert_eq!(
            p.daemon_pid_file(),
            PathBuf::from("/tmp/.hangar-test/hangard.pid")
        );
        assert_eq!(
            p.user_config(),
            PathBuf::from("/tmp/.hangar-test/config.toml")
        );
    }

    #[test]
    fn test_worker_log_layout() {
        let p = paths();
        assert_eq!(
            p.worker_log("sess-1", "work-1"),
            PathBuf::from("/tmp/.hangar-test/outputs/sess-1/work-1.log")
        );
        assert_eq!(
            p.worker_log_gz("sess-1", "work-1"),
            PathBuf::from("/tmp/.hangar-test/outputs/sess-1/work-1.log.gz")
        );
    }

    #[test]
    fn test_repo_layout() {
        let p = paths();
        assert_eq!(
            p.repo_worktrees_dir("acme", "widget"),
            PathBuf::from("/tmp/.hangar-test/repositories/acme/widget/worktrees")
        );
        assert_eq!(
            p.repo_templates_dir("acme", "widget"),
            PathBuf::from("/tmp/.hangar-test/repositories/acme/widget/templates")
        );
    }

    #[test]
    fn test_resolve_honors_hangar_home() {
        temp_env::with_var("HANGAR_HOME", Some("/tmp/custom-hangar"), || {
            let p = HangarPaths::resolve().unwrap();
            assert_eq!(p.hangar_dir(), Path::new("/tmp/custom-hangar"));
        });
    }
}
