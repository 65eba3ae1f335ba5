use serde::{Deserialize, Serialize};
use std::path::Path;

/// A registered local git checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    /// Absolute path to the checkout. Unique across rows.
    pub path: String,
    pub created_at: String,
    pub updated_at: String,
    /// Shell command run inside a freshly created worktree.
    #[serde(default)]
    pub setup_command: Option<String>,
    /// Shell command run inside a worktree before removal.
    #[serde(default)]
    pub cleanup_command: Option<String>,
    /// dotenv-format text merged into agent/terminal worker environments.
    #[serde(default)]
    pub env_vars: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Agent definition used when a worker request does not name one.
    #[serde(default)]
    pub default_agent_id: Option<String>,
    /// Cached default branch name, refreshed on demand from origin/HEAD.
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl Repository {
    /// Validate the path invariant: an existing directory containing `.git`.
    pub fn validate_path(path: &str) -> Result<(), String> {
        let p = Path::new(path);
        if !p.is_absolute() {
            return Err(format!("repository path must be absolute: '{}'", path));
        }
        if !p.is_dir() {
            return Err(format!("repository path does not exist: '{}'", path));
        }
        if !p.join(".git").exists() {
            return Err(format!("not a git checkout (no .git): '{}'", path));
        }
        Ok(())
    }

    /// Derive the `<org>/<repo>` key used for the managed directory layout.
    ///
    /// The org is the parent directory name of the checkout; a checkout at
    /// the filesystem root falls back to org `local`.
    pub fn org_repo(&self) -> (String, String) {
        let p = Path::new(&self.path);
        let repo = p
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let org = p
            .parent()
            .and_then(|d| d.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("local")
            .to_string();
        (org, repo)
    }
}
