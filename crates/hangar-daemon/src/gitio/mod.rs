//! Git plumbing for the daemon.
//!
//! Read-only queries (branch enumeration, merge-base, repo discovery) go
//! through git2. Mutations that must behave exactly like the user's git
//! (worktree add/remove, fetch, branch rename) and text-producing queries
//! (diff, log) shell out to the `git` binary. The `gh` CLI answers the PR
//! link lookup.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use tracing::debug;

use crate::errors::DaemonError;

/// A finished git/gh invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn from_output(output: Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `git` in `cwd` with the given args.
pub async fn git(cwd: &Path, args: &[&str]) -> Result<CommandOutput, DaemonError> {
    run("git", cwd, args, None).await
}

/// Run `git` with a timeout (network operations: fetch).
pub async fn git_with_timeout(
    cwd: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, DaemonError> {
    run("git", cwd, args, Some(timeout)).await
}

/// Run `gh` in `cwd` with the given args and a timeout.
pub async fn gh(cwd: &Path, args: &[&str], timeout: Duration) -> Result<CommandOutput, DaemonError> {
    run("gh", cwd, args, Some(timeout)).await
}

async fn run(
    program: &str,
    cwd: &Path,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<CommandOutput, DaemonError> {
    debug!(event = "daemon.git.command", program = program, args = ?args, cwd = %cwd.display());
    let mut command = tokio::process::Command::new(program);
    command.args(args).current_dir(cwd).kill_on_drop(true);

    let future = command.output();
    let output = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| DaemonError::Git(format!("{} {:?} timed out", program, args)))??,
        None => future.await?,
    };
    Ok(CommandOutput::from_output(output))
}

/// Require success, wrapping stderr into the error.
pub fn expect_success(output: &CommandOutput, context: &str) -> Result<(), DaemonError> {
    if output.success() {
        return Ok(());
    }
    Err(DaemonError::Git(format!(
        "{}: {}",
        context,
        output.stderr.trim()
    )))
}

// --- git2-backed read queries ---

/// Local branch names of a checkout.
pub fn list_branches(repo_path: &Path) -> Result<Vec<String>, DaemonError> {
    let repo = open_repo(repo_path)?;
    let mut names = Vec::new();
    let branches = repo
        .branches(Some(git2::BranchType::Local))
        .map_err(|e| DaemonError::Git(e.to_string()))?;
    for branch in branches {
        let (branch, _) = branch.map_err(|e| DaemonError::Git(e.to_string()))?;
        if let Ok(Some(name)) = branch.name() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Current branch name, or `None` for a detached HEAD.
pub fn current_branch(repo_path: &Path) -> Result<Option<String>, DaemonError> {
    let repo = open_repo(repo_path)?;
    let head = repo.head().map_err(|e| DaemonError::Git(e.to_string()))?;
    Ok(head.shorthand().map(|s| s.to_string()))
}

/// Merge-base of HEAD and the given branch, as a commit id string.
pub fn merge_base(repo_path: &Path, branch: &str) -> Result<String, DaemonError> {
    let repo = open_repo(repo_path)?;
    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(|e| DaemonError::Git(e.to_string()))?;
    let other = repo
        .revparse_single(branch)
        .and_then(|obj| obj.peel_to_commit())
        .map_err(|e| DaemonError::Git(format!("resolve '{}': {}", branch, e)))?;
    let base = repo
        .merge_base(head.id(), other.id())
        .map_err(|e| DaemonError::Git(e.to_string()))?;
    Ok(base.to_string())
}

/// Resolve the default branch from `origin/HEAD`, falling back to
/// `main`/`master` existence.
pub fn default_branch(repo_path: &Path) -> Result<String, DaemonError> {
    let repo = open_repo(repo_path)?;
    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD") {
        if let Some(target) = reference.symbolic_target() {
            if let Some(name) = target.strip_prefix("refs/remotes/origin/") {
                return Ok(name.to_string());
            }
        }
    }
    for candidate in ["main", "master"] {
        if repo.find_branch(candidate, git2::BranchType::Local).is_ok() {
            return Ok(candidate.to_string());
        }
    }
    Err(DaemonError::Git(format!(
        "cannot determine default branch for {}",
        repo_path.display()
    )))
}

/// Whether a local branch exists.
pub fn branch_exists(repo_path: &Path, branch: &str) -> Result<bool, DaemonError> {
    let repo = open_repo(repo_path)?;
    Ok(repo.find_branch(branch, git2::BranchType::Local).is_ok())
}

fn open_repo(repo_path: &Path) -> Result<git2::Repository, DaemonError> {
    git2::Repository::open(repo_path)
        .map_err(|e| DaemonError::Git(format!("open {}: {}", repo_path.display(), e)))
}

/// Reject branch names that could smuggle shell metacharacters or path
/// tricks into worktree directories and setup commands.
pub fn validate_branch_name(branch: &str) -> Result<String, DaemonError> {
    let trimmed = branch.trim();
    if trimmed.is_empty() {
        return Err(DaemonError::validation("branch name cannot be empty"));
    }
    let forbidden = trimmed.contains("..")
        || trimmed.starts_with('-')
        || trimmed
            .chars()
            .any(|c| c.is_whitespace() || "~^:?*[\\$`\"'<>|;&(){}!".contains(c));
    if forbidden {
        return Err(DaemonError::validation(format!(
            "invalid branch name: '{}'",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

/// Parse `git worktree list --porcelain` output into worktree paths.
pub fn parse_worktree_list(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(|path| path.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_branch_name() {
        assert_eq!(validate_branch_name(" feature-auth ").unwrap(), "feature-auth");
        assert_eq!(validate_branch_name("feat/auth").unwrap(), "feat/auth");
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("-flag").is_err());
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("rm;-rf").is_err());
        assert!(validate_branch_name("a$(b)").is_err());
        assert!(validate_branch_name("tick`tock").is_err());
    }

    #[test]
    fn test_parse_worktree_list() {
        let porcelain = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\n\
                         worktree /repo/../wt-001-ab\nHEAD def\nbranch refs/heads/t1\n";
        assert_eq!(
            parse_worktree_list(porcelain),
            vec!["/repo".to_string(), "/repo/../wt-001-ab".to_string()]
        );
    }

    #[tokio::test]
    async fn test_git_runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let output = git(dir.path(), &["init", "-q"]).await.unwrap();
        assert!(output.success(), "git init failed: {}", output.stderr);
        assert!(dir.path().join(".git").exists());
    }

    #[tokio::test]
    async fn test_expect_success_wraps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let output = git(dir.path(), &["worktree", "list"]).await.unwrap();
        if !output.success() {
            let err = expect_success(&output, "worktree list").unwrap_err();
            assert!(matches!(err, DaemonError::Git(_)));
        }
    }
}
