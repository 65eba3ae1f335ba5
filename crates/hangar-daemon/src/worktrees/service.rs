//! Worktree lifecycle: index allocation, directory naming, git worktree
//! creation/removal, template expansion, and setup/cleanup command
//! execution.
//!
//! The service knows nothing about live sessions; the HTTP layer composes
//! it with the session manager for the async creation flow.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hangar_core::template::{self, WorktreeVars};
use hangar_core::types::worktree::WorktreeRecord;
use hangar_core::{Repository, Session, SessionKind};
use hangar_paths::HangarPaths;
use hangar_store::Store;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::errors::DaemonError;
use crate::gitio::{self, CommandOutput};

/// How the worktree's branch is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BranchMode {
    /// Server-generated `task-<epoch_ms>` name.
    Auto,
    /// Caller-supplied new branch.
    Custom { branch: String },
    /// Check out an existing local branch.
    Existing { branch: String },
    /// Ask the metadata suggester to derive a name from the prompt.
    Prompt,
}

#[derive(Debug, Clone)]
pub struct CreateWorktreeRequest {
    pub branch_mode: BranchMode,
    pub initial_prompt: Option<String>,
    pub title: Option<String>,
    pub use_remote: bool,
}

/// Result of a successful creation.
#[derive(Debug, Clone)]
pub struct CreateWorktreeOutcome {
    pub worktree: WorktreeRecord,
    pub session: Session,
    pub branch: String,
    /// `use_remote` was requested but the pre-fetch failed; the base came
    /// from the local ref instead.
    pub fetch_failed: bool,
    pub setup: Option<CommandOutput>,
}

/// A worktree as listed: git state unioned with the DB registration.
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeListing {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<WorktreeRecord>,
    /// Registered in the DB but no longer reported by git.
    pub orphaned: bool,
}

#[derive(Clone)]
pub struct WorktreeService {
    config: DaemonConfig,
    paths: HangarPaths,
    store: Store,
    http: reqwest::Client,
}

impl WorktreeService {
    pub fn new(config: DaemonConfig, paths: HangarPaths, store: Store) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.outbound_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            config,
            paths,
            store,
            http,
        }
    }

    /// Union of worktrees known to git and worktrees registered in the DB.
    pub async fn list_worktrees(
        &self,
        repo: &Repository,
    ) -> Result<Vec<WorktreeListing>, DaemonError> {
        let output = gitio::git(
            Path::new(&repo.path),
            &["worktree", "list", "--porcelain"],
        )
        .await?;
        gitio::expect_success(&output, "git worktree list")?;
        let git_paths = gitio::parse_worktree_list(&output.stdout);
        let records = self.store.list_worktrees(&repo.id)?;

        let mut listings: Vec<WorktreeListing> = Vec::new();
        for path in &git_paths {
            // The main checkout itself is not a managed worktree.
            if *path == repo.path {
                continue;
            }
            let record = records.iter().find(|r| &r.path == path).cloned();
            listings.push(WorktreeListing {
                path: path.clone(),
                record,
                orphaned: false,
            });
        }
        for record in records {
            if !git_paths.contains(&record.path) {
                listings.push(WorktreeListing {
                    path: record.path.clone(),
                    record: Some(record),
                    orphaned: true,
                });
            }
        }
        Ok(listings)
    }

    /// Create a worktree and its session row. The caller owns agent-worker
    /// creation and the completion broadcast.
    pub async fn create_worktree(
        &self,
        repo: &Repository,
        request: &CreateWorktreeRequest,
    ) -> Result<CreateWorktreeOutcome, DaemonError> {
        let repo_path = Path::new(&repo.path);
        let (org, repo_name) = repo.org_repo();

        // 1. Branch name.
        let existing = matches!(request.branch_mode, BranchMode::Existing { .. });
        let branch = self.resolve_branch(repo, request).await?;
        if existing {
            if !gitio::branch_exists(repo_path, &branch)? {
                return Err(DaemonError::validation(format!(
                    "branch '{}' does not exist",
                    branch
                )));
            }
        } else if gitio::branch_exists(repo_path, &branch)? {
            return Err(DaemonError::conflict(format!(
                "branch '{}' already exists",
                branch
            )));
        }

        // 2. Index + directory.
        let index = self.store.next_worktree_index(&repo.id)?;
        let worktrees_dir = self.paths.repo_worktrees_dir(&org, &repo_name);
        std::fs::create_dir_all(&worktrees_dir)?;
        let dir_name = format!("wt-{:03}-{}", index, random_suffix());
        let worktree_path = worktrees_dir.join(dir_name);
        let worktree_path_str = worktree_path.to_string_lossy().into_owned();

        // 3. Base ref, optionally pre-fetched.
        let base_local = match &repo.default_branch {
            Some(branch) => branch.clone(),
            None => gitio::default_branch(repo_path)?,
        };
        let mut fetch_failed = false;
        let base = if request.use_remote && !existing {
            let fetch = gitio::git_with_timeout(
                repo_path,
                &["fetch", "origin", &base_local],
                Duration::from_millis(self.config.outbound_timeout_ms),
            )
            .await;
            match fetch {
                Ok(output) if output.success() => format!("origin/{}", base_local),
                Ok(output) => {
                    warn!(
                        event = "daemon.worktree.fetch_failed",
                        repository_id = %repo.id,
                        stderr = %output.stderr.trim(),
                    );
                    fetch_failed = true;
                    base_local.clone()
                }
                Err(e) => {
                    warn!(event = "daemon.worktree.fetch_failed", error = %e);
                    fetch_failed = true;
                    base_local.clone()
                }
            }
        } else {
            base_local.clone()
        };

        // 4. git worktree add.
        let output = if existing {
            gitio::git(repo_path, &["worktree", "add", &worktree_path_str, &branch]).await?
        } else {
            gitio::git(
                repo_path,
                &["worktree", "add", "-b", &branch, &worktree_path_str, &base],
            )
            .await?
        };
        gitio::expect_success(&output, "git worktree add")?;

        // 5. Persist worktree + session in one transaction; undo the git
        //    worktree if the rows cannot land.
        let worktree = WorktreeRecord {
            id: hangar_core::new_id(),
            repository_id: repo.id.clone(),
            path: worktree_path_str.clone(),
            index_number: index,
            created_at: hangar_core::now_rfc3339(),
        };
        let title = request.title.clone().or_else(|| {
            request
                .initial_prompt
                .as_deref()
                .map(Session::derive_title)
        });
        let session = Session {
            id: hangar_core::new_id(),
            kind: SessionKind::Worktree,
            location_path: worktree_path_str.clone(),
            repository_id: Some(repo.id.clone()),
            worktree_id: Some(worktree.id.clone()),
            server_pid: Some(std::process::id()),
            title,
            initial_prompt: request.initial_prompt.clone(),
            created_at: hangar_core::now_rfc3339(),
            updated_at: hangar_core::now_rfc3339(),
        };
        if let Err(e) = self.store.insert_worktree_with_session(&worktree, &session) {
            warn!(event = "daemon.worktree.persist_failed", error = %e);
            let undo = gitio::git(
                repo_path,
                &["worktree", "remove", "--force", &worktree_path_str],
            )
            .await;
            if let Err(undo_err) = undo {
                warn!(event = "daemon.worktree.rollback_failed", error = %undo_err);
            }
            return Err(e.into());
        }

        // 6. Template files + setup command.
        let vars = WorktreeVars {
            worktree_num: index,
            branch: branch.clone(),
            repo: repo_name.clone(),
            worktree_path: worktree_path_str.clone(),
        };
        self.copy_templates(repo, &org, &repo_name, &worktree_path, &vars);

        let setup = match &repo.setup_command {
            Some(command) => Some(
                self.run_hook_command(command, &worktree_path, &vars)
                    .await?,
            ),
            None => None,
        };

        info!(
            event = "daemon.worktree.create_completed",
            repository_id = %repo.id,
            branch = %branch,
            path = %worktree_path_str,
            index = index,
        );

        Ok(CreateWorktreeOutcome {
            worktree,
            session,
            branch,
            fetch_failed,
            setup,
        })
    }

    /// Authoritative boundary check: the path is the repo's main checkout
    /// or a DB-registered worktree of that repo.
    pub fn is_worktree_of(&self, repo: &Repository, path: &str) -> Result<bool, DaemonError> {
        if path == repo.path {
            return Ok(true);
        }
        match self.store.find_worktree_by_path(path)? {
            Some(record) => Ok(record.repository_id == repo.id),
            None => Ok(false),
        }
    }

    /// Remove a managed worktree. Fails unless the path is under the
    /// managed worktree root and `is_worktree_of` holds; both checks must
    /// pass before anything touches git or the filesystem.
    pub async fn remove_worktree(
        &self,
        repo: &Repository,
        path: &str,
        force: bool,
    ) -> Result<(), DaemonError> {
        let (org, repo_name) = repo.org_repo();
        let managed_root = self.paths.repo_worktrees_dir(&org, &repo_name);
        let canonical = Path::new(path)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(path));
        if !canonical.starts_with(&managed_root) {
            return Err(DaemonError::validation(format!(
                "'{}' is outside the managed worktree root",
                path
            )));
        }
        if !self.is_worktree_of(repo, path)? {
            return Err(DaemonError::validation(format!(
                "'{}' is not a worktree of repository '{}'",
                path, repo.name
            )));
        }

        let record = self.store.find_worktree_by_path(path)?;

        if let Some(command) = &repo.cleanup_command {
            if canonical.is_dir() {
                let vars = WorktreeVars {
                    worktree_num: record.as_ref().map(|r| r.index_number).unwrap_or(0),
                    branch: gitio::current_branch(&canonical)
                        .ok()
                        .flatten()
                        .unwrap_or_default(),
                    repo: repo_name.clone(),
                    worktree_path: path.to_string(),
                };
                let output = self.run_hook_command(command, &canonical, &vars).await?;
                if !output.success() && !force {
                    return Err(DaemonError::validation(format!(
                        "cleanup command failed (exit {}): {}",
                        output.exit_code,
                        output.stderr.trim()
                    )));
                }
            }
        }

        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path);
        let output = gitio::git(Path::new(&repo.path), &args).await?;
        if !output.success() {
            if !force {
                return Err(DaemonError::Git(format!(
                    "git worktree remove: {}",
                    output.stderr.trim()
                )));
            }
            // Forced removal falls back to deleting the directory and
            // pruning.
            let _ = std::fs::remove_dir_all(&canonical);
            let _ = gitio::git(Path::new(&repo.path), &["worktree", "prune"]).await;
        }

        if let Some(record) = record {
            self.store.delete_worktree(&record.id)?;
        }
        info!(
            event = "daemon.worktree.remove_completed",
            repository_id = %repo.id,
            path = %path,
        );
        Ok(())
    }

    // --- Internals ---

    async fn resolve_branch(
        &self,
        repo: &Repository,
        request: &CreateWorktreeRequest,
    ) -> Result<String, DaemonError> {
        let name = match &request.branch_mode {
            BranchMode::Auto => fallback_branch_name(),
            BranchMode::Custom { branch } | BranchMode::Existing { branch } => branch.clone(),
            BranchMode::Prompt => {
                let prompt = request.initial_prompt.as_deref().unwrap_or("");
                self.suggest_branch(repo, prompt).await
            }
        };
        gitio::validate_branch_name(&name)
    }

    /// Ask the external metadata suggester for a branch name; any failure
    /// falls back to `task-<epoch_ms>`.
    async fn suggest_branch(&self, repo: &Repository, prompt: &str) -> String {
        let Some(url) = &self.config.suggester_url else {
            return fallback_branch_name();
        };
        let body = serde_json::json!({
            "prompt": prompt,
            "repository": repo.name,
        });
        let response = self.http.post(url).json(&body).send().await;
        match response {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(value) => value["branch"]
                    .as_str()
                    .map(|s| s.to_string())
                    .filter(|s| gitio::validate_branch_name(s).is_ok())
                    .unwrap_or_else(fallback_branch_name),
                Err(e) => {
                    warn!(event = "daemon.worktree.suggester_parse_failed", error = %e);
                    fallback_branch_name()
                }
            },
            Err(e) => {
                warn!(event = "daemon.worktree.suggester_failed", error = %e);
                fallback_branch_name()
            }
        }
    }

    /// Copy template files into a fresh worktree with placeholder
    /// substitution. Repo-local templates (`<repo>/.hangar/`) win over the
    /// managed per-repo directory, which wins over the global one.
    fn copy_templates(
        &self,
        repo: &Repository,
        org: &str,
        repo_name: &str,
        worktree_path: &Path,
        vars: &WorktreeVars,
    ) {
        let candidates = [
            Path::new(&repo.path).join(".hangar"),
            self.paths.repo_templates_dir(org, repo_name),
            self.paths.global_templates_dir(),
        ];
        let Some(source) = candidates.iter().find(|p| p.is_dir()) else {
            return;
        };

        for entry in walkdir::WalkDir::new(source).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            let target = worktree_path.join(relative);
            if let Some(parent) = target.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(content) => {
                    let rendered = template::render_worktree_template(&content, vars);
                    if let Err(e) = std::fs::write(&target, rendered) {
                        warn!(event = "daemon.worktree.template_write_failed", error = %e);
                    }
                }
                // Binary templates are copied untouched.
                Err(_) => {
                    if let Err(e) = std::fs::copy(entry.path(), &target) {
                        warn!(event = "daemon.worktree.template_copy_failed", error = %e);
                    }
                }
            }
        }
        info!(
            event = "daemon.worktree.templates_copied",
            source = %source.display(),
            target = %worktree_path.display(),
        );
    }

    /// Run a setup/cleanup command in a sub-shell inside the worktree with
    /// the worktree variables exported. Values are git-validated (branch
    /// names carry no shell metacharacters).
    async fn run_hook_command(
        &self,
        command: &str,
        cwd: &Path,
        vars: &WorktreeVars,
    ) -> Result<CommandOutput, DaemonError> {
        let expanded = template::render_worktree_template(command, vars);
        let output = tokio::process::Command::new("/bin/sh")
            .args(["-c", &expanded])
            .current_dir(cwd)
            .env("WORKTREE_NUM", vars.worktree_num.to_string())
            .env("BRANCH", &vars.branch)
            .env("REPO", &vars.repo)
            .env("WORKTREE_PATH", &vars.worktree_path)
            .kill_on_drop(true)
            .output()
            .await?;
        let output = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        info!(
            event = "daemon.worktree.hook_completed",
            exit_code = output.exit_code,
            cwd = %cwd.display(),
        );
        Ok(output)
    }
}

fn fallback_branch_name() -> String {
    format!("task-{}", hangar_core::now_epoch_ms())
}

/// Four random lowercase alphanumerics for worktree directory names.
fn random_suffix() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(4)
        .collect()
}
