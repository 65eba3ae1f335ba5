use serde::{Deserialize, Serialize};

use super::UnknownTag;

/// Worker variant inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerKind {
    /// PTY child driven by an agent definition.
    Agent,
    /// PTY child running the user's shell.
    Terminal,
    /// Virtual worker computing git diffs against a pinned base commit.
    GitDiff,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Agent => "agent",
            WorkerKind::Terminal => "terminal",
            WorkerKind::GitDiff => "git-diff",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownTag> {
        match s {
            "agent" => Ok(WorkerKind::Agent),
            "terminal" => Ok(WorkerKind::Terminal),
            "git-diff" => Ok(WorkerKind::GitDiff),
            other => Err(UnknownTag::new("worker_type", other)),
        }
    }

    pub fn is_pty(&self) -> bool {
        matches!(self, WorkerKind::Agent | WorkerKind::Terminal)
    }

    /// Default worker name when the create request omits one.
    pub fn default_name(&self) -> &'static str {
        match self {
            WorkerKind::Agent => "agent",
            WorkerKind::Terminal => "terminal",
            WorkerKind::GitDiff => "diff",
        }
    }
}

/// A compute endpoint inside a session.
///
/// Agent and terminal workers hold a `pid` while alive and null when dead.
/// Git-diff workers hold the `base_commit` pinned at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: WorkerKind,
    pub name: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub base_commit: Option<String>,
    pub created_at: String,
}

impl Worker {
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            WorkerKind::Agent => {
                if self.agent_id.is_none() {
                    return Err("agent worker requires agent_id".to_string());
                }
            }
            WorkerKind::Terminal => {}
            WorkerKind::GitDiff => {
                if self.base_commit.is_none() {
                    return Err("git-diff worker requires base_commit".to_string());
                }
                if self.pid.is_some() {
                    return Err("git-diff worker cannot have a pid".to_string());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(kind: WorkerKind) -> Worker {
        Worker {
            id: "w1".to_string(),
            session_id: "s1".to_string(),
            kind,
            name: kind.default_name().to_string(),
            agent_id: None,
            pid: None,
            base_commit: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(WorkerKind::GitDiff.as_str(), "git-diff");
        assert_eq!(WorkerKind::parse("git-diff").unwrap(), WorkerKind::GitDiff);
        assert!(WorkerKind::parse("lambda").is_err());
    }

    #[test]
    fn test_pty_classification() {
        assert!(WorkerKind::Agent.is_pty());
        assert!(WorkerKind::Terminal.is_pty());
        assert!(!WorkerKind::GitDiff.is_pty());
    }

    #[test]
    fn test_agent_requires_agent_id() {
        let mut w = worker(WorkerKind::Agent);
        assert!(w.validate().is_err());
        w.agent_id = Some("a1".to_string());
        assert!(w.validate().is_ok());
    }

    #[test]
    fn test_git_diff_requires_base_commit() {
        let mut w = worker(WorkerKind::GitDiff);
        assert!(w.validate().is_err());
        w.base_commit = Some("abc123".to_string());
        assert!(w.validate().is_ok());
        w.pid = Some(42);
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_serde_tag_is_type() {
        let mut w = worker(WorkerKind::Terminal);
        w.pid = Some(100);
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains(r#""type":"terminal"#));
    }
}
