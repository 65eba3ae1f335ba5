use serde::{Deserialize, Serialize};

use super::UnknownTag;

/// Session variant: pinned to a managed worktree, or free-floating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Worktree,
    Quick,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Worktree => "worktree",
            SessionKind::Quick => "quick",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownTag> {
        match s {
            "worktree" => Ok(SessionKind::Worktree),
            "quick" => Ok(SessionKind::Quick),
            other => Err(UnknownTag::new("session_type", other)),
        }
    }
}

/// A working-directory context owning a set of workers.
///
/// The `kind` is immutable after creation. For `worktree` sessions,
/// `location_path` must equal the resolved path of `worktree_id` under
/// `repository_id`; `quick` sessions have neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub location_path: String,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub worktree_id: Option<String>,
    /// Pid of the server process that owns the live workers. Cleared on
    /// pause; a mismatch at boot marks the session orphaned.
    #[serde(default)]
    pub server_pid: Option<u32>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub initial_prompt: Option<String>,
}

impl Session {
    /// Validate the variant invariants at construction time.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            SessionKind::Worktree => {
                if self.repository_id.is_none() || self.worktree_id.is_none() {
                    return Err(
                        "worktree session requires repository_id and worktree_id".to_string()
                    );
                }
            }
            SessionKind::Quick => {
                if self.repository_id.is_some() || self.worktree_id.is_some() {
                    return Err("quick session cannot reference a worktree".to_string());
                }
            }
        }
        Ok(())
    }

    /// Derive a title from the first line of a prompt, truncated to 80 chars
    /// on a char boundary.
    pub fn derive_title(prompt: &str) -> String {
        let first_line = prompt.lines().next().unwrap_or("").trim();
        first_line.chars().take(80).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(kind: SessionKind) -> Session {
        Session {
            id: "s1".to_string(),
            kind,
            location_path: "/tmp/wt".to_string(),
            repository_id: None,
            worktree_id: None,
            server_pid: Some(1234),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            title: None,
            initial_prompt: None,
        }
    }

    #[test]
    fn test_worktree_session_requires_refs() {
        let s = session(SessionKind::Worktree);
        assert!(s.validate().is_err());

        let mut s = session(SessionKind::Worktree);
        s.repository_id = Some("r1".to_string());
        s.worktree_id = Some("w1".to_string());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_quick_session_rejects_refs() {
        let mut s = session(SessionKind::Quick);
        assert!(s.validate().is_ok());
        s.repository_id = Some("r1".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_kind_tags_roundtrip() {
        assert_eq!(SessionKind::parse("worktree").unwrap(), SessionKind::Worktree);
        assert_eq!(SessionKind::parse("quick").unwrap(), SessionKind::Quick);
        assert!(SessionKind::parse("hybrid").is_err());
    }

    #[test]
    fn test_derive_title_truncates_first_line() {
        assert_eq!(Session::derive_title("fix the bug\nmore detail"), "fix the bug");
        let long = "x".repeat(200);
        assert_eq!(Session::derive_title(&long).chars().count(), 80);
    }
}
