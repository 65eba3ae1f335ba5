use serde::{Deserialize, Serialize};

use super::UnknownTag;
use crate::patterns;

/// How an agent definition is executed.
///
/// Only the PTY runner exists today; the tag column is kept so new runner
/// kinds can land without a schema migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    #[default]
    Pty,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Pty => "pty",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownTag> {
        match s {
            "pty" => Ok(AgentType::Pty),
            other => Err(UnknownTag::new("agent_type", other)),
        }
    }
}

/// A template for launching an agent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub agent_type: AgentType,
    /// Launch command; must contain `{{prompt}}`.
    pub command_template: String,
    /// Command used when restarting with conversation continuation.
    #[serde(default)]
    pub continue_template: Option<String>,
    /// Non-interactive launch command; must contain `{{prompt}}` when set.
    #[serde(default)]
    pub headless_template: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Built-in agents ship with the server and cannot be deleted.
    pub is_built_in: bool,
    /// Regexes matched against the output tail to detect a blocking question.
    #[serde(default)]
    pub asking_patterns: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AgentDefinition {
    /// Validate the template and pattern invariants.
    pub fn validate(&self) -> Result<(), String> {
        if !self.command_template.contains("{{prompt}}") {
            return Err("command_template must contain {{prompt}}".to_string());
        }
        if let Some(headless) = &self.headless_template {
            if !headless.contains("{{prompt}}") {
                return Err("headless_template must contain {{prompt}}".to_string());
            }
        }
        for pattern in &self.asking_patterns {
            patterns::validate_asking_pattern(pattern).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentDefinition {
        AgentDefinition {
            id: "a1".to_string(),
            name: "claude".to_string(),
            agent_type: AgentType::Pty,
            command_template: "claude \"{{prompt}}\"".to_string(),
            continue_template: Some("claude --continue".to_string()),
            headless_template: None,
            description: None,
            is_built_in: true,
            asking_patterns: vec!["Do you want to.*\\?".to_string()],
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_valid_agent_passes() {
        assert!(agent().validate().is_ok());
    }

    #[test]
    fn test_command_template_requires_prompt() {
        let mut a = agent();
        a.command_template = "claude".to_string();
        assert!(a.validate().unwrap_err().contains("{{prompt}}"));
    }

    #[test]
    fn test_headless_template_requires_prompt() {
        let mut a = agent();
        a.headless_template = Some("claude -p".to_string());
        assert!(a.validate().unwrap_err().contains("headless_template"));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let mut a = agent();
        a.asking_patterns = vec!["(a+)+".to_string()];
        assert!(a.validate().is_err());
    }

    #[test]
    fn test_agent_type_tags() {
        assert_eq!(AgentType::Pty.as_str(), "pty");
        assert_eq!(AgentType::parse("pty").unwrap(), AgentType::Pty);
        let err = AgentType::parse("quantum").unwrap_err();
        assert!(err.to_string().contains("quantum"));
    }
}
