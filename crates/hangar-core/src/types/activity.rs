use serde::{Deserialize, Serialize};

/// Derived classification of an agent worker's output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// No output observed yet.
    Unknown,
    /// Bytes arrived within the active window.
    Active,
    /// Silent past the idle timeout.
    Idle,
    /// An asking pattern matches the output tail.
    Waiting,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Unknown => "unknown",
            ActivityState::Active => "active",
            ActivityState::Idle => "idle",
            ActivityState::Waiting => "waiting",
        }
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings() {
        assert_eq!(ActivityState::Unknown.to_string(), "unknown");
        assert_eq!(ActivityState::Waiting.as_str(), "waiting");
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ActivityState::Active).unwrap();
        assert_eq!(json, r#""active""#);
    }
}
