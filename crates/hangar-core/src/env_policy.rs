//! Environment policy for spawned PTY children.
//!
//! The PTY adapter is the only component allowed to assemble a child's final
//! environment; everything it needs is defined here as two explicit lists.
//! Blocked variables are server-internal config the child must not see.
//! Protected variables can never be overridden by repository env configs.

/// Server-internal variables removed from the child environment via an
/// `unset` shell prefix (the spawn primitive merges the parent env, so they
/// cannot be dropped through the builder alone).
pub const BLOCKED_ENV_VARS: &[&str] = &[
    "HANGAR_HOME",
    "HANGAR_PORT",
    "HANGAR_WEBHOOK_SECRET",
    "HANGAR_SUGGESTER_URL",
];

/// Variables repository env configs may never override.
pub const PROTECTED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "TERM",
    "COLORTERM",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
];

/// Variables forced onto every PTY child.
pub const FORCED_ENV_VARS: &[(&str, &str)] = &[
    ("TERM", "xterm-256color"),
    ("COLORTERM", "truecolor"),
    ("FORCE_COLOR", "1"),
];

/// Whether a variable name is protected from repository overrides.
///
/// Covers the explicit list plus the whole `DYLD_*` namespace.
pub fn is_protected(name: &str) -> bool {
    PROTECTED_ENV_VARS.contains(&name) || name.starts_with("DYLD_")
}

/// Drop protected names from a repository-supplied env list.
pub fn filter_repo_env(vars: Vec<(String, String)>) -> Vec<(String, String)> {
    vars.into_iter().filter(|(k, _)| !is_protected(k)).collect()
}

/// Shell prefix that unsets every blocked variable: `unset A B C; `.
pub fn unset_prefix() -> String {
    format!("unset {}; ", BLOCKED_ENV_VARS.join(" "))
}

/// Parse dotenv-format text into key/value pairs.
///
/// Supports `KEY=VALUE` lines, `#` comments, blank lines, an optional
/// `export ` prefix, and single/double quote stripping. Malformed lines are
/// skipped.
pub fn parse_dotenv(text: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        vars.push((key.to_string(), value.to_string()));
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_names() {
        assert!(is_protected("PATH"));
        assert!(is_protected("LD_PRELOAD"));
        assert!(is_protected("DYLD_INSERT_LIBRARIES"));
        assert!(!is_protected("MY_APP_KEY"));
    }

    #[test]
    fn test_filter_repo_env_drops_protected() {
        let filtered = filter_repo_env(vec![
            ("PATH".to_string(), "/evil".to_string()),
            ("API_KEY".to_string(), "x".to_string()),
            ("DYLD_LIBRARY_PATH".to_string(), "/evil".to_string()),
        ]);
        assert_eq!(filtered, vec![("API_KEY".to_string(), "x".to_string())]);
    }

    #[test]
    fn test_unset_prefix_shape() {
        let prefix = unset_prefix();
        assert!(prefix.starts_with("unset HANGAR_HOME"));
        assert!(prefix.ends_with("; "));
    }

    #[test]
    fn test_parse_dotenv() {
        let text = "
# comment
FOO=bar
export QUOTED=\"a b\"
SINGLE='c d'
 SPACED = v
BAD LINE
=nokey
";
        let vars = parse_dotenv(text);
        assert_eq!(
            vars,
            vec![
                ("FOO".to_string(), "bar".to_string()),
                ("QUOTED".to_string(), "a b".to_string()),
                ("SINGLE".to_string(), "c d".to_string()),
                ("SPACED".to_string(), "v".to_string()),
            ]
        );
    }
}
