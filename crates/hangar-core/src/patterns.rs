//! Validation and compilation for agent asking-patterns.
//!
//! Patterns come from user-editable agent definitions and are matched
//! against every output chunk. Guards applied at write time: a length cap
//! and a rejection of nested-quantifier shapes (`(X+)+`, `(X|Y)+`) that
//! behave pathologically in backtracking engines.

use regex::Regex;

pub const MAX_PATTERN_LEN: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("pattern exceeds {MAX_PATTERN_LEN} chars ({0})")]
    TooLong(usize),

    #[error("pattern contains a nested quantifier: '{0}'")]
    NestedQuantifier(String),

    #[error("invalid regex: {0}")]
    Invalid(#[from] regex::Error),
}

/// Validate a single asking pattern without keeping the compiled form.
pub fn validate_asking_pattern(pattern: &str) -> Result<(), PatternError> {
    compile_asking_pattern(pattern).map(|_| ())
}

/// Validate and compile a single asking pattern.
pub fn compile_asking_pattern(pattern: &str) -> Result<Regex, PatternError> {
    if pattern.chars().count() > MAX_PATTERN_LEN {
        return Err(PatternError::TooLong(pattern.chars().count()));
    }
    if has_nested_quantifier(pattern) {
        return Err(PatternError::NestedQuantifier(pattern.to_string()));
    }
    Ok(Regex::new(pattern)?)
}

/// Compile a pattern list, failing on the first invalid entry.
pub fn compile_asking_patterns(patterns: &[String]) -> Result<Vec<Regex>, PatternError> {
    patterns.iter().map(|p| compile_asking_pattern(p)).collect()
}

/// Detect a quantifier applied to a group whose body itself contains a
/// quantifier or an alternation: `(X+)+`, `(X*)*`, `(X|Y)+`, `(X+){2,}`.
///
/// Escaped characters are skipped; character classes are treated as opaque.
fn has_nested_quantifier(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    // Stack of group-start indices; body_flags[i] records whether the group
    // opened at stack depth i contains a bare quantifier or alternation.
    let mut body_flags: Vec<bool> = Vec::new();
    let mut in_class = false;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                i += 2;
                continue;
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            _ if in_class => {}
            '(' => body_flags.push(false),
            ')' => {
                let body_quantified = body_flags.pop().unwrap_or(false);
                let followed_by_quantifier = matches!(
                    chars.get(i + 1),
                    Some('+') | Some('*') | Some('{')
                );
                if body_quantified && followed_by_quantifier {
                    return true;
                }
                // A quantified group also counts as a quantifier inside any
                // enclosing group.
                if body_quantified || followed_by_quantifier {
                    if let Some(outer) = body_flags.last_mut() {
                        *outer = true;
                    }
                }
            }
            '+' | '*' | '|' => {
                if let Some(flag) = body_flags.last_mut() {
                    *flag = true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_patterns_pass() {
        assert!(validate_asking_pattern("Do you want to.*\\?").is_ok());
        assert!(validate_asking_pattern("continue\\? \\[y/N\\]").is_ok());
        assert!(validate_asking_pattern("❯ \\d+\\. Yes").is_ok());
    }

    #[test]
    fn test_nested_plus_rejected() {
        assert!(matches!(
            validate_asking_pattern("(a+)+"),
            Err(PatternError::NestedQuantifier(_))
        ));
        assert!(matches!(
            validate_asking_pattern("(x*)*"),
            Err(PatternError::NestedQuantifier(_))
        ));
        assert!(matches!(
            validate_asking_pattern("(a+){2,}"),
            Err(PatternError::NestedQuantifier(_))
        ));
    }

    #[test]
    fn test_alternation_group_quantified_rejected() {
        assert!(matches!(
            validate_asking_pattern("(yes|no)+"),
            Err(PatternError::NestedQuantifier(_))
        ));
        assert!(matches!(
            validate_asking_pattern("((a|b)c)+"),
            Err(PatternError::NestedQuantifier(_))
        ));
    }

    #[test]
    fn test_unquantified_groups_pass() {
        assert!(validate_asking_pattern("(yes|no)").is_ok());
        assert!(validate_asking_pattern("(abc)d+").is_ok());
    }

    #[test]
    fn test_escapes_and_classes_ignored() {
        // Escaped parens and class-internal metacharacters are not groups.
        assert!(validate_asking_pattern("\\(a+\\)+").is_ok());
        assert!(validate_asking_pattern("[(+)]+").is_ok());
    }

    #[test]
    fn test_length_cap() {
        let long = "a".repeat(MAX_PATTERN_LEN + 1);
        assert!(matches!(
            validate_asking_pattern(&long),
            Err(PatternError::TooLong(_))
        ));
        let ok = "a".repeat(MAX_PATTERN_LEN);
        assert!(validate_asking_pattern(&ok).is_ok());
    }

    #[test]
    fn test_invalid_regex_surfaces() {
        assert!(matches!(
            validate_asking_pattern("([unclosed"),
            Err(PatternError::Invalid(_))
        ));
    }

    #[test]
    fn test_compile_list_fails_fast() {
        let patterns = vec!["ok.*".to_string(), "(a+)+".to_string()];
        assert!(compile_asking_patterns(&patterns).is_err());
    }
}
