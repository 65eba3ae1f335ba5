//! Placeholder expansion for agent command templates and worktree setup
//! templates.

use std::sync::LazyLock;

use regex::Regex;

/// Expand an agent command template.
///
/// `{{prompt}}` is replaced verbatim — quoting is the template author's
/// concern — and `{{cwd}}` with the session's location path.
pub fn render_command(template: &str, prompt: &str, cwd: &str) -> String {
    template
        .replace("{{prompt}}", prompt)
        .replace("{{cwd}}", cwd)
}

/// Substitution values for worktree template files and setup commands.
#[derive(Debug, Clone)]
pub struct WorktreeVars {
    pub worktree_num: i64,
    pub branch: String,
    pub repo: String,
    pub worktree_path: String,
}

static ARITHMETIC: LazyLock<Regex> = LazyLock::new(|| {
    // {{WORKTREE_NUM + 3000}} — integer offsets only; anything else is left
    // verbatim.
    Regex::new(r"\{\{\s*WORKTREE_NUM\s*\+\s*(-?\d+)\s*\}\}").unwrap()
});

/// Expand worktree placeholders, including arithmetic offsets on
/// `WORKTREE_NUM`.
pub fn render_worktree_template(content: &str, vars: &WorktreeVars) -> String {
    let with_arithmetic = ARITHMETIC.replace_all(content, |caps: &regex::Captures<'_>| {
        match caps[1].parse::<i64>() {
            Ok(offset) => (vars.worktree_num + offset).to_string(),
            Err(_) => caps[0].to_string(),
        }
    });

    with_arithmetic
        .replace("{{WORKTREE_NUM}}", &vars.worktree_num.to_string())
        .replace("{{BRANCH}}", &vars.branch)
        .replace("{{REPO}}", &vars.repo)
        .replace("{{WORKTREE_PATH}}", &vars.worktree_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> WorktreeVars {
        WorktreeVars {
            worktree_num: 7,
            branch: "feature-auth".to_string(),
            repo: "widget".to_string(),
            worktree_path: "/tmp/wt-007-ab12".to_string(),
        }
    }

    #[test]
    fn test_render_command_substitutes_both() {
        let out = render_command("claude \"{{prompt}}\" --cwd {{cwd}}", "fix auth", "/tmp/wt");
        assert_eq!(out, "claude \"fix auth\" --cwd /tmp/wt");
    }

    #[test]
    fn test_render_command_prompt_verbatim() {
        // No shell quoting here; the template author owns quoting.
        let out = render_command("run {{prompt}}", "a \"b\" $c", "/");
        assert_eq!(out, "run a \"b\" $c");
    }

    #[test]
    fn test_worktree_basic_substitution() {
        let out = render_worktree_template(
            "PORT={{WORKTREE_NUM}} BRANCH={{BRANCH}} REPO={{REPO}} AT={{WORKTREE_PATH}}",
            &vars(),
        );
        assert_eq!(
            out,
            "PORT=7 BRANCH=feature-auth REPO=widget AT=/tmp/wt-007-ab12"
        );
    }

    #[test]
    fn test_worktree_arithmetic() {
        let out = render_worktree_template("PORT={{WORKTREE_NUM + 3000}}", &vars());
        assert_eq!(out, "PORT=3007");
    }

    #[test]
    fn test_worktree_arithmetic_whitespace_tolerant() {
        let out = render_worktree_template("{{ WORKTREE_NUM   + 10 }}", &vars());
        assert_eq!(out, "17");
    }

    #[test]
    fn test_worktree_non_integer_left_verbatim() {
        let out = render_worktree_template("{{WORKTREE_NUM + abc}}", &vars());
        assert_eq!(out, "{{WORKTREE_NUM + abc}}");
    }
}
