use crate::models::{ChangeKind, CodeChange};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest file path the validator accepts.
const MAX_PATH_LENGTH: usize = 512;

/// Languages whose sources are brace-delimited enough for a balance check
/// to be meaningful.
const BRACE_LANGUAGES: &[&str] = &[
    "rust", "javascript", "typescript", "java", "c", "cpp", "csharp", "go", "json", "css",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub success: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
        }
    }
}

/// Structural gate on proposed code changes.
///
/// Checks file-path sanity, the empty-content rule, and a best-effort
/// bracket balance for brace-delimited languages. Stateless and pure; it
/// never catches semantic bugs and nothing downstream assumes it does.
#[derive(Debug, Clone)]
pub struct CodeValidator {
    path_pattern: Regex,
}

impl Default for CodeValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeValidator {
    pub fn new() -> Self {
        // Relative paths only, conventional path characters.
        let path_pattern =
            Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/\-]*$").expect("static pattern compiles");
        Self { path_pattern }
    }

    pub fn validate(&self, changes: &[CodeChange]) -> ValidationReport {
        let mut errors = Vec::new();

        if changes.is_empty() {
            errors.push("No code changes to validate".to_string());
            return ValidationReport::failed(errors);
        }

        for change in changes {
            self.validate_path(change, &mut errors);
            self.validate_content(change, &mut errors);
        }

        if errors.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::failed(errors)
        }
    }

    fn validate_path(&self, change: &CodeChange, errors: &mut Vec<String>) {
        let path = change.path.as_str();
        if path.is_empty() {
            errors.push("Change has an empty file path".to_string());
            return;
        }
        if path.len() > MAX_PATH_LENGTH {
            errors.push(format!("File path too long: {path:.60}…"));
            return;
        }
        if path.split('/').any(|segment| segment == "..") {
            errors.push(format!("File path escapes the workspace: {path}"));
            return;
        }
        if !self.path_pattern.is_match(path) {
            errors.push(format!("File path contains invalid characters: {path}"));
        }
    }

    fn validate_content(&self, change: &CodeChange, errors: &mut Vec<String>) {
        if change.kind == ChangeKind::Delete {
            return;
        }
        if change.content.is_empty() {
            errors.push(format!("Empty content for non-delete change: {}", change.path));
            return;
        }
        if BRACE_LANGUAGES.contains(&change.language.as_str()) {
            if let Err(e) = check_bracket_balance(&change.content) {
                errors.push(format!("{}: {e}", change.path));
            }
        }
    }
}

/// Best-effort bracket balance: tracks {}, [], () outside of string and
/// line-comment context. Intentionally forgiving; parsing is the
/// compiler's job, this only catches obviously truncated output.
fn check_bracket_balance(content: &str) -> Result<(), String> {
    let mut stack = Vec::new();
    let mut chars = content.chars().peekable();
    let mut in_string = false;
    let mut in_single_quoted = false;
    let mut in_line_comment = false;

    while let Some(c) = chars.next() {
        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }
        if in_string || in_single_quoted {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' if in_string => in_string = false,
                '\'' if in_single_quoted => in_single_quoted = false,
                // Strings do not span lines in the languages checked
                // here; an unclosed quote at end of line is noise (a
                // Rust lifetime, an apostrophe), not a literal.
                '\n' => {
                    in_string = false;
                    in_single_quoted = false;
                }
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '\'' => in_single_quoted = true,
            '/' if chars.peek() == Some(&'/') => in_line_comment = true,
            '{' | '[' | '(' => stack.push(c),
            '}' => {
                if stack.pop() != Some('{') {
                    return Err("unbalanced brace".to_string());
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return Err("unbalanced bracket".to_string());
                }
            }
            ')' => {
                if stack.pop() != Some('(') {
                    return Err("unbalanced parenthesis".to_string());
                }
            }
            _ => {}
        }
    }

    // A string still open at EOF usually means truncated output; the
    // balance result is meaningless there, so report it directly.
    if in_string {
        return Err("unterminated string literal".to_string());
    }
    if let Some(open) = stack.last() {
        return Err(match open {
            '{' => "unbalanced brace".to_string(),
            '[' => "unbalanced bracket".to_string(),
            _ => "unbalanced parenthesis".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, language: &str, content: &str, kind: ChangeKind) -> CodeChange {
        CodeChange {
            path: path.to_string(),
            language: language.to_string(),
            content: content.to_string(),
            kind,
        }
    }

    #[test]
    fn accepts_well_formed_changes() {
        let changes = vec![
            change("src/lib.rs", "rust", "fn main() {}\n", ChangeKind::Create),
            change("README.md", "markdown", "# Title\n", ChangeKind::Modify),
        ];
        let report = CodeValidator::new().validate(&changes);
        assert!(report.success, "errors: {:?}", report.errors);
    }

    #[test]
    fn rejects_empty_change_set() {
        let report = CodeValidator::new().validate(&[]);
        assert!(!report.success);
    }

    #[test]
    fn rejects_path_traversal() {
        let changes = vec![change("../etc/passwd", "text", "x", ChangeKind::Create)];
        let report = CodeValidator::new().validate(&changes);
        assert!(!report.success);
        assert!(report.errors[0].contains("escapes"));
    }

    #[test]
    fn rejects_empty_content_except_for_deletes() {
        let validator = CodeValidator::new();

        let create = vec![change("src/a.rs", "rust", "", ChangeKind::Create)];
        assert!(!validator.validate(&create).success);

        let delete = vec![change("src/a.rs", "rust", "", ChangeKind::Delete)];
        assert!(validator.validate(&delete).success);
    }

    #[test]
    fn flags_unbalanced_braces_in_brace_languages() {
        let changes = vec![change(
            "src/broken.rs",
            "rust",
            "fn main() {\n    let x = 1;\n",
            ChangeKind::Create,
        )];
        let report = CodeValidator::new().validate(&changes);
        assert!(!report.success);
        assert!(report.errors[0].contains("unbalanced brace"));
    }

    #[test]
    fn braces_inside_strings_and_comments_are_ignored() {
        let content = r#"
fn main() {
    let s = "{ not a real brace";
    // } neither is this one
    println!("{}", s);
}
"#;
        let changes = vec![change("src/ok.rs", "rust", content, ChangeKind::Create)];
        let report = CodeValidator::new().validate(&changes);
        assert!(report.success, "errors: {:?}", report.errors);
    }

    #[test]
    fn prose_languages_skip_the_balance_check() {
        let changes = vec![change(
            "notes.md",
            "markdown",
            "An unmatched { is fine in prose",
            ChangeKind::Create,
        )];
        assert!(CodeValidator::new().validate(&changes).success);
    }
}
